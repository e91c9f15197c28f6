//! Scene entries and the catalogue that holds them.

pub mod catalogue;
pub mod entry;

pub use catalogue::Catalogue;
pub use entry::{
    Completion, EntrySnapshot, LoadTrigger, ProcessState, ReconciliationWarning, SceneCallback,
    SceneEntry,
};
