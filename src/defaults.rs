//! Default values for orchestration timing and configuration lookup.

/// Interval between checks of an in-flight scene operation.
pub const POLL_INTERVAL_MS: u64 = 250;
/// Number of ticks the teardown barrier waits between drain checks.
pub const TEARDOWN_POLL_TICKS: u32 = 10;
/// Length of one tick (roughly one frame at 60Hz).
pub const TICK_MS: u64 = 16;
/// Simulated latency of the in-process scene manager.
pub const LOCAL_LOAD_LATENCY_MS: u64 = 0;

/// Environment variable overriding the loop poll interval.
pub const POLL_INTERVAL_ENV: &str = "STAGEHAND_POLL_INTERVAL_MS";
/// Environment variable pointing at a catalogue file.
pub const CATALOGUE_ENV: &str = "STAGEHAND_CATALOGUE";

pub fn poll_interval_ms() -> u64 { POLL_INTERVAL_MS }
pub fn teardown_poll_ticks() -> u32 { TEARDOWN_POLL_TICKS }
pub fn tick_ms() -> u64 { TICK_MS }
