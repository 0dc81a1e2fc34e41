use serde::{Deserialize, Serialize};

/// Per-suite ceilings enforced by the runner watchdog and passed to the
/// suite adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerLimits {
    /// Resident memory ceiling in MiB; exceeding it warns once per suite.
    pub max_memory_mb: u64,
    /// Number of tests a suite may hold before it is flagged as too large.
    pub max_tests: u32,
    /// A test slower than this (ms) is reported as slow.
    pub slow_ms: u64,
    /// A test making no progress for this long (ms) is failed.
    pub timeout_ms: u64,
}

impl WorkerLimits {
    pub const MAX_MEMORY_MB: u64 = 512;
    pub const MAX_TESTS: u32 = 25;
    pub const SLOW_MS: u64 = 10_000;
    pub const TIMEOUT_MS: u64 = 15_000;
}

impl Default for WorkerLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: Self::MAX_MEMORY_MB,
            max_tests: Self::MAX_TESTS,
            slow_ms: Self::SLOW_MS,
            timeout_ms: Self::TIMEOUT_MS,
        }
    }
}
