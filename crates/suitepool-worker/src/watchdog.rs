//! Runner resource checks.
//!
//! None of these are fatal: they only produce warnings that point at suites
//! leaking memory, suites that grew too large, or suites that silently
//! dropped tests.
use std::fmt;

use sysinfo::{Pid, System};
use tracing::warn;

use suitepool_model::{SuiteRef, WorkerLimits};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceWarning {
    Memory { used_mb: u64, limit_mb: u64 },
    TestCount { total: u32, limit: u32 },
    Unfinished { planned: u32, finished: u32 },
}

impl fmt::Display for ResourceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceWarning::Memory { used_mb, limit_mb } => {
                write!(f, "memory usage {used_mb}MB exceeds {limit_mb}MB")
            }
            ResourceWarning::TestCount { total, limit } => {
                write!(f, "suite has {total} tests, more than the allowed {limit}; consider splitting it")
            }
            ResourceWarning::Unfinished { planned, finished } => {
                write!(f, "only {finished} of {planned} planned tests finished")
            }
        }
    }
}

#[derive(Debug)]
pub struct Watchdog {
    limits: WorkerLimits,
    suite: SuiteRef,
    planned: u32,
    finished: u32,
    failed: bool,
    memory_warned: bool,
}

impl Watchdog {
    pub fn new(limits: WorkerLimits, suite: SuiteRef) -> Self {
        Self {
            limits,
            suite,
            planned: 0,
            finished: 0,
            failed: false,
            memory_warned: false,
        }
    }

    pub fn on_plan(&mut self, total: u32) {
        self.planned = total;
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    /// One test (or scenario) is over; `used_mb` is the current sample.
    pub fn on_test_end(&mut self, failed: bool, used_mb: Option<u64>) -> Option<ResourceWarning> {
        self.finished += 1;
        if failed {
            self.failed = true;
        }
        self.check_memory(used_mb)
    }

    /// Warns on the first breach only.
    pub fn check_memory(&mut self, used_mb: Option<u64>) -> Option<ResourceWarning> {
        let used_mb = used_mb?;
        if self.memory_warned || used_mb <= self.limits.max_memory_mb {
            return None;
        }
        self.memory_warned = true;
        let warning = ResourceWarning::Memory {
            used_mb,
            limit_mb: self.limits.max_memory_mb,
        };
        self.emit(&warning);
        Some(warning)
    }

    /// Post-suite checks.
    pub fn finish(&mut self) -> Vec<ResourceWarning> {
        let mut warnings = Vec::new();
        let total = self.planned.max(self.finished);
        if total > self.limits.max_tests {
            warnings.push(ResourceWarning::TestCount {
                total,
                limit: self.limits.max_tests,
            });
        }
        if self.finished < self.planned && !self.failed {
            warnings.push(ResourceWarning::Unfinished {
                planned: self.planned,
                finished: self.finished,
            });
        }
        for warning in &warnings {
            self.emit(warning);
        }
        warnings
    }

    pub fn finished(&self) -> u32 {
        self.finished
    }

    fn emit(&self, warning: &ResourceWarning) {
        warn!(target: "suitepool.worker", suite = %self.suite, "{warning}");
    }
}

/// Resident memory of the runner and the processes it spawned.
pub struct MemorySampler {
    system: System,
    pids: Vec<Pid>,
}

impl MemorySampler {
    /// Tracks the current process.
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pids: vec![Pid::from_u32(std::process::id())],
        }
    }

    pub fn track(&mut self, pid: u32) {
        self.pids.push(Pid::from_u32(pid));
    }

    /// Sum over every tracked process still alive, in MB.
    pub fn sample_mb(&mut self) -> Option<u64> {
        let mut bytes = None;
        for pid in &self.pids {
            if !self.system.refresh_process(*pid) {
                continue;
            }
            if let Some(process) = self.system.process(*pid) {
                *bytes.get_or_insert(0) += process.memory();
            }
        }
        bytes.map(|b| b / (1024 * 1024))
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}
