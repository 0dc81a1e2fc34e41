use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// OS-level identity of a spawned worker (its process id).
pub type WorkerId = u32;

/// The two roles a forked worker process can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRole {
    /// Long-lived worker hosting the system under test.
    Server,
    /// Short-lived worker executing exactly one suite.
    Runner,
}

impl WorkerRole {
    /// Value of `WORKER_SCRIPT` selecting this role.
    pub fn script(&self) -> &'static str {
        match self {
            WorkerRole::Server => "server",
            WorkerRole::Runner => "runner",
        }
    }

    /// Prefix of the human-readable registry id (`s-1`, `r-3`).
    pub fn prefix(&self) -> &'static str {
        match self {
            WorkerRole::Server => "s",
            WorkerRole::Runner => "r",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.script())
    }
}

impl FromStr for WorkerRole {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches("./") {
            "server" => Ok(WorkerRole::Server),
            "runner" => Ok(WorkerRole::Runner),
            other => Err(ModelError::UnknownRole(other.to_string())),
        }
    }
}

/// Diagnostic identity of a spawned worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub role: WorkerRole,
    pub custom_id: String,
}

impl WorkerRecord {
    pub fn is_server(&self) -> bool {
        self.role == WorkerRole::Server
    }

    pub fn is_runner(&self) -> bool {
        self.role == WorkerRole::Runner
    }
}

impl fmt::Display for WorkerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (pid {})", self.role, self.custom_id, self.worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_accepts_legacy_script_paths() {
        assert_eq!("./runner".parse::<WorkerRole>().unwrap(), WorkerRole::Runner);
        assert_eq!("server".parse::<WorkerRole>().unwrap(), WorkerRole::Server);
        assert!("./worker".parse::<WorkerRole>().is_err());
    }

    #[test]
    fn record_display_names_role_and_custom_id() {
        let record = WorkerRecord {
            worker_id: 4242,
            role: WorkerRole::Runner,
            custom_id: "r-3".into(),
        };
        assert_eq!(record.to_string(), "runner r-3 (pid 4242)");
        assert!(record.is_runner());
    }
}
