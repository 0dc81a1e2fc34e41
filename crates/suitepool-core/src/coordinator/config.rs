use std::{str::FromStr, time::Duration};

use suitepool_model::{ModelError, PortBlock, SuiteType, WorkerEnv, WorkerLimits, vars};

use crate::{batch::Batch, error::CoreError};

/// Coordinator-only variables, on top of the worker launch contract.
pub mod env {
    pub const MAX_SERVERS: &str = "MAX_SERVERS";
    pub const REQUESTED_PORTS_PER_SERVER: &str = "REQUESTED_PORTS_PER_SERVER";
    pub const BATCH_COUNT: &str = "BATCH_COUNT";
    pub const CURRENT_BATCH: &str = "CURRENT_BATCH";
    pub const TEST_COLORS: &str = "TEST_COLORS";
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound on concurrent server slots.
    pub pool_size: usize,
    /// Extra ports reserved per slot besides the primary one.
    pub requested_ports: usize,
    pub limits: WorkerLimits,
    pub suite_type: SuiteType,
    pub support_files: Vec<String>,
    /// Directory receiving one JSON report per suite.
    pub reports_dir: Option<String>,
    pub server_command: Option<String>,
    pub suite_command: Option<String>,
    pub batch: Option<Batch>,
    /// Grace period of a worker between `shutdown` and a forced kill.
    pub shutdown_timeout: Duration,
    /// `None` follows whether stdout is a terminal.
    pub use_colors: Option<bool>,
    pub debug: bool,
}

impl CoordinatorConfig {
    pub const POOL_SIZE: usize = 2;
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(4);

    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset or empty values keep
    /// their defaults, malformed ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let pool_size: usize = parse_or(&get, env::MAX_SERVERS, defaults.pool_size)?;
        if pool_size == 0 {
            return Err(CoreError::Config(format!("{} must be at least 1", env::MAX_SERVERS)));
        }

        let limits = WorkerLimits {
            max_memory_mb: parse_or(&get, vars::WORKER_MAX_MEMORY, defaults.limits.max_memory_mb)?,
            max_tests: parse_or(&get, vars::WORKER_MAX_TESTS, defaults.limits.max_tests)?,
            slow_ms: parse_or(&get, vars::WORKER_SLOW, defaults.limits.slow_ms)?,
            timeout_ms: parse_or(&get, vars::WORKER_TIMEOUT, defaults.limits.timeout_ms)?,
        };

        let suite_type = match get(vars::TEST_TYPE) {
            Some(t) => t.parse()?,
            None => SuiteType::default(),
        };

        let batch = match (get(env::BATCH_COUNT), get(env::CURRENT_BATCH)) {
            (None, None) => None,
            (Some(count), Some(current)) => Some(Batch::new(
                parse(env::BATCH_COUNT, &count)?,
                parse(env::CURRENT_BATCH, &current)?,
            )?),
            _ => {
                return Err(CoreError::Config(format!(
                    "{} and {} must be set together",
                    env::BATCH_COUNT,
                    env::CURRENT_BATCH
                )));
            }
        };

        Ok(Self {
            pool_size,
            requested_ports: parse_or(&get, env::REQUESTED_PORTS_PER_SERVER, 0)?,
            limits,
            suite_type,
            support_files: get(vars::SUPPORT_FILES)
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            reports_dir: get(vars::REPORTS_URL),
            server_command: get(vars::SERVER_COMMAND),
            suite_command: get(vars::SUITE_COMMAND),
            batch,
            shutdown_timeout: defaults.shutdown_timeout,
            use_colors: get(env::TEST_COLORS).map(|v| v != "0"),
            debug: get(vars::TEST_DEBUG).is_some_and(|v| v == "1"),
        })
    }

    /// Launch contract of the server worker owning `ports`.
    pub fn server_env(&self, ports: PortBlock) -> WorkerEnv {
        WorkerEnv {
            support_files: self.support_files.clone(),
            reports_url: self.reports_dir.clone(),
            server_command: self.server_command.clone(),
            suite_command: self.suite_command.clone(),
            debug: self.debug,
            ..WorkerEnv::server(ports, self.limits, self.suite_type)
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            pool_size: Self::POOL_SIZE,
            requested_ports: 0,
            limits: WorkerLimits::default(),
            suite_type: SuiteType::default(),
            support_files: Vec::new(),
            reports_dir: None,
            server_command: None,
            suite_command: None,
            batch: None,
            shutdown_timeout: Self::SHUTDOWN_TIMEOUT,
            use_colors: None,
            debug: false,
        }
    }
}

fn parse<T: FromStr>(var: &'static str, value: &str) -> Result<T, CoreError> {
    value.trim().parse().map_err(|_| {
        CoreError::Model(ModelError::InvalidVar {
            var,
            value: value.to_string(),
        })
    })
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(v) => parse(var, &v),
        None => Ok(default),
    }
}
