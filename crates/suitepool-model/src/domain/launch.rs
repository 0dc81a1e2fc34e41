//! Worker launch contract.
//!
//! A slot passes everything a forked worker needs through the worker's
//! environment. [`WorkerEnv::to_vars`] produces that variable list and
//! [`WorkerEnv::from_lookup`] parses it back on the worker side.
use std::str::FromStr;

use crate::{ModelError, PortBlock, SuiteRef, SuiteType, WorkerLimits, WorkerRole};

/// Names of the launch contract variables.
pub mod vars {
    pub const WORKER_SCRIPT: &str = "WORKER_SCRIPT";
    pub const WORKER_PORT: &str = "WORKER_PORT";
    pub const REQUESTED_PORTS: &str = "REQUESTED_PORTS";
    pub const WORKER_MAX_MEMORY: &str = "WORKER_MAX_MEMORY";
    pub const WORKER_MAX_TESTS: &str = "WORKER_MAX_TESTS";
    pub const WORKER_SLOW: &str = "WORKER_SLOW";
    pub const WORKER_TIMEOUT: &str = "WORKER_TIMEOUT";
    pub const TEST_TYPE: &str = "TEST_TYPE";
    pub const SUPPORT_FILES: &str = "SUPPORT_FILES";
    pub const REPORTS_URL: &str = "REPORTS_URL";
    pub const WORKER_TEST: &str = "WORKER_TEST";
    pub const SERVER_COMMAND: &str = "SERVER_COMMAND";
    pub const SUITE_COMMAND: &str = "SUITE_COMMAND";
    pub const TEST_DEBUG: &str = "TEST_DEBUG";
}

/// Parsed launch contract of one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEnv {
    pub role: WorkerRole,
    pub ports: PortBlock,
    pub limits: WorkerLimits,
    pub suite_type: SuiteType,
    pub support_files: Vec<String>,
    pub reports_url: Option<String>,
    /// Suite to execute; set for runners only.
    pub suite: Option<SuiteRef>,
    /// Command starting the system under test (server role).
    pub server_command: Option<String>,
    /// Program used to execute a suite (runner role).
    pub suite_command: Option<String>,
    pub debug: bool,
}

impl WorkerEnv {
    /// Contract for the server worker of a slot.
    pub fn server(ports: PortBlock, limits: WorkerLimits, suite_type: SuiteType) -> Self {
        Self {
            role: WorkerRole::Server,
            ports,
            limits,
            suite_type,
            support_files: Vec::new(),
            reports_url: None,
            suite: None,
            server_command: None,
            suite_command: None,
            debug: false,
        }
    }

    /// Derive the contract of a runner executing `suite` on the same slot.
    pub fn runner(&self, suite: SuiteRef) -> Self {
        Self {
            role: WorkerRole::Runner,
            suite: Some(suite),
            ..self.clone()
        }
    }

    /// Environment variables to export into the forked worker.
    pub fn to_vars(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            (vars::WORKER_SCRIPT, self.role.script().to_string()),
            (vars::WORKER_PORT, self.ports.primary.to_string()),
            (vars::REQUESTED_PORTS, self.ports.requested_csv()),
            (vars::WORKER_MAX_MEMORY, self.limits.max_memory_mb.to_string()),
            (vars::WORKER_MAX_TESTS, self.limits.max_tests.to_string()),
            (vars::WORKER_SLOW, self.limits.slow_ms.to_string()),
            (vars::WORKER_TIMEOUT, self.limits.timeout_ms.to_string()),
            (vars::TEST_TYPE, self.suite_type.as_str().to_string()),
            (vars::SUPPORT_FILES, self.support_files.join(",")),
        ];
        if let Some(url) = &self.reports_url {
            out.push((vars::REPORTS_URL, url.clone()));
        }
        if let Some(suite) = &self.suite {
            out.push((vars::WORKER_TEST, suite.as_str().to_string()));
        }
        if let Some(cmd) = &self.server_command {
            out.push((vars::SERVER_COMMAND, cmd.clone()));
        }
        if let Some(cmd) = &self.suite_command {
            out.push((vars::SUITE_COMMAND, cmd.clone()));
        }
        if self.debug {
            out.push((vars::TEST_DEBUG, "1".to_string()));
        }
        out
    }

    /// Parse the contract from an arbitrary variable source.
    ///
    /// Empty values count as unset; numeric limits fall back to the
    /// [`WorkerLimits`] defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ModelError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let role: WorkerRole = get(vars::WORKER_SCRIPT)
            .ok_or(ModelError::MissingVar(vars::WORKER_SCRIPT))?
            .parse()?;

        let primary = get(vars::WORKER_PORT).ok_or(ModelError::MissingVar(vars::WORKER_PORT))?;
        let primary = parse_value(vars::WORKER_PORT, &primary)?;
        let requested = split_csv(get(vars::REQUESTED_PORTS))
            .iter()
            .map(|p| parse_value(vars::REQUESTED_PORTS, p))
            .collect::<Result<Vec<u16>, _>>()?;

        let defaults = WorkerLimits::default();
        let limits = WorkerLimits {
            max_memory_mb: parse_or(&get, vars::WORKER_MAX_MEMORY, defaults.max_memory_mb)?,
            max_tests: parse_or(&get, vars::WORKER_MAX_TESTS, defaults.max_tests)?,
            slow_ms: parse_or(&get, vars::WORKER_SLOW, defaults.slow_ms)?,
            timeout_ms: parse_or(&get, vars::WORKER_TIMEOUT, defaults.timeout_ms)?,
        };

        let suite_type = match get(vars::TEST_TYPE) {
            Some(t) => t.parse()?,
            None => SuiteType::default(),
        };

        let suite = get(vars::WORKER_TEST).map(SuiteRef::new);
        if role == WorkerRole::Runner && suite.is_none() {
            return Err(ModelError::MissingVar(vars::WORKER_TEST));
        }

        Ok(Self {
            role,
            ports: PortBlock::new(primary, requested),
            limits,
            suite_type,
            support_files: split_csv(get(vars::SUPPORT_FILES)),
            reports_url: get(vars::REPORTS_URL),
            suite,
            server_command: get(vars::SERVER_COMMAND),
            suite_command: get(vars::SUITE_COMMAND),
            debug: get(vars::TEST_DEBUG).is_some_and(|v| v == "1"),
        })
    }

    /// Parse the contract from the current process environment.
    pub fn from_env() -> Result<Self, ModelError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }
}

fn split_csv(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_value<T: FromStr>(var: &'static str, value: &str) -> Result<T, ModelError> {
    value.trim().parse().map_err(|_| ModelError::InvalidVar {
        var,
        value: value.to_string(),
    })
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ModelError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(v) => parse_value(var, &v),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: Vec<(&'static str, String)>) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn sample_server() -> WorkerEnv {
        let mut env = WorkerEnv::server(
            PortBlock::new(41000, vec![41001, 41002]),
            WorkerLimits {
                max_memory_mb: 256,
                max_tests: 10,
                slow_ms: 75,
                timeout_ms: 2000,
            },
            SuiteType::Cucumber,
        );
        env.support_files = vec!["steps/a.js".into(), "steps/b.js".into()];
        env.reports_url = Some("/tmp/reports".into());
        env.server_command = Some("./bin/app --port $WORKER_PORT".into());
        env
    }

    #[test]
    fn runner_contract_survives_the_environment() {
        let runner = sample_server().runner(SuiteRef::new("features/login.feature"));
        let parsed = WorkerEnv::from_lookup(lookup_from(runner.to_vars())).unwrap();
        assert_eq!(parsed, runner);
    }

    #[test]
    fn requested_ports_are_comma_separated() {
        let vars = sample_server().to_vars();
        let requested = vars
            .iter()
            .find(|(k, _)| *k == vars::REQUESTED_PORTS)
            .map(|(_, v)| v.as_str());
        assert_eq!(requested, Some("41001,41002"));
    }

    #[test]
    fn missing_limits_fall_back_to_defaults() {
        let env = WorkerEnv::from_lookup(lookup_from(vec![
            (vars::WORKER_SCRIPT, "server".into()),
            (vars::WORKER_PORT, "4000".into()),
            (vars::REQUESTED_PORTS, "".into()),
            (vars::WORKER_MAX_MEMORY, "".into()),
        ]))
        .unwrap();

        assert_eq!(env.limits, WorkerLimits::default());
        assert!(env.ports.requested.is_empty());
        assert_eq!(env.suite_type, SuiteType::Tap);
        assert!(!env.debug);
    }

    #[test]
    fn runner_without_suite_is_rejected() {
        let err = WorkerEnv::from_lookup(lookup_from(vec![
            (vars::WORKER_SCRIPT, "runner".into()),
            (vars::WORKER_PORT, "4000".into()),
        ]))
        .unwrap_err();
        assert!(matches!(err, ModelError::MissingVar(vars::WORKER_TEST)));
    }

    #[test]
    fn garbage_port_is_reported_with_its_variable() {
        let err = WorkerEnv::from_lookup(lookup_from(vec![
            (vars::WORKER_SCRIPT, "server".into()),
            (vars::WORKER_PORT, "eighty".into()),
        ]))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidVar { var: vars::WORKER_PORT, .. }));
    }
}
