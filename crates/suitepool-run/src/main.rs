//! `suitepool [SUITE]...`
//!
//! Runs the given test suites in parallel, one server per slot. The same
//! binary is re-executed as a worker when `WORKER_SCRIPT` is set.
use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use suitepool_core::{Coordinator, CoordinatorConfig};
use suitepool_exec::{ProcessLauncher, ProcessLimits};
use suitepool_model::{SuiteRef, WorkerEnv, vars};
use suitepool_observe::{LoggerConfig, LoggerFormat, logger_init};

/// Optional log format override (`text`, `json`, `journald`).
const LOG_FORMAT: &str = "SUITEPOOL_LOG_FORMAT";

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building runtime")?;

    let code = if std::env::var_os(vars::WORKER_SCRIPT).is_some_and(|v| !v.is_empty()) {
        runtime.block_on(worker())?
    } else {
        runtime.block_on(coordinator())?
    };
    // stdin readers sit in blocking threads; do not wait for them
    runtime.shutdown_background();
    std::process::exit(code);
}

fn logger(debug: bool) -> anyhow::Result<LoggerConfig> {
    // stdout belongs to the reporter (or the message channel in a worker)
    let mut cfg = LoggerConfig::worker().with_debug(debug);
    if let Ok(format) = std::env::var(LOG_FORMAT) {
        cfg.format = format.parse::<LoggerFormat>()?;
    }
    Ok(cfg)
}

async fn worker() -> anyhow::Result<i32> {
    let env = WorkerEnv::from_env().context("reading worker environment")?;
    logger_init(&logger(env.debug)?)?;
    debug!(target: "suitepool.worker", script = env.role.script(), port = env.ports.primary, "worker starting");
    Ok(suitepool_worker::run_worker(env).await)
}

async fn coordinator() -> anyhow::Result<i32> {
    let config = CoordinatorConfig::from_env().context("reading configuration")?;
    logger_init(&logger(config.debug)?)?;

    let suites: Vec<SuiteRef> = std::env::args().skip(1).map(SuiteRef::new).collect();
    let launcher = ProcessLauncher::current_exe()?.with_limits(ProcessLimits {
        disable_core_dumps: true,
        ..ProcessLimits::default()
    });

    let interrupt = CancellationToken::new();
    let trigger = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(target: "suitepool.coordinator", "received interrupt");
            trigger.cancel();
        }
    });

    let summary = Coordinator::new(config, std::sync::Arc::new(launcher))
        .run(suites, interrupt)
        .await?;
    info!(
        target: "suitepool.coordinator",
        finished = summary.finished.len(),
        missing = summary.missing.len(),
        bailed = summary.bailed,
        exit_code = summary.exit_code,
        "run complete"
    );
    Ok(summary.exit_code)
}
