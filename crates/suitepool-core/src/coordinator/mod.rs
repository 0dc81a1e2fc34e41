//! The coordinator: owns the pool of slots, the suite queue and the verdict.
mod config;
pub use config::{CoordinatorConfig, env};

use std::{
    io::{IsTerminal, Write},
    sync::Arc,
};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use suitepool_model::{PortBlock, SuiteRef};

use crate::{
    error::CoreError,
    launcher::WorkerLauncher,
    ports::{self, PortAllocator},
    registry::WorkerRegistry,
    reporter::{ReportSink, ReporterAggregator, RunStats},
    slot::{ServerSlot, SlotEvent, SlotEventKind, SlotHandle, SlotId},
    state::GlobalState,
};

/// Outcome of [`Coordinator::run`].
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// `0` on success, `1` on any failure or interruption.
    pub exit_code: i32,
    /// Number of slots created.
    pub slots: usize,
    /// Port block of every slot, by slot id.
    pub ports: Vec<PortBlock>,
    /// Every dispatch in order.
    pub dispatched: Vec<(SlotId, SuiteRef)>,
    pub finished: Vec<SuiteRef>,
    /// Suites that never reported `suiteDone`.
    pub missing: Vec<SuiteRef>,
    pub bailed: bool,
    pub interrupted: bool,
    pub stats: RunStats,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    launcher: Arc<dyn WorkerLauncher>,
    registry: WorkerRegistry,
    ports: PortAllocator,
    output: Option<Box<dyn Write + Send>>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            config,
            launcher,
            registry: WorkerRegistry::new(),
            ports: PortAllocator::default(),
            output: None,
        }
    }

    /// Send reporter output somewhere other than stdout.
    pub fn with_output(mut self, out: Box<dyn Write + Send>) -> Self {
        self.output = Some(out);
        self
    }

    pub fn with_port_allocator(mut self, ports: PortAllocator) -> Self {
        self.ports = ports;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Run every suite (of the configured batch) and wait until each worker
    /// process is gone.
    ///
    /// Cancelling `interrupt` bails and stops every slot right away.
    pub async fn run(
        mut self,
        suites: Vec<SuiteRef>,
        interrupt: CancellationToken,
    ) -> Result<RunSummary, CoreError> {
        if suites.is_empty() {
            return Err(CoreError::NoSuites);
        }
        let suites = match self.config.batch {
            Some(batch) => {
                let selected = batch.select(&suites);
                debug!(
                    target: "suitepool.coordinator",
                    batch = batch.current(),
                    of = batch.count(),
                    total = suites.len(),
                    selected = selected.len(),
                    "batch selected"
                );
                selected
            }
            None => suites,
        };
        if suites.is_empty() {
            warn!(target: "suitepool.coordinator", "batch holds no test suites, nothing to run");
            return Ok(RunSummary::default());
        }
        info!(target: "suitepool.coordinator", "Running {} test suites", suites.len());

        let mut state = GlobalState::new(suites, self.config.pool_size);
        let slots = state.active_slots();
        let per_slot = self.config.requested_ports;
        let allocated = self.ports.allocate(slots * (per_slot + 1)).await?;
        let blocks = ports::partition(&allocated, slots, per_slot);

        let mut reporter = self.reporter()?;
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut handles: Vec<SlotHandle> = Vec::with_capacity(slots);
        let mut joins: Vec<JoinHandle<()>> = Vec::with_capacity(slots);

        for (id, block) in blocks.iter().cloned().enumerate() {
            let spawned = ServerSlot::spawn(
                id,
                self.config.server_env(block),
                Arc::clone(&self.launcher),
                self.registry.clone(),
                events_tx.clone(),
                self.config.shutdown_timeout,
            )
            .await;
            match spawned {
                Ok((handle, join)) => {
                    handles.push(handle);
                    joins.push(join);
                }
                Err(err) => {
                    warn!(target: "suitepool.coordinator", slot = id, error = %err, "unable to start slot, aborting");
                    for handle in &handles {
                        handle.disconnect_now();
                    }
                    drop(events_tx);
                    join_all(joins).await;
                    return Err(err);
                }
            }
        }
        drop(events_tx);

        let mut interrupted = false;
        while !state.all_slots_terminated() {
            tokio::select! {
                _ = interrupt.cancelled(), if !interrupted => {
                    interrupted = true;
                    warn!(target: "suitepool.coordinator", "interrupted, stopping all slots");
                    state.bail();
                    for handle in &handles {
                        handle.disconnect_now();
                    }
                }
                event = events.recv() => match event {
                    Some(event) => on_slot_event(event, &mut state, &mut reporter, &handles),
                    None => break,
                },
            }
        }
        join_all(joins).await;

        let stats = reporter.finish();
        let missing = state.missing();
        if !missing.is_empty() && !state.has_bailed() {
            let names: Vec<&str> = missing.iter().map(SuiteRef::as_str).collect();
            warn!(
                target: "suitepool.coordinator",
                missing = missing.len(),
                suites = %names.join(", "),
                "test suites were lost without reporting completion"
            );
        }

        let exit_code = if reporter.has_failures() || interrupted { 1 } else { 0 };
        Ok(RunSummary {
            exit_code,
            slots,
            ports: blocks,
            dispatched: state.dispatched().to_vec(),
            finished: state.finished().to_vec(),
            missing,
            bailed: state.has_bailed(),
            interrupted,
            stats,
        })
    }

    fn reporter(&mut self) -> Result<ReporterAggregator, CoreError> {
        let colors = self
            .config
            .use_colors
            .unwrap_or_else(|| std::io::stdout().is_terminal());
        let out: Box<dyn Write + Send> = match self.output.take() {
            Some(out) => out,
            None => Box::new(std::io::stdout()),
        };
        let reporter = ReporterAggregator::new(out, colors);
        match &self.config.reports_dir {
            Some(dir) => Ok(reporter.with_sink(ReportSink::new(dir)?)),
            None => Ok(reporter),
        }
    }
}

fn on_slot_event(
    event: SlotEvent,
    state: &mut GlobalState,
    reporter: &mut ReporterAggregator,
    handles: &[SlotHandle],
) {
    let Some(handle) = handles.get(event.slot) else {
        warn!(target: "suitepool.coordinator", slot = event.slot, "event from unknown slot");
        return;
    };
    match event.kind {
        SlotEventKind::ReadyForTests => match state.next_suite(handle.id()) {
            Some(suite) => {
                debug!(target: "suitepool.coordinator", slot = handle.id(), %suite, "dispatching suite");
                if !handle.run(suite.clone()) {
                    warn!(target: "suitepool.coordinator", slot = handle.id(), %suite, "slot is gone, suite not dispatched");
                }
            }
            None => {
                debug!(target: "suitepool.coordinator", slot = handle.id(), "no more work, disconnecting slot");
                handle.disconnect_now();
            }
        },
        SlotEventKind::TestResults { suite, event } => {
            if reporter.handle_test_results(&suite, &event) {
                bail(state, handles);
            }
        }
        SlotEventKind::SuiteDone(suite) => {
            reporter.suite_done(&suite);
            state.record_finished(suite);
        }
        SlotEventKind::WorkerFailed { role, suite, exit } => {
            warn!(
                target: "suitepool.coordinator",
                slot = handle.id(),
                role = role.script(),
                suite = suite.as_ref().map(SuiteRef::as_str).unwrap_or("-"),
                %exit,
                "worker failed"
            );
            reporter.record_worker_failure(role, suite.as_ref(), exit);
            bail(state, handles);
        }
        SlotEventKind::Terminated => {
            debug!(target: "suitepool.coordinator", slot = handle.id(), "slot terminated");
            state.slot_terminated();
        }
    }
}

/// Drop the remaining queue and let every slot finish its current suite.
fn bail(state: &mut GlobalState, handles: &[SlotHandle]) {
    if !state.bail() {
        return;
    }
    info!(
        target: "suitepool.coordinator",
        dispatched = state.dispatched_count(),
        total = state.original().len(),
        "failure detected, bailing"
    );
    for handle in handles {
        handle.disconnect();
    }
}

async fn join_all(joins: Vec<JoinHandle<()>>) {
    for join in joins {
        if let Err(err) = join.await {
            warn!(target: "suitepool.coordinator", error = %err, "slot task failed");
        }
    }
}
