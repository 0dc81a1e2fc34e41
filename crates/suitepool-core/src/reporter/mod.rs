//! Aggregation of the result events relayed by every slot.
mod dot;
pub use dot::{DotFormatter, LINE_WIDTH};

mod sink;
pub use sink::{ReportSink, SuiteReport};

mod stats;
pub use stats::{RunStats, StepCounts};

use std::{collections::HashMap, io::Write, time::Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use suitepool_model::{ResultEvent, SuiteRef, TestFailure, WorkerRole};

use crate::launcher::WorkerExit;

/// One failed test, step or worker, listed in the epilogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub suite: SuiteRef,
    pub title: String,
    pub failure: TestFailure,
}

/// Single pass/fail verdict over all suites of a run.
///
/// Events of different suites interleave freely; per-suite state is kept
/// apart so each suite's report looks as if it had run alone.
pub struct ReporterAggregator {
    formatter: DotFormatter,
    stats: RunStats,
    failures: Vec<FailureRecord>,
    suites: HashMap<SuiteRef, SuiteReport>,
    /// Scenario currently running in each BDD suite.
    scenarios: HashMap<SuiteRef, String>,
    sink: Option<ReportSink>,
    started: Instant,
}

impl ReporterAggregator {
    pub fn new(out: Box<dyn Write + Send>, colors: bool) -> Self {
        Self {
            formatter: DotFormatter::new(out, colors),
            stats: RunStats::default(),
            failures: Vec::new(),
            suites: HashMap::new(),
            scenarios: HashMap::new(),
            sink: None,
            started: Instant::now(),
        }
    }

    pub fn with_sink(mut self, sink: ReportSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn set_colors(&mut self, colors: bool) {
        self.formatter.set_colors(colors);
    }

    /// Feed one relayed event. Returns `true` when it must raise the bail.
    pub fn handle_test_results(&mut self, suite: &SuiteRef, event: &ResultEvent) -> bool {
        self.stats.record(event);
        let report = self.suite_report(suite);
        report.stats.record(event);

        let failure = match event {
            ResultEvent::TestFailed { test, error } => Some(FailureRecord {
                suite: suite.clone(),
                title: test.full_title.clone(),
                failure: error.clone(),
            }),
            ResultEvent::StepFinished { step } if step.status.is_failure() => {
                let scenario = self.scenarios.get(suite).cloned().unwrap_or_default();
                let message = step
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("step is {:?}", step.status).to_lowercase());
                Some(FailureRecord {
                    suite: suite.clone(),
                    title: format!("{scenario} {}", step.text).trim().to_string(),
                    failure: TestFailure::new(message),
                })
            }
            ResultEvent::ScenarioStarted { scenario } => {
                self.scenarios.insert(suite.clone(), scenario.name.clone());
                None
            }
            ResultEvent::ScenarioFinished { .. } => {
                self.scenarios.remove(suite);
                None
            }
            _ => None,
        };

        if let Err(err) = self.formatter.event(event) {
            debug!(target: "suitepool.reporter", error = %err, "formatter write failed");
        }

        match failure {
            Some(record) => {
                self.suite_report(suite).failures.push(record.clone());
                self.failures.push(record);
                true
            }
            None => false,
        }
    }

    /// Count a crashed worker as a failure of `suite`.
    pub fn record_worker_failure(&mut self, role: WorkerRole, suite: Option<&SuiteRef>, exit: WorkerExit) {
        self.stats.worker_failures += 1;
        let suite = suite.cloned().unwrap_or_else(|| SuiteRef::new(format!("<{} worker>", role.script())));
        let record = FailureRecord {
            suite: suite.clone(),
            title: format!("{} worker", role.script()),
            failure: TestFailure::new(format!("worker ended with {exit}")),
        };
        let report = self.suite_report(&suite);
        report.stats.worker_failures += 1;
        report.failures.push(record.clone());
        self.failures.push(record);

        if let Err(err) = self.formatter.worker_failure() {
            debug!(target: "suitepool.reporter", error = %err, "formatter write failed");
        }
    }

    /// `suiteDone` received; flushes the suite's machine report.
    pub fn suite_done(&mut self, suite: &SuiteRef) {
        self.stats.suites += 1;
        self.scenarios.remove(suite);
        let Some(sink) = &self.sink else {
            return;
        };
        let report = self.suites.get(suite).cloned().unwrap_or_else(|| SuiteReport {
            suite: Some(suite.clone()),
            ..SuiteReport::default()
        });
        match sink.write(suite, &report) {
            Ok(path) => debug!(target: "suitepool.reporter", %suite, path = %path.display(), "suite report written"),
            Err(err) => warn!(target: "suitepool.reporter", %suite, error = %err, "unable to write suite report"),
        }
    }

    /// Print the epilogue and return the final counters.
    pub fn finish(&mut self) -> RunStats {
        let elapsed = self.started.elapsed();
        if let Err(err) = self.formatter.epilogue(&self.stats, &self.failures, elapsed) {
            warn!(target: "suitepool.reporter", error = %err, "unable to print summary");
        }
        info!(
            target: "suitepool.reporter",
            suites = self.stats.suites,
            tests = self.stats.tests,
            scenarios = self.stats.scenarios(),
            failures = self.stats.failure_count(),
            "run finished"
        );
        self.stats.clone()
    }

    pub fn has_failures(&self) -> bool {
        self.stats.has_failures()
    }

    pub fn failure_count(&self) -> u32 {
        self.stats.failure_count()
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    fn suite_report(&mut self, suite: &SuiteRef) -> &mut SuiteReport {
        self.suites
            .entry(suite.clone())
            .or_insert_with(|| SuiteReport {
                suite: Some(suite.clone()),
                ..SuiteReport::default()
            })
    }
}
