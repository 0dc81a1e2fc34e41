use serde::Serialize;

use suitepool_model::{ResultEvent, Speed, StepStatus};

/// Step outcomes of BDD suites, by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepCounts {
    pub passed: u32,
    pub failed: u32,
    pub ambiguous: u32,
    pub undefined: u32,
    pub pending: u32,
    pub skipped: u32,
    pub unknown: u32,
}

impl StepCounts {
    pub fn record(&mut self, status: StepStatus) {
        let slot = match status {
            StepStatus::Passed => &mut self.passed,
            StepStatus::Failed => &mut self.failed,
            StepStatus::Ambiguous => &mut self.ambiguous,
            StepStatus::Undefined => &mut self.undefined,
            StepStatus::Pending => &mut self.pending,
            StepStatus::Skipped => &mut self.skipped,
            StepStatus::Unknown => &mut self.unknown,
        };
        *slot += 1;
    }

    pub fn total(&self) -> u32 {
        self.passed
            + self.failed
            + self.ambiguous
            + self.undefined
            + self.pending
            + self.skipped
            + self.unknown
    }

    /// Non-zero buckets as `(label, count)`, most severe first.
    pub fn breakdown(&self) -> Vec<(&'static str, u32)> {
        [
            ("failed", self.failed),
            ("ambiguous", self.ambiguous),
            ("undefined", self.undefined),
            ("pending", self.pending),
            ("skipped", self.skipped),
            ("unknown", self.unknown),
            ("passed", self.passed),
        ]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .collect()
    }
}

/// Counters over every relayed result event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub suites: u32,
    pub tests: u32,
    pub passes: u32,
    pub pending: u32,
    pub slow: u32,
    /// Failed tests plus failed or ambiguous steps.
    pub failures: u32,
    pub scenarios_passed: u32,
    pub scenarios_failed: u32,
    pub steps: StepCounts,
    /// Workers that crashed or could not be forked.
    pub worker_failures: u32,
}

impl RunStats {
    pub fn record(&mut self, event: &ResultEvent) {
        match event {
            ResultEvent::TestPassed { test } => {
                self.tests += 1;
                self.passes += 1;
                if test.speed() == Speed::Slow {
                    self.slow += 1;
                }
            }
            ResultEvent::TestFailed { .. } => {
                self.tests += 1;
                self.failures += 1;
            }
            ResultEvent::TestPending { .. } => {
                self.tests += 1;
                self.pending += 1;
            }
            ResultEvent::StepFinished { step } => {
                self.steps.record(step.status);
                if step.status.is_failure() {
                    self.failures += 1;
                }
            }
            ResultEvent::ScenarioFinished { failed, .. } => {
                if *failed {
                    self.scenarios_failed += 1;
                } else {
                    self.scenarios_passed += 1;
                }
            }
            ResultEvent::SuiteStarted { .. }
            | ResultEvent::FeatureStarted { .. }
            | ResultEvent::ScenarioStarted { .. }
            | ResultEvent::FeatureFinished { .. } => {}
        }
    }

    pub fn scenarios(&self) -> u32 {
        self.scenarios_passed + self.scenarios_failed
    }

    pub fn failure_count(&self) -> u32 {
        self.failures + self.worker_failures
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use suitepool_model::{ScenarioInfo, StepInfo, TestFailure, TestInfo};

    fn test(duration_ms: u64) -> TestInfo {
        TestInfo {
            full_title: "t".into(),
            duration_ms: Some(duration_ms),
            slow_ms: 100,
        }
    }

    fn step(status: StepStatus) -> ResultEvent {
        ResultEvent::StepFinished {
            step: StepInfo {
                text: "a step".into(),
                status,
                message: None,
                duration_ms: None,
            },
        }
    }

    #[test]
    fn counts_test_lifecycle() {
        let mut stats = RunStats::default();
        stats.record(&ResultEvent::TestPassed { test: test(5) });
        stats.record(&ResultEvent::TestPassed { test: test(500) });
        stats.record(&ResultEvent::TestPending { test: test(0) });
        stats.record(&ResultEvent::TestFailed {
            test: test(1),
            error: TestFailure::new("boom"),
        });

        assert_eq!(stats.tests, 4);
        assert_eq!(stats.passes, 2);
        assert_eq!(stats.slow, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failures, 1);
        assert!(stats.has_failures());
    }

    #[test]
    fn ambiguous_steps_count_as_failures() {
        let mut stats = RunStats::default();
        stats.record(&step(StepStatus::Passed));
        stats.record(&step(StepStatus::Ambiguous));
        stats.record(&step(StepStatus::Undefined));
        stats.record(&ResultEvent::ScenarioFinished {
            scenario: ScenarioInfo {
                name: "s".into(),
                uri: "f.feature".into(),
                line: Some(3),
            },
            failed: true,
        });

        assert_eq!(stats.failures, 1);
        assert_eq!(stats.steps.total(), 3);
        assert_eq!(
            stats.steps.breakdown(),
            vec![("ambiguous", 1), ("undefined", 1), ("passed", 1)]
        );
        assert_eq!(stats.scenarios(), 1);
    }

    #[test]
    fn worker_failures_fail_the_run() {
        let stats = RunStats {
            worker_failures: 1,
            ..RunStats::default()
        };
        assert_eq!(stats.failure_count(), 1);
        assert!(stats.has_failures());
        assert!(!RunStats::default().has_failures());
    }
}
