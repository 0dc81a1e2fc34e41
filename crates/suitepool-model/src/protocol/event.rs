use serde::{Deserialize, Serialize};

/// Result event emitted by a runner and relayed up to the reporter.
///
/// Test-lifecycle suites (TAP) produce the `Suite*`/`Test*` family, BDD
/// suites the `Feature*`/`Scenario*`/`Step*` family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ResultEvent {
    SuiteStarted { title: String, total: u32 },
    TestPassed { test: TestInfo },
    TestFailed { test: TestInfo, error: TestFailure },
    TestPending { test: TestInfo },
    FeatureStarted { feature: FeatureInfo },
    ScenarioStarted { scenario: ScenarioInfo },
    StepFinished { step: StepInfo },
    ScenarioFinished { scenario: ScenarioInfo, failed: bool },
    FeatureFinished { feature: FeatureInfo },
}

impl ResultEvent {
    /// `true` for events that must raise the bail signal.
    pub fn is_failure(&self) -> bool {
        match self {
            ResultEvent::TestFailed { .. } => true,
            ResultEvent::StepFinished { step } => step.status.is_failure(),
            _ => false,
        }
    }

    /// `true` when one test (or scenario) reached its end.
    pub fn ends_test(&self) -> bool {
        matches!(
            self,
            ResultEvent::TestPassed { .. }
                | ResultEvent::TestFailed { .. }
                | ResultEvent::TestPending { .. }
                | ResultEvent::ScenarioFinished { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResultEvent::SuiteStarted { .. } => "suiteStarted",
            ResultEvent::TestPassed { .. } => "testPassed",
            ResultEvent::TestFailed { .. } => "testFailed",
            ResultEvent::TestPending { .. } => "testPending",
            ResultEvent::FeatureStarted { .. } => "featureStarted",
            ResultEvent::ScenarioStarted { .. } => "scenarioStarted",
            ResultEvent::StepFinished { .. } => "stepFinished",
            ResultEvent::ScenarioFinished { .. } => "scenarioFinished",
            ResultEvent::FeatureFinished { .. } => "featureFinished",
        }
    }
}

/// Speed bucket of a finished test, relative to its slow threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Fast,
    Medium,
    Slow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestInfo {
    pub full_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub slow_ms: u64,
}

impl TestInfo {
    pub fn speed(&self) -> Speed {
        match self.duration_ms {
            Some(d) if d > self.slow_ms => Speed::Slow,
            Some(d) if d > self.slow_ms / 2 => Speed::Medium,
            _ => Speed::Fast,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
}

impl TestFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureInfo {
    pub name: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioInfo {
    pub name: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInfo {
    pub text: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Outcome of one BDD step, as reported by Cucumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Passed,
    Failed,
    Ambiguous,
    Undefined,
    Pending,
    Skipped,
    #[serde(other)]
    Unknown,
}

impl StepStatus {
    /// Failed and ambiguous steps fail the run.
    pub fn is_failure(&self) -> bool {
        matches!(self, StepStatus::Failed | StepStatus::Ambiguous)
    }
}
