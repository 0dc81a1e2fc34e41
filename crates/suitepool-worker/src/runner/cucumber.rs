//! Cucumber suites, read through the Cucumber Messages NDJSON stream.
use std::{collections::HashMap, time::Instant};

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use suitepool_model::{
    FeatureInfo, ResultEvent, ScenarioInfo, StepInfo, StepStatus, SuiteRef, WorkerEnv,
};

use super::{AdapterEvent, OutputParser, SuiteAdapter, exit_description, shell, suite_failure};

const DEFAULT_COMMAND: &str = "cucumber-js --format message";

/// Runs `SUITE_COMMAND` (default `cucumber-js --format message`) with a
/// `--require` per support file and the feature file last.
#[derive(Debug, Default)]
pub struct CucumberAdapter;

impl SuiteAdapter for CucumberAdapter {
    fn command(&self, env: &WorkerEnv, suite: &SuiteRef) -> Command {
        let command = env.suite_command.as_deref().unwrap_or(DEFAULT_COMMAND);
        let mut args: Vec<&str> = Vec::with_capacity(env.support_files.len() * 2 + 1);
        for file in &env.support_files {
            args.push("--require");
            args.push(file);
        }
        args.push(suite.as_str());
        shell(command, args)
    }

    fn parser(&self, env: &WorkerEnv, suite: &SuiteRef) -> Box<dyn OutputParser> {
        Box::new(CucumberParser::new(suite.clone(), env.limits.slow_ms))
    }
}

// Only the parts of each envelope we use; everything else is ignored.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    gherkin_document: Option<GherkinDocument>,
    pickle: Option<Pickle>,
    test_case: Option<TestCase>,
    test_case_started: Option<TestCaseStarted>,
    test_step_finished: Option<TestStepFinished>,
    test_case_finished: Option<TestCaseFinished>,
    test_run_finished: Option<TestRunFinished>,
}

#[derive(Debug, Deserialize)]
struct GherkinDocument {
    uri: String,
    feature: Option<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    name: String,
    #[serde(default)]
    children: Vec<FeatureChild>,
}

#[derive(Debug, Deserialize)]
struct FeatureChild {
    scenario: Option<Scenario>,
}

#[derive(Debug, Deserialize)]
struct Scenario {
    id: String,
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    line: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pickle {
    id: String,
    uri: String,
    name: String,
    #[serde(default)]
    steps: Vec<PickleStep>,
    #[serde(default)]
    ast_node_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PickleStep {
    id: String,
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestCase {
    id: String,
    pickle_id: String,
    #[serde(default)]
    test_steps: Vec<TestStep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestStep {
    id: String,
    pickle_step_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestCaseStarted {
    id: String,
    test_case_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestStepFinished {
    test_case_started_id: String,
    test_step_id: String,
    test_step_result: TestStepResult,
}

#[derive(Debug, Deserialize)]
struct TestStepResult {
    status: StepStatus,
    message: Option<String>,
    duration: Option<MessageDuration>,
}

#[derive(Debug, Deserialize)]
struct MessageDuration {
    seconds: u64,
    nanos: u32,
}

impl MessageDuration {
    fn as_millis(&self) -> u64 {
        self.seconds * 1000 + u64::from(self.nanos) / 1_000_000
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestCaseFinished {
    test_case_started_id: String,
}

#[derive(Debug, Deserialize)]
struct TestRunFinished {
    #[serde(default = "yes")]
    success: bool,
    message: Option<String>,
}

fn yes() -> bool {
    true
}

#[derive(Debug)]
struct PickleEntry {
    uri: String,
    name: String,
    line: Option<u32>,
    steps: HashMap<String, String>,
}

#[derive(Debug)]
struct CaseEntry {
    pickle_id: String,
    /// test step id -> pickle step id; hooks map to `None`.
    steps: HashMap<String, Option<String>>,
}

#[derive(Debug)]
struct Attempt {
    scenario: ScenarioInfo,
    case_id: String,
    failed: bool,
}

/// Rebuilds feature/scenario/step events from the message stream.
#[derive(Debug)]
pub struct CucumberParser {
    suite: SuiteRef,
    slow_ms: u64,
    features: HashMap<String, String>,
    scenario_lines: HashMap<String, u32>,
    pickles: HashMap<String, PickleEntry>,
    cases: HashMap<String, CaseEntry>,
    running: HashMap<String, Attempt>,
    feature: Option<FeatureInfo>,
    planned: bool,
    failures: u32,
}

impl CucumberParser {
    pub fn new(suite: SuiteRef, slow_ms: u64) -> Self {
        Self {
            suite,
            slow_ms,
            features: HashMap::new(),
            scenario_lines: HashMap::new(),
            pickles: HashMap::new(),
            cases: HashMap::new(),
            running: HashMap::new(),
            feature: None,
            planned: false,
            failures: 0,
        }
    }

    fn document(&mut self, doc: GherkinDocument) {
        let Some(feature) = doc.feature else {
            return;
        };
        for scenario in feature.children.into_iter().filter_map(|c| c.scenario) {
            self.scenario_lines.insert(scenario.id, scenario.location.line);
        }
        self.features.insert(doc.uri, feature.name);
    }

    fn pickle(&mut self, pickle: Pickle) {
        let line = pickle
            .ast_node_ids
            .first()
            .and_then(|id| self.scenario_lines.get(id))
            .copied();
        let steps = pickle.steps.into_iter().map(|s| (s.id, s.text)).collect();
        self.pickles.insert(
            pickle.id,
            PickleEntry {
                uri: pickle.uri,
                name: pickle.name,
                line,
                steps,
            },
        );
    }

    fn case_started(&mut self, started: TestCaseStarted, out: &mut Vec<AdapterEvent>) {
        if !self.planned {
            self.planned = true;
            let total = self.cases.len() as u32;
            out.push(AdapterEvent::Plan(total));
            out.push(AdapterEvent::Result(ResultEvent::SuiteStarted {
                title: self.suite.to_string(),
                total,
            }));
        }
        let Some(pickle) = self
            .cases
            .get(&started.test_case_id)
            .and_then(|case| self.pickles.get(&case.pickle_id))
        else {
            debug!(target: "suitepool.worker", test_case = %started.test_case_id, "test case without pickle");
            return;
        };

        if self.feature.as_ref().map(|f| f.uri.as_str()) != Some(pickle.uri.as_str()) {
            if let Some(previous) = self.feature.take() {
                out.push(AdapterEvent::Result(ResultEvent::FeatureFinished { feature: previous }));
            }
            let feature = FeatureInfo {
                name: self.features.get(&pickle.uri).cloned().unwrap_or_default(),
                uri: pickle.uri.clone(),
            };
            out.push(AdapterEvent::Result(ResultEvent::FeatureStarted {
                feature: feature.clone(),
            }));
            self.feature = Some(feature);
        }

        let scenario = ScenarioInfo {
            name: pickle.name.clone(),
            uri: pickle.uri.clone(),
            line: pickle.line,
        };
        out.push(AdapterEvent::Result(ResultEvent::ScenarioStarted {
            scenario: scenario.clone(),
        }));
        self.running.insert(
            started.id,
            Attempt {
                scenario,
                case_id: started.test_case_id,
                failed: false,
            },
        );
    }

    fn step_finished(&mut self, finished: TestStepFinished, out: &mut Vec<AdapterEvent>) {
        let Some(attempt) = self.running.get_mut(&finished.test_case_started_id) else {
            return;
        };
        let result = finished.test_step_result;
        let pickle_step = self
            .cases
            .get(&attempt.case_id)
            .and_then(|case| case.steps.get(&finished.test_step_id))
            .cloned()
            .flatten();
        let text = match pickle_step {
            Some(step_id) => self
                .cases
                .get(&attempt.case_id)
                .and_then(|case| self.pickles.get(&case.pickle_id))
                .and_then(|pickle| pickle.steps.get(&step_id))
                .cloned()
                .unwrap_or(step_id),
            // hooks only show up when they break something
            None if result.status.is_failure() => "hook".to_string(),
            None => return,
        };
        if result.status.is_failure() {
            attempt.failed = true;
            self.failures += 1;
        }
        out.push(AdapterEvent::Result(ResultEvent::StepFinished {
            step: StepInfo {
                text,
                status: result.status,
                message: result.message,
                duration_ms: result.duration.as_ref().map(MessageDuration::as_millis),
            },
        }));
    }

    fn case_finished(&mut self, finished: TestCaseFinished, out: &mut Vec<AdapterEvent>) {
        if let Some(attempt) = self.running.remove(&finished.test_case_started_id) {
            out.push(AdapterEvent::Result(ResultEvent::ScenarioFinished {
                scenario: attempt.scenario,
                failed: attempt.failed,
            }));
        }
    }

    fn run_finished(&mut self, finished: TestRunFinished, out: &mut Vec<AdapterEvent>) {
        self.close_feature(out);
        if !finished.success && self.failures == 0 {
            self.failures += 1;
            let message = finished
                .message
                .unwrap_or_else(|| "cucumber reported an unsuccessful run".to_string());
            out.push(AdapterEvent::Result(suite_failure(&self.suite, self.slow_ms, message)));
        }
    }

    fn close_feature(&mut self, out: &mut Vec<AdapterEvent>) {
        if let Some(feature) = self.feature.take() {
            out.push(AdapterEvent::Result(ResultEvent::FeatureFinished { feature }));
        }
    }
}

impl OutputParser for CucumberParser {
    fn line(&mut self, line: &str, _at: Instant) -> Vec<AdapterEvent> {
        let mut out = Vec::new();
        let line = line.trim();
        if !line.starts_with('{') {
            return out;
        }
        let envelope: Envelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(target: "suitepool.worker", error = %err, "unreadable cucumber message");
                return out;
            }
        };

        if let Some(doc) = envelope.gherkin_document {
            self.document(doc);
        }
        if let Some(pickle) = envelope.pickle {
            self.pickle(pickle);
        }
        if let Some(case) = envelope.test_case {
            let steps = case
                .test_steps
                .into_iter()
                .map(|s| (s.id, s.pickle_step_id))
                .collect();
            self.cases.insert(
                case.id,
                CaseEntry {
                    pickle_id: case.pickle_id,
                    steps,
                },
            );
        }
        if let Some(started) = envelope.test_case_started {
            self.case_started(started, &mut out);
        }
        if let Some(finished) = envelope.test_step_finished {
            self.step_finished(finished, &mut out);
        }
        if let Some(finished) = envelope.test_case_finished {
            self.case_finished(finished, &mut out);
        }
        if let Some(finished) = envelope.test_run_finished {
            self.run_finished(finished, &mut out);
        }
        out
    }

    fn finish(&mut self, exit: Option<i32>, _at: Instant) -> Vec<AdapterEvent> {
        let mut out = Vec::new();
        self.close_feature(&mut out);
        if self.failures == 0 && exit != Some(0) {
            self.failures += 1;
            out.push(AdapterEvent::Result(suite_failure(
                &self.suite,
                self.slow_ms,
                exit_description(exit),
            )));
        }
        out
    }
}
