//! Last-resort handling of worker failures.
//!
//! A panic anywhere in the worker, or an error escaping the role runtime,
//! is logged with the script, the suite and the last result event that
//! went upward, and the process ends with status 1.
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::error;

use suitepool_model::{ResultEvent, SuiteRef, WorkerRole};

#[derive(Debug, Clone)]
pub struct CrashContext {
    role: WorkerRole,
    suite: Option<SuiteRef>,
    last_event: Arc<Mutex<Option<String>>>,
}

impl CrashContext {
    pub fn new(role: WorkerRole, suite: Option<SuiteRef>) -> Self {
        Self {
            role,
            suite,
            last_event: Arc::default(),
        }
    }

    pub fn record_event(&self, event: &ResultEvent) {
        let mut last = self.last_event.lock().unwrap_or_else(PoisonError::into_inner);
        *last = Some(describe(event));
    }

    pub fn last_event(&self) -> Option<String> {
        self.last_event
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Log `err` with the worker context; returns the exit status to use.
    pub fn report(&self, err: &dyn fmt::Display) -> i32 {
        error!(
            target: "suitepool.worker",
            script = self.role.script(),
            suite = self.suite.as_ref().map(SuiteRef::as_str).unwrap_or("-"),
            last_event = self.last_event().as_deref().unwrap_or("-"),
            "worker failed: {err}"
        );
        1
    }
}

/// Route panics through [`CrashContext::report`] and exit 1.
pub fn install_panic_hook(ctx: CrashContext) {
    std::panic::set_hook(Box::new(move |info| {
        let code = ctx.report(&format_args!("uncaught panic: {info}"));
        std::process::exit(code);
    }));
}

fn describe(event: &ResultEvent) -> String {
    let subject = match event {
        ResultEvent::SuiteStarted { title, .. } => title.as_str(),
        ResultEvent::TestPassed { test }
        | ResultEvent::TestFailed { test, .. }
        | ResultEvent::TestPending { test } => test.full_title.as_str(),
        ResultEvent::FeatureStarted { feature } | ResultEvent::FeatureFinished { feature } => {
            feature.name.as_str()
        }
        ResultEvent::ScenarioStarted { scenario }
        | ResultEvent::ScenarioFinished { scenario, .. } => scenario.name.as_str(),
        ResultEvent::StepFinished { step } => step.text.as_str(),
    };
    format!("{} {subject}", event.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use suitepool_model::TestInfo;

    #[test]
    fn remembers_the_last_event() {
        let ctx = CrashContext::new(WorkerRole::Runner, Some(SuiteRef::new("a.t")));
        assert_eq!(ctx.last_event(), None);

        let clone = ctx.clone();
        clone.record_event(&ResultEvent::TestPassed {
            test: TestInfo {
                full_title: "logs in".into(),
                duration_ms: None,
                slow_ms: 10,
            },
        });
        assert_eq!(ctx.last_event().as_deref(), Some("testPassed logs in"));
        assert_eq!(ctx.report(&"boom"), 1);
    }
}
