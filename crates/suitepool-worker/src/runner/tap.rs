//! TAP 13 suites.
use std::time::Instant;

use tokio::process::Command;

use suitepool_model::{ResultEvent, SuiteRef, TestFailure, TestInfo, WorkerEnv};

use super::{AdapterEvent, OutputParser, SuiteAdapter, exit_description, shell, suite_failure};

/// Pragma a suite prints to reset the server's mocks.
const CLEAR_MOCKS_PRAGMA: &str = "clearMocks";

/// Runs `SUITE_COMMAND <suite>`, or the suite file itself when no command
/// is configured.
#[derive(Debug, Default)]
pub struct TapAdapter;

impl SuiteAdapter for TapAdapter {
    fn command(&self, env: &WorkerEnv, suite: &SuiteRef) -> Command {
        match &env.suite_command {
            Some(command) => shell(command, [suite.as_str()]),
            None => Command::new(suite.as_str()),
        }
    }

    fn parser(&self, env: &WorkerEnv, suite: &SuiteRef) -> Box<dyn OutputParser> {
        Box::new(TapParser::new(suite.clone(), env.limits.slow_ms, Instant::now()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Skip,
    Todo,
}

#[derive(Debug, PartialEq, Eq)]
struct TestLine<'a> {
    ok: bool,
    number: Option<u32>,
    description: &'a str,
    directive: Option<Directive>,
}

#[derive(Debug)]
struct Held {
    test: TestInfo,
    error: TestFailure,
}

/// Line-by-line TAP reader.
///
/// A `not ok` is held back until the next line so a YAML diagnostics block
/// following it can be attached. Indented lines outside such a block belong
/// to subtests and are skipped; their parent reports the summary result.
#[derive(Debug)]
pub struct TapParser {
    suite: SuiteRef,
    slow_ms: u64,
    last: Instant,
    failures: u32,
    held: Option<Held>,
    yaml: Option<Vec<String>>,
}

impl TapParser {
    pub fn new(suite: SuiteRef, slow_ms: u64, started: Instant) -> Self {
        Self {
            suite,
            slow_ms,
            last: started,
            failures: 0,
            held: None,
            yaml: None,
        }
    }

    fn info(&mut self, test: &TestLine<'_>, at: Instant) -> TestInfo {
        let duration = at.saturating_duration_since(self.last);
        self.last = at;
        let full_title = match (test.description.is_empty(), test.number) {
            (false, _) => test.description.to_string(),
            (true, Some(n)) => format!("test {n}"),
            (true, None) => "unnamed test".to_string(),
        };
        TestInfo {
            full_title,
            duration_ms: Some(duration.as_millis() as u64),
            slow_ms: self.slow_ms,
        }
    }

    fn release(&mut self, out: &mut Vec<AdapterEvent>) {
        if let Some(Held { test, error }) = self.held.take() {
            self.failures += 1;
            out.push(AdapterEvent::Result(ResultEvent::TestFailed { test, error }));
        }
    }

    fn close_yaml(&mut self, out: &mut Vec<AdapterEvent>) {
        if let Some(block) = self.yaml.take()
            && let Some(held) = self.held.as_mut()
        {
            apply_diagnostics(&mut held.error, &block);
        }
        self.release(out);
    }
}

impl OutputParser for TapParser {
    fn line(&mut self, line: &str, at: Instant) -> Vec<AdapterEvent> {
        let mut out = Vec::new();

        if let Some(block) = self.yaml.as_mut() {
            if line.trim() == "..." {
                self.close_yaml(&mut out);
            } else {
                block.push(line.to_string());
            }
            return out;
        }
        if self.held.is_some() && line.starts_with(' ') && line.trim() == "---" {
            self.yaml = Some(Vec::new());
            return out;
        }
        self.release(&mut out);

        if line.starts_with(char::is_whitespace) || line.starts_with("TAP version") {
            return out;
        }
        if let Some(plan) = parse_plan(line) {
            out.push(AdapterEvent::Plan(plan));
            out.push(AdapterEvent::Result(ResultEvent::SuiteStarted {
                title: self.suite.to_string(),
                total: plan,
            }));
        } else if let Some(reason) = line.strip_prefix("Bail out!") {
            self.failures += 1;
            let reason = reason.trim();
            let message = if reason.is_empty() { "bailed out" } else { reason };
            out.push(AdapterEvent::Result(suite_failure(&self.suite, self.slow_ms, message)));
        } else if let Some(comment) = line.strip_prefix('#') {
            if comment.trim() == CLEAR_MOCKS_PRAGMA {
                out.push(AdapterEvent::ClearMocks);
            }
        } else if let Some(test) = parse_test_line(line) {
            let info = self.info(&test, at);
            match (test.ok, test.directive) {
                (_, Some(_)) => out.push(AdapterEvent::Result(ResultEvent::TestPending { test: info })),
                (true, None) => out.push(AdapterEvent::Result(ResultEvent::TestPassed { test: info })),
                (false, None) => {
                    self.held = Some(Held {
                        test: info,
                        error: TestFailure::new("not ok"),
                    })
                }
            }
        }
        out
    }

    fn finish(&mut self, exit: Option<i32>, _at: Instant) -> Vec<AdapterEvent> {
        let mut out = Vec::new();
        self.close_yaml(&mut out);
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

fn parse_plan(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("1..")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn parse_test_line(line: &str) -> Option<TestLine<'_>> {
    let (ok, rest) = if let Some(rest) = line.strip_prefix("not ok") {
        (false, rest)
    } else {
        (true, line.strip_prefix("ok")?)
    };
    if !(rest.is_empty() || rest.starts_with(' ')) {
        return None;
    }
    let rest = rest.trim_start();
    let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let number = rest[..digits_end].parse().ok();
    let rest = rest[digits_end..].trim_start();
    let rest = rest.strip_prefix('-').unwrap_or(rest).trim_start();

    let (description, directive) = match split_directive(rest) {
        Some((description, directive)) => {
            let directive = directive.trim_start().to_ascii_uppercase();
            let directive = if directive.starts_with("SKIP") {
                Some(Directive::Skip)
            } else if directive.starts_with("TODO") {
                Some(Directive::Todo)
            } else {
                None
            };
            (description, directive)
        }
        None => (rest, None),
    };
    Some(TestLine {
        ok,
        number,
        description: description.trim_end(),
        directive,
    })
}

/// Split on the first unescaped `#`.
fn split_directive(s: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '#' if !escaped => return Some((&s[..i], &s[i + 1..])),
            _ => escaped = false,
        }
    }
    None
}

/// Fill `error` from a YAML diagnostics block.
///
/// Only the flat keys test frameworks emit are understood: `message`,
/// `stack`, `found`/`actual` and `wanted`/`expected`, as scalars or
/// block scalars.
fn apply_diagnostics(error: &mut TestFailure, block: &[String]) {
    let base = block
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| indentation(l))
        .min()
        .unwrap_or(0);

    let mut fields: Vec<(String, Vec<String>)> = Vec::new();
    for line in block {
        let top_level = !line.trim().is_empty() && indentation(line) == base;
        match line.trim().split_once(':') {
            Some((key, value)) if top_level => {
                let value = value.trim();
                let lines = match value {
                    "" | "|" | "|-" | ">" | ">-" => Vec::new(),
                    scalar => vec![unquote(scalar).to_string()],
                };
                fields.push((key.trim().to_string(), lines));
            }
            _ => {
                if let Some((_, lines)) = fields.last_mut() {
                    lines.push(line.trim().to_string());
                }
            }
        }
    }

    for (key, lines) in fields {
        let value = lines.join("\n").trim_end().to_string();
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "message" => error.message = value,
            "stack" => error.stack = Some(value),
            "found" | "actual" => error.actual = Some(value),
            "wanted" | "expected" => error.expected = Some(value),
            _ => {}
        }
    }
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn unquote(s: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|s| s.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const RECORDED: &str = "\
TAP version 13
# Subtest: login
    ok 1 - accepts a valid password
    1..1
ok 1 - login
ok 2 - logout # SKIP no session store
not ok 3 - profile renders
  ---
  message: 'expected 200, got 500'
  found: 500
  wanted: 200
  stack: |-
    at Test.<anonymous> (profile.js:12:5)
    at run (tap.js:1:1)
  ...
not ok 4 - password reset # TODO not yet
# clearMocks
not ok 5
1..5
";

    fn feed(parser: &mut TapParser, input: &str, start: Instant) -> Vec<AdapterEvent> {
        let mut out = Vec::new();
        for (i, line) in input.lines().enumerate() {
            out.extend(parser.line(line, start + Duration::from_millis(10 * (i as u64 + 1))));
        }
        out
    }

    fn results(events: &[AdapterEvent]) -> Vec<&ResultEvent> {
        events
            .iter()
            .filter_map(|e| match e {
                AdapterEvent::Result(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn recorded_stream() {
        let start = Instant::now();
        let mut parser = TapParser::new(SuiteRef::new("account.t"), 10_000, start);
        let mut events = feed(&mut parser, RECORDED, start);
        events.extend(parser.finish(Some(1), start + Duration::from_secs(1)));

        assert!(events.contains(&AdapterEvent::Plan(5)));
        assert!(events.contains(&AdapterEvent::ClearMocks));

        let names: Vec<&str> = results(&events).iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec!["testPassed", "testPending", "testFailed", "testPending", "testFailed", "suiteStarted"]
        );

        let ResultEvent::TestFailed { test, error } = results(&events)[2] else {
            panic!("expected a failure");
        };
        assert_eq!(test.full_title, "profile renders");
        assert_eq!(error.message, "expected 200, got 500");
        assert_eq!(error.actual.as_deref(), Some("500"));
        assert_eq!(error.expected.as_deref(), Some("200"));
        assert_eq!(
            error.stack.as_deref(),
            Some("at Test.<anonymous> (profile.js:12:5)\nat run (tap.js:1:1)")
        );

        let ResultEvent::TestFailed { test, .. } = results(&events)[4] else {
            panic!("expected a failure");
        };
        assert_eq!(test.full_title, "test 5");
    }

    #[test]
    fn durations_are_measured_between_results() {
        let start = Instant::now();
        let mut parser = TapParser::new(SuiteRef::new("a.t"), 10_000, start);
        let first = parser.line("ok 1 - a", start + Duration::from_millis(30));
        let second = parser.line("ok 2 - b", start + Duration::from_millis(100));

        let duration = |events: &[AdapterEvent]| match &events[0] {
            AdapterEvent::Result(ResultEvent::TestPassed { test }) => test.duration_ms,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(duration(&first), Some(30));
        assert_eq!(duration(&second), Some(70));
    }

    #[test]
    fn bail_out_is_a_failure() {
        let start = Instant::now();
        let mut parser = TapParser::new(SuiteRef::new("a.t"), 10_000, start);
        let events = parser.line("Bail out! database is down", start);
        let ResultEvent::TestFailed { error, .. } = results(&events)[0] else {
            panic!("expected a failure");
        };
        assert_eq!(error.message, "database is down");
        // already failed, so the exit code adds nothing
        assert!(parser.finish(Some(1), start).is_empty());
    }

    #[test]
    fn nonzero_exit_without_failures_fails_the_suite() {
        let start = Instant::now();
        let mut parser = TapParser::new(SuiteRef::new("a.t"), 10_000, start);
        parser.line("ok 1 - fine", start);

        let events = parser.finish(Some(2), start);
        assert_eq!(results(&events).len(), 1);
        assert!(results(&events)[0].is_failure());
        assert!(parser.finish(Some(0), start).is_empty());
    }

    #[test]
    fn test_lines() {
        assert_eq!(
            parse_test_line("ok 12 - counts \\# signs # skip later"),
            Some(TestLine {
                ok: true,
                number: Some(12),
                description: "counts \\# signs",
                directive: Some(Directive::Skip),
            })
        );
        assert_eq!(parse_test_line("okay then"), None);
        assert_eq!(parse_plan("1..0 # SKIP nothing here"), Some(0));
        assert_eq!(parse_plan("1..x"), None);
    }
}
