use std::{io, io::Write, time::Duration};

use suitepool_model::{ResultEvent, Speed};

use super::{FailureRecord, RunStats};

/// Glyphs per output line.
pub const LINE_WIDTH: usize = 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Green,
    Yellow,
    Red,
    Cyan,
    Gray,
}

impl Color {
    fn code(self) -> &'static str {
        match self {
            Color::Green => "32",
            Color::Yellow => "33",
            Color::Red => "31",
            Color::Cyan => "36",
            Color::Gray => "90",
        }
    }
}

/// Compact progress output: one glyph per finished test or scenario.
pub struct DotFormatter {
    out: Box<dyn Write + Send>,
    colors: bool,
    column: usize,
}

impl DotFormatter {
    pub fn new(out: Box<dyn Write + Send>, colors: bool) -> Self {
        Self {
            out,
            colors,
            column: 0,
        }
    }

    pub fn set_colors(&mut self, colors: bool) {
        self.colors = colors;
    }

    fn paint(&self, color: Color, text: &str) -> String {
        if self.colors {
            format!("\x1b[{}m{text}\x1b[0m", color.code())
        } else {
            text.to_string()
        }
    }

    /// Print the glyph of `event`, if it has one.
    pub fn event(&mut self, event: &ResultEvent) -> io::Result<()> {
        let glyph = match event {
            ResultEvent::TestPassed { test } if test.speed() == Speed::Slow => {
                self.paint(Color::Yellow, ".")
            }
            ResultEvent::TestPassed { .. } => self.paint(Color::Gray, "."),
            ResultEvent::TestFailed { .. } => self.paint(Color::Red, "!"),
            ResultEvent::TestPending { .. } => self.paint(Color::Cyan, ","),
            ResultEvent::ScenarioFinished { failed: true, .. } => self.paint(Color::Red, "F"),
            ResultEvent::ScenarioFinished { failed: false, .. } => self.paint(Color::Green, "."),
            _ => return Ok(()),
        };
        self.glyph(&glyph)
    }

    /// A worker died without reporting a result.
    pub fn worker_failure(&mut self) -> io::Result<()> {
        let glyph = self.paint(Color::Red, "X");
        self.glyph(&glyph)
    }

    fn glyph(&mut self, glyph: &str) -> io::Result<()> {
        if self.column == 0 {
            self.out.write_all(b"  ")?;
        }
        self.out.write_all(glyph.as_bytes())?;
        self.column += 1;
        if self.column == LINE_WIDTH {
            self.out.write_all(b"\n")?;
            self.column = 0;
        }
        self.out.flush()
    }

    /// Totals and the list of failures.
    pub fn epilogue(
        &mut self,
        stats: &RunStats,
        failures: &[FailureRecord],
        elapsed: Duration,
    ) -> io::Result<()> {
        let mut text = String::from("\n\n");

        if stats.tests > 0 || stats.scenarios() == 0 {
            let passing = format!("{} passing", stats.passes);
            text += &format!(
                "  {} {}\n",
                self.paint(Color::Green, &passing),
                self.paint(Color::Gray, &format!("({})", human(elapsed)))
            );
            if stats.pending > 0 {
                text += &format!("  {}\n", self.paint(Color::Cyan, &format!("{} pending", stats.pending)));
            }
        }
        if stats.scenarios() > 0 {
            text += &format!(
                "  {} scenarios ({} failed, {} passed)\n",
                stats.scenarios(),
                stats.scenarios_failed,
                stats.scenarios_passed
            );
            let steps: Vec<String> = stats
                .steps
                .breakdown()
                .into_iter()
                .map(|(label, n)| format!("{n} {label}"))
                .collect();
            text += &format!("  {} steps ({})\n", stats.steps.total(), steps.join(", "));
        }
        if stats.has_failures() {
            let failing = format!("{} failing", stats.failure_count());
            text += &format!("  {}\n", self.paint(Color::Red, &failing));
        }

        for (n, failure) in failures.iter().enumerate() {
            text += &format!("\n  {}) {}\n", n + 1, failure.suite);
            text += &format!("     {}:\n", failure.title);
            let message = self.paint(Color::Red, &failure.failure.message);
            text += &format!("     {message}\n");
            if let (Some(expected), Some(actual)) = (&failure.failure.expected, &failure.failure.actual) {
                text += &format!("     expected: {expected}\n     actual:   {actual}\n");
            }
            if let Some(stack) = &failure.failure.stack {
                for line in stack.lines() {
                    text += &format!("     {}\n", self.paint(Color::Gray, line));
                }
            }
        }
        text.push('\n');

        self.out.write_all(text.as_bytes())?;
        self.column = 0;
        self.out.flush()
    }
}

fn human(elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{}s", ms / 1_000)
    } else {
        format!("{}m", ms / 60_000)
    }
}
