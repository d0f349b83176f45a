use crate::types::CallSite;
use std::io::Write;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub run: u32,
    pub passed: u32,
    pub failed: u32,
}

impl Summary {
    pub fn record(&mut self, passed: bool) -> u32 {
        self.run += 1;
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.run
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

pub trait TestReporter {
    fn report(&mut self, passed: bool, name: &str, site: &CallSite) -> u32;
    fn diag(&mut self, message: &str);
    fn summary(&self) -> Summary;
}

/// TAP-style reporter writing to any byte sink.
pub struct TapReporter<W: Write> {
    out: W,
    summary: Summary,
}

impl<W: Write> TapReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            summary: Summary::default(),
        }
    }

    /// Emits the trailing `1..N` plan line.
    pub fn plan(&mut self) {
        let _ = writeln!(self.out, "1..{}", self.summary.run);
        let _ = self.out.flush();
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TestReporter for TapReporter<W> {
    fn report(&mut self, passed: bool, name: &str, site: &CallSite) -> u32 {
        let number = self.summary.record(passed);
        let status = if passed { "ok" } else { "not ok" };
        let _ = if name.is_empty() {
            writeln!(self.out, "{status} {number}")
        } else {
            writeln!(self.out, "{status} {number} - {name}")
        };
        if !passed {
            let _ = if name.is_empty() {
                writeln!(self.out, "#   Failed test at {} line {}.", site.file, site.line)
            } else {
                writeln!(
                    self.out,
                    "#   Failed test '{name}'\n#   at {} line {}.",
                    site.file, site.line
                )
            };
        }
        let _ = self.out.flush();
        number
    }

    fn diag(&mut self, message: &str) {
        for line in message.lines() {
            let _ = writeln!(self.out, "# {line}");
        }
        let _ = self.out.flush();
    }

    fn summary(&self) -> Summary {
        self.summary
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    Outcome {
        number: u32,
        passed: bool,
        name: String,
        site: CallSite,
    },
    Diag(String),
}

#[derive(Debug, Default, Clone)]
pub struct MemoryReporter {
    events: Vec<ReportEvent>,
    summary: Summary,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ReportEvent] {
        &self.events
    }

    pub fn outcomes(&self) -> Vec<(u32, bool, String)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ReportEvent::Outcome {
                    number,
                    passed,
                    name,
                    ..
                } => Some((*number, *passed, name.clone())),
                ReportEvent::Diag(_) => None,
            })
            .collect()
    }

    pub fn diagnostics(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ReportEvent::Diag(message) => Some(message.clone()),
                ReportEvent::Outcome { .. } => None,
            })
            .collect()
    }
}

impl TestReporter for MemoryReporter {
    fn report(&mut self, passed: bool, name: &str, site: &CallSite) -> u32 {
        let number = self.summary.record(passed);
        self.events.push(ReportEvent::Outcome {
            number,
            passed,
            name: name.to_string(),
            site: site.clone(),
        });
        number
    }

    fn diag(&mut self, message: &str) {
        self.events.push(ReportEvent::Diag(message.to_string()));
    }

    fn summary(&self) -> Summary {
        self.summary
    }
}
