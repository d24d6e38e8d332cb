//! Export progress on stderr.
//!
//! `billcast export` walks listing pages and then extracts messages in
//! batches; both phases can take minutes against a real mailbox. Progress
//! goes to **stderr** so the summary on stdout stays parseable.
//!
//! | Mode | Output |
//! |------|--------|
//! | `human` | `export  extracting  40 / 1,234 messages` |
//! | `json` | one `{"event": ..., "phase": ...}` object per line |
//! | `off` | nothing |
//!
//! `auto` picks `human` when stderr is a terminal and `off` otherwise.

use serde::Serialize;
use std::io::Write;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum ExportProgressEvent {
    /// Listing page `page` returned `found` ids; `collected` so far.
    Listing {
        page: u32,
        found: usize,
        collected: usize,
    },
    /// `n` of `total` messages have been through extraction.
    Extracting { n: usize, total: usize },
    /// Finished: `rows` bills kept, `skipped` dropped or failed.
    Done { rows: usize, skipped: usize },
}

impl ExportProgressEvent {
    fn human(&self) -> String {
        match self {
            ExportProgressEvent::Listing {
                page,
                found,
                collected,
            } => format!(
                "listing page {}  +{}  ({} ids)",
                page,
                found,
                group_thousands(*collected)
            ),
            ExportProgressEvent::Extracting { n, total } => format!(
                "extracting  {} / {} messages",
                group_thousands(*n),
                group_thousands(*total)
            ),
            ExportProgressEvent::Done { rows, skipped } => format!(
                "done  {} bills, {} skipped",
                group_thousands(*rows),
                group_thousands(*skipped)
            ),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ExportProgressEvent::Done { .. } => "done",
            _ => "progress",
        }
    }
}

pub trait ExportProgressReporter: Send + Sync {
    fn report(&self, event: ExportProgressEvent);
}

pub struct StderrProgress;

impl ExportProgressReporter for StderrProgress {
    fn report(&self, event: ExportProgressEvent) {
        emit(&format!("export  {}", event.human()));
    }
}

pub struct JsonProgress;

impl ExportProgressReporter for JsonProgress {
    fn report(&self, event: ExportProgressEvent) {
        let mut obj = match serde_json::to_value(&event) {
            Ok(v) => v,
            Err(e) => {
                log::debug!("Unserializable progress event: {}", e);
                return;
            }
        };
        obj["event"] = serde_json::Value::from(event.kind());
        emit(&obj.to_string());
    }
}

pub struct NoProgress;

impl ExportProgressReporter for NoProgress {
    fn report(&self, _event: ExportProgressEvent) {}
}

fn emit(line: &str) {
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "{}", line);
    let _ = err.flush();
}

/// `1234567` → `1,234,567`
fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl std::str::FromStr for ProgressMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "auto" if atty::is(atty::Stream::Stderr) => ProgressMode::Human,
            "auto" | "off" => ProgressMode::Off,
            "human" => ProgressMode::Human,
            "json" => ProgressMode::Json,
            other => anyhow::bail!(
                "Unknown progress mode: '{}'. Must be auto, off, human, or json.",
                other
            ),
        })
    }
}

impl ProgressMode {
    pub fn reporter(self) -> Box<dyn ExportProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
