//! Progress reporting for `add` and `rebuild`.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts.
//! The rebuild protocol is visible in the events: `Resetting`, then one
//! `Replaying` per manifest entry, then `Done`.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// `add`: processing file `n` of `total`.
    Adding { file: String, n: u64, total: u64 },
    /// `rebuild`: the index is being cleared.
    Resetting,
    /// `rebuild`: re-enriching manifest entry `n` of `total`.
    Replaying { file: String, n: u64, total: u64 },
    /// Run finished with `chunks` chunks written across `files` files.
    Done { files: u64, chunks: u64 },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress: "add  3 / 1,204  interview-07.docx".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Adding { file, n, total } => format!(
                "add  {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                file
            ),
            ProgressEvent::Resetting => "rebuild  resetting index...\n".to_string(),
            ProgressEvent::Replaying { file, n, total } => format!(
                "rebuild  {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                file
            ),
            ProgressEvent::Done { files, chunks } => format!(
                "done  {} files, {} chunks\n",
                format_number(*files),
                format_number(*chunks)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Adding { file, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "adding",
                "file": file,
                "n": n,
                "total": total
            }),
            ProgressEvent::Resetting => serde_json::json!({
                "event": "progress",
                "phase": "resetting"
            }),
            ProgressEvent::Replaying { file, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "replaying",
                "file": file,
                "n": n,
                "total": total
            }),
            ProgressEvent::Done { files, chunks } => serde_json::json!({
                "event": "done",
                "files": files,
                "chunks": chunks
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode selected with `--progress`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
