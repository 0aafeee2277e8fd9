//! Reindex progress reporting.
//!
//! Reports observable progress during `dh index` so users see what is being
//! scanned, how much is left, and when the snapshot is swapped in.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a reindex run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReindexProgressEvent {
    /// Walking the configured roots. Total unknown.
    Scanning,
    /// `n` candidate files fingerprinted and parsed out of `total`.
    Parsing { n: u64, total: u64 },
    /// Writing the change set in one transaction.
    Committing { changed_paths: u64, removed_paths: u64 },
}

/// Reports reindex progress. Implementations write to stderr (human or JSON).
pub trait ReindexProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the indexer, possibly off the async runtime.
    fn report(&self, event: ReindexProgressEvent);
}

/// Human-friendly progress on stderr: "index  parsing  1,234 / 5,000 files".
pub struct StderrProgress;

impl ReindexProgressReporter for StderrProgress {
    fn report(&self, event: ReindexProgressEvent) {
        let line = match &event {
            ReindexProgressEvent::Scanning => "index  scanning...\n".to_string(),
            ReindexProgressEvent::Parsing { n, total } => format!(
                "index  parsing  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            ReindexProgressEvent::Committing {
                changed_paths,
                removed_paths,
            } => format!(
                "index  committing  {} changed, {} removed\n",
                format_number(*changed_paths),
                format_number(*removed_paths)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ReindexProgressReporter for JsonProgress {
    fn report(&self, event: ReindexProgressEvent) {
        let obj = match &event {
            ReindexProgressEvent::Scanning => serde_json::json!({
                "event": "progress",
                "phase": "scanning"
            }),
            ReindexProgressEvent::Parsing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "parsing",
                "n": n,
                "total": total
            }),
            ReindexProgressEvent::Committing {
                changed_paths,
                removed_paths,
            } => serde_json::json!({
                "event": "progress",
                "phase": "committing",
                "changed_paths": changed_paths,
                "removed_paths": removed_paths
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ReindexProgressReporter for NoProgress {
    fn report(&self, _event: ReindexProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> std::sync::Arc<dyn ReindexProgressReporter> {
        match self {
            ProgressMode::Off => std::sync::Arc::new(NoProgress),
            ProgressMode::Human => std::sync::Arc::new(StderrProgress),
            ProgressMode::Json => std::sync::Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
