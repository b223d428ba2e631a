//! Upload progress reporting.
//!
//! Reports observable progress during `docchat ingest` so users see how many
//! batches have been stored, which ones needed a retry, and which were given
//! up on. Progress is emitted on **stderr** so stdout stays reserved for the
//! final summary.

use std::io::Write;

/// A single progress event for the batch uploader.
#[derive(Clone, Debug, PartialEq)]
pub enum UploadProgressEvent {
    /// Batch `batch` (1-based) of `batches` was stored; `stored` of `total`
    /// chunks are now in the collection.
    Stored {
        batch: usize,
        batches: usize,
        stored: usize,
        total: usize,
    },
    /// The first attempt for a batch failed; it will be retried once.
    Retrying {
        batch: usize,
        batches: usize,
        error: String,
    },
    /// The retry failed as well; the batch's chunks are counted as failed.
    Failed {
        batch: usize,
        batches: usize,
        error: String,
    },
}

/// Reports upload progress. Implementations write to stderr (human or JSON).
pub trait UploadProgressReporter: Send + Sync {
    fn report(&self, event: UploadProgressEvent);
}

/// Human-friendly progress on stderr: "upload  batch 3 / 40  6 / 80 chunks".
pub struct StderrProgress;

impl UploadProgressReporter for StderrProgress {
    fn report(&self, event: UploadProgressEvent) {
        let line = match &event {
            UploadProgressEvent::Stored {
                batch,
                batches,
                stored,
                total,
            } => format!(
                "upload  batch {} / {}  {} / {} chunks\n",
                format_number(*batch as u64),
                format_number(*batches as u64),
                format_number(*stored as u64),
                format_number(*total as u64)
            ),
            UploadProgressEvent::Retrying {
                batch,
                batches,
                error,
            } => format!("upload  batch {} / {}  retrying: {}\n", batch, batches, error),
            UploadProgressEvent::Failed {
                batch,
                batches,
                error,
            } => format!("upload  batch {} / {}  FAILED: {}\n", batch, batches, error),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl UploadProgressReporter for JsonProgress {
    fn report(&self, event: UploadProgressEvent) {
        let obj = match &event {
            UploadProgressEvent::Stored {
                batch,
                batches,
                stored,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "stored",
                "batch": batch,
                "batches": batches,
                "n": stored,
                "total": total
            }),
            UploadProgressEvent::Retrying {
                batch,
                batches,
                error,
            } => serde_json::json!({
                "event": "progress",
                "phase": "retrying",
                "batch": batch,
                "batches": batches,
                "error": error
            }),
            UploadProgressEvent::Failed {
                batch,
                batches,
                error,
            } => serde_json::json!({
                "event": "progress",
                "phase": "failed",
                "batch": batch,
                "batches": batches,
                "error": error
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl UploadProgressReporter for NoProgress {
    fn report(&self, _event: UploadProgressEvent) {}
}

fn format_number(n: u64) -> String {
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

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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

    pub fn reporter(&self) -> Box<dyn UploadProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
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
