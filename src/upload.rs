//! Sequential batch upload with a single retry per batch.
//!
//! ```text
//!  chunks ─▶ [b1][b2][b3]...      one batch at a time, in order
//!             │
//!             ├─ ok ─────────────▶ successful += len
//!             └─ err ─ backoff ─ retry ─┬─ ok ─▶ successful += len
//!                                       └─ err ─▶ failed += len, continue
//!             pause between batches
//! ```
//!
//! Upload never aborts the run: every outcome ends up in the
//! [`UploadReport`].

use async_trait::async_trait;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::models::Document;
use crate::progress::{UploadProgressEvent, UploadProgressReporter};

/// Destination for uploaded chunks, typically a
/// [`CollectionHandle`](crate::vector_store::CollectionHandle).
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Store `documents` as one unit; an error means none should be
    /// considered stored.
    async fn add_documents(&self, documents: &[Document]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub batch_size: usize,
    /// Delay between consecutive batches.
    pub pause: Duration,
    /// Delay before the single retry of a failed batch.
    pub retry_backoff: Duration,
}

impl UploadPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            pause: config.upload_pause(),
            retry_backoff: config.retry_backoff(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub successful: usize,
    pub failed: usize,
    pub batches: usize,
    pub failed_batches: usize,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.failed_batches == 0
    }
}

/// Upload `documents` to `sink` in order, `policy.batch_size` at a time.
pub async fn upload_in_batches(
    documents: Vec<Document>,
    sink: &dyn DocumentSink,
    policy: &UploadPolicy,
    progress: &dyn UploadProgressReporter,
) -> UploadReport {
    let total = documents.len();
    let batch_size = policy.batch_size.max(1);
    let batches = total.div_ceil(batch_size);
    let mut report = UploadReport::default();
    let mut remaining = documents.into_iter();

    for number in 1..=batches {
        let batch: Vec<Document> = remaining.by_ref().take(batch_size).collect();
        if number > 1 && !policy.pause.is_zero() {
            tokio::time::sleep(policy.pause).await;
        }
        report.batches += 1;

        let first = sink.add_documents(&batch).await;
        let outcome = match first {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(batch = number, error = %e, "batch upload failed, retrying once");
                progress.report(UploadProgressEvent::Retrying {
                    batch: number,
                    batches,
                    error: e.to_string(),
                });
                tokio::time::sleep(policy.retry_backoff).await;
                sink.add_documents(&batch).await
            }
        };

        match outcome {
            Ok(()) => {
                report.successful += batch.len();
                progress.report(UploadProgressEvent::Stored {
                    batch: number,
                    batches,
                    stored: report.successful,
                    total,
                });
            }
            Err(e) => {
                tracing::error!(batch = number, chunks = batch.len(), error = %e, "batch upload failed after retry");
                report.failed += batch.len();
                report.failed_batches += 1;
                progress.report(UploadProgressEvent::Failed {
                    batch: number,
                    batches,
                    error: e.to_string(),
                });
            }
        }
        drop(batch);
    }

    tracing::info!(
        successful = report.successful,
        failed = report.failed,
        batches = report.batches,
        "upload finished"
    );
    report
}
