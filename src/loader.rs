//! PDF loading, one [`Document`] per page.
//!
//! Small documents are read in a single blocking task. When the page count
//! exceeds the worker limit, the page index space is partitioned into
//! contiguous ranges that are loaded on the blocking pool and reassembled
//! in dispatch order:
//!
//! ```text
//!  pages 0..20, 8 workers
//!  ┌──────┬──────┬──────┬──────┬──────┬──────┬──────┬──────────┐
//!  │ 0..2 │ 2..4 │ 4..6 │ 6..8 │ 8..10│10..12│12..14│ 14..20   │
//!  └──┬───┴──┬───┴──┬───┴──┬───┴──┬───┴──┬───┴──┬───┴────┬─────┘
//!     └──────┴──────┴──── try_join_all ───┴──────┴────────┘
//!                           concat in range order
//! ```
//!
//! Any worker failure fails the whole load; partial results are never
//! returned.

use futures::future::try_join_all;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{RagError, Result};
use crate::models::Document;

/// A paged text source that can load any sub-range of its pages
/// independently.
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> usize;

    /// Load pages `range` (0-based, end exclusive) in page order.
    fn load_range(&self, range: Range<usize>) -> Result<Vec<Document>>;
}

/// Split `[0, total)` into `workers` contiguous ranges of `total / workers`
/// pages each, the last range absorbing the remainder.
///
/// Returns a single range when `total <= workers`.
pub fn partition_pages(total: usize, workers: usize) -> Vec<Range<usize>> {
    if total == 0 {
        return Vec::new();
    }
    if workers <= 1 || total <= workers {
        return vec![0..total];
    }

    let per_worker = total / workers;
    (0..workers)
        .map(|i| {
            let start = i * per_worker;
            let end = if i + 1 == workers {
                total
            } else {
                (i + 1) * per_worker
            };
            start..end
        })
        .collect()
}

/// Load every page of `source`, fanning out over at most `max_workers`
/// blocking tasks.
pub async fn load_pages(source: Arc<dyn PageSource>, max_workers: usize) -> Result<Vec<Document>> {
    let total = source.page_count();
    let ranges = partition_pages(total, max_workers);
    if ranges.len() > 1 {
        tracing::info!(pages = total, workers = ranges.len(), "loading pages in parallel");
    }

    let tasks = ranges.into_iter().map(|range| {
        let source = source.clone();
        async move {
            tokio::task::spawn_blocking(move || source.load_range(range))
                .await
                .map_err(|e| RagError::Worker(e.to_string()))?
        }
    });

    let parts = try_join_all(tasks).await?;
    Ok(parts.into_iter().flatten().collect())
}

/// Load the PDF at `path` into page documents.
pub async fn load_pdf(path: &Path, config: &Config) -> Result<Vec<Document>> {
    let owned = path.to_path_buf();
    let source = tokio::task::spawn_blocking(move || PdfPageSource::open(&owned))
        .await
        .map_err(|e| RagError::Worker(e.to_string()))??;
    load_pages(Arc::new(source), config.max_processes).await
}

/// PDF pages read with `lopdf`.
///
/// The file is read into memory once; each `load_range` call parses its
/// own copy so ranges can be extracted on separate threads.
pub struct PdfPageSource {
    path: PathBuf,
    bytes: Arc<[u8]>,
    pages: usize,
}

impl PdfPageSource {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RagError::NotFound {
                kind: "PDF",
                path: path.to_path_buf(),
            });
        }
        let bytes: Arc<[u8]> = std::fs::read(path)?.into();
        let doc = parse(path, &bytes)?;
        let pages = doc.get_pages().len();
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            pages,
        })
    }
}

fn parse(path: &Path, bytes: &[u8]) -> Result<lopdf::Document> {
    lopdf::Document::load_mem(bytes).map_err(|e| RagError::Pdf {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

impl PageSource for PdfPageSource {
    fn page_count(&self) -> usize {
        self.pages
    }

    fn load_range(&self, range: Range<usize>) -> Result<Vec<Document>> {
        let doc = parse(&self.path, &self.bytes)?;
        let source = self.path.display().to_string();

        range
            .map(|index| {
                // lopdf numbers pages from 1.
                let text = doc
                    .extract_text(&[index as u32 + 1])
                    .map_err(|e| RagError::Pdf {
                        path: self.path.clone(),
                        message: format!("page {}: {}", index + 1, e),
                    })?;
                Ok(Document::new(text)
                    .with_metadata("source", source.as_str())
                    .with_metadata("page", index)
                    .with_metadata("total_pages", self.pages))
            })
            .collect()
    }
}
