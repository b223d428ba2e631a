//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for one PDF:
//!
//! ```text
//!  credentials ─▶ load pages ─▶ split ─▶ connect ─▶ probe dimension
//!       ─▶ create/verify collection ─▶ collection handle ─▶ batch upload
//! ```
//!
//! Everything up to the upload fails fast. The upload itself never fails the
//! call; partial failure is reported through [`IngestionResult`].

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::chunk::TextSplitter;
use crate::config::Config;
use crate::embedding::{AzureOpenAIEmbedder, Embedder};
use crate::error::{RagError, Result, ResultExt};
use crate::loader;
use crate::models::IngestionResult;
use crate::progress::UploadProgressReporter;
use crate::upload::{upload_in_batches, UploadPolicy};
use crate::vector_store::qdrant::QdrantStore;
use crate::vector_store::{
    create_or_verify_collection, CollectionHandle, CollectionSpec, CollectionStatus, VectorStore,
};

/// Text embedded once to learn the model's output dimensionality.
pub const DIMENSION_PROBE: &str = "test";

/// The remote clients an ingestion run talks to.
pub struct Clients {
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
}

/// Build the Azure OpenAI embedder and Qdrant client from `config`.
pub fn connect(config: &Config) -> Result<Clients> {
    Ok(Clients {
        embedder: Arc::new(AzureOpenAIEmbedder::from_config(config)?),
        store: Arc::new(QdrantStore::from_config(config)?),
    })
}

/// Ingest the PDF at `path` into the configured Qdrant collection.
pub async fn ingest_documents(
    config: &Config,
    path: &Path,
    progress: &dyn UploadProgressReporter,
) -> Result<IngestionResult> {
    ingest_with(config, path, progress, connect).await
}

/// [`ingest_documents`] with the client constructor supplied by the caller.
///
/// `connect` runs only after credentials are validated and the PDF is
/// loaded and split.
pub async fn ingest_with<F>(
    config: &Config,
    path: &Path,
    progress: &dyn UploadProgressReporter,
    connect: F,
) -> Result<IngestionResult>
where
    F: FnOnce(&Config) -> Result<Clients>,
{
    let started = Instant::now();

    config.ensure_credentials().log_err("configuration check failed")?;

    tracing::info!(path = %path.display(), "loading PDF");
    let pages = loader::load_pdf(path, config)
        .await
        .log_err("failed to load PDF")?;
    tracing::info!(pages = pages.len(), "PDF loaded");

    let splitter = TextSplitter::from_config(config).log_err("invalid splitter settings")?;
    let chunks = splitter.split_documents(&pages);
    tracing::info!(
        chunks = chunks.len(),
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        "pages split"
    );
    let page_count = pages.len();
    drop(pages);

    let clients = connect(config).log_err("failed to build remote clients")?;

    let dimension = clients
        .embedder
        .embed_query(DIMENSION_PROBE)
        .await
        .log_err("failed to probe embedding dimension")?
        .len();
    if dimension == 0 {
        let err = RagError::remote("embeddings", "probe returned an empty vector");
        tracing::error!(error = %err, "failed to probe embedding dimension");
        return Err(err);
    }
    tracing::info!(dimension, "embedding dimension");

    let spec = CollectionSpec::new(config.collection_name.clone(), dimension);
    let status = create_or_verify_collection(clients.store.as_ref(), &spec)
        .await
        .log_err("failed to provision collection")?;

    let handle = CollectionHandle::new(
        clients.store.clone(),
        clients.embedder.clone(),
        config.collection_name.clone(),
    );

    let chunk_count = chunks.len();
    let upload_started = Instant::now();
    let report = upload_in_batches(
        chunks,
        &handle,
        &UploadPolicy::from_config(config),
        progress,
    )
    .await;

    let result = IngestionResult {
        pages: page_count,
        chunks: chunk_count,
        successful: report.successful,
        failed: report.failed,
        batches: report.batches,
        failed_batches: report.failed_batches,
        elapsed: started.elapsed(),
        upload_elapsed: upload_started.elapsed(),
    };

    println!("ingest {}", path.display());
    println!("  pages: {}", result.pages);
    println!("  chunks: {}", result.chunks);
    println!(
        "  collection: {} ({}, dimension {})",
        config.collection_name,
        match status {
            CollectionStatus::Created => "created",
            CollectionStatus::AlreadyExists => "existing",
        },
        dimension
    );
    println!("  uploaded: {}", result.successful);
    println!("  failed: {}", result.failed);
    println!(
        "  batches: {} ({} failed)",
        result.batches, result.failed_batches
    );
    println!("  elapsed: {:.2}s", result.elapsed.as_secs_f64());
    println!("  upload: {:.2}s", result.upload_elapsed.as_secs_f64());
    println!(
        "  per chunk: {:.4}s",
        result.average_per_chunk().as_secs_f64()
    );
    println!("{}", if result.is_success() { "ok" } else { "partial" });

    Ok(result)
}
