use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use docchat::chain::{MmrRetriever, RagChain};
use docchat::config::{Config, REQUIRED_ENV_VARS};
use docchat::embedding::Embedder;
use docchat::ingest::{ingest_with, Clients};
use docchat::llm::{ChatMessage, ChatModel, TokenStream};
use docchat::progress::NoProgress;
use docchat::tracer::RunTracer;
use docchat::vector_store::memory::InMemoryVectorStore;
use docchat::vector_store::{CollectionHandle, CollectionSpec, Point, ScoredPoint, VectorStore};
use docchat::{RagError, Result};
use futures::StreamExt;

fn docchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docchat");
    path
}

/// Write a PDF whose page `i` reads "Page {i} of the leveling guide ...".
fn write_pdf(path: &Path, pages: usize) {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for i in 0..pages {
        let text = format!(
            "Page {} of the leveling guide. Engineers at this level own scope {}.",
            i, i
        );
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => pages as i64,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

/// Every credential set to a placeholder, plus `overrides`.
fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = REQUIRED_ENV_VARS
        .iter()
        .map(|name| (name.to_string(), format!("https://{}.invalid", name.to_lowercase())))
        .collect();
    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }
    Config::from_env_map(vars).unwrap()
}

/// Deterministic bag-of-bytes embedding; similar texts get similar vectors.
struct HashEmbedder {
    dims: usize,
    calls: AtomicUsize,
}

impl HashEmbedder {
    fn new(dims: usize) -> Self {
        Self {
            dims,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; self.dims];
                for (i, b) in t.bytes().enumerate() {
                    v[(b as usize + i) % self.dims] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Wraps the in-memory store and fails the upserts whose call numbers
/// (1-based) are listed.
struct FlakyStore {
    inner: InMemoryVectorStore,
    fail_calls: Vec<usize>,
    upserts: AtomicUsize,
}

#[async_trait]
impl VectorStore for FlakyStore {
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        self.inner.create_collection(spec).await
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        let call = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_calls.contains(&call) {
            return Err(RagError::Remote {
                service: "qdrant",
                message: "HTTP 503".into(),
            });
        }
        self.inner.upsert(collection, points).await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        self.inner.search(collection, vector, limit).await
    }
}

fn e2e_config() -> Config {
    test_config(&[
        ("CHUNK_SIZE", "2048"),
        ("CHUNK_OVERLAP", "0"),
        ("BATCH_SIZE", "2"),
        ("MAX_PROCESSES", "8"),
        ("UPLOAD_PAUSE_MS", "0"),
        ("RETRY_BACKOFF_MS", "1"),
        ("COLLECTION_NAME", "guide"),
    ])
}

#[tokio::test]
async fn test_ingest_twenty_page_pdf_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let pdf = tmp.path().join("guide.pdf");
    write_pdf(&pdf, 20);

    let cfg = e2e_config();
    let store = Arc::new(InMemoryVectorStore::new());
    let embedder = Arc::new(HashEmbedder::new(32));

    let result = ingest_with(&cfg, &pdf, &NoProgress, |_| {
        Ok(Clients {
            embedder: embedder.clone(),
            store: store.clone(),
        })
    })
    .await
    .unwrap();

    assert_eq!(result.pages, 20);
    assert!(result.chunks >= 20);
    assert_eq!(result.batches, result.chunks.div_ceil(2));
    assert_eq!(result.successful, result.chunks);
    assert_eq!(result.failed, 0);
    assert!(result.is_success());
    assert!(result.upload_elapsed <= result.elapsed);

    assert_eq!(store.point_count("guide"), result.chunks);
    let spec = store.spec("guide").unwrap();
    assert_eq!(spec.dimension, 32);
    assert!(spec.binary_quantization);
    // One probe call plus one call per batch.
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1 + result.batches);
}

#[tokio::test]
async fn test_reingest_reuses_collection_without_duplicates() {
    let tmp = TempDir::new().unwrap();
    let pdf = tmp.path().join("guide.pdf");
    write_pdf(&pdf, 5);

    let cfg = e2e_config();
    let store = Arc::new(InMemoryVectorStore::new());
    let embedder = Arc::new(HashEmbedder::new(16));
    let clients = || Clients {
        embedder: embedder.clone(),
        store: store.clone(),
    };

    let first = ingest_with(&cfg, &pdf, &NoProgress, |_| Ok(clients()))
        .await
        .unwrap();
    let second = ingest_with(&cfg, &pdf, &NoProgress, |_| Ok(clients()))
        .await
        .unwrap();

    assert!(first.is_success() && second.is_success());
    assert_eq!(store.point_count("guide"), first.chunks);
}

#[tokio::test]
async fn test_failed_batch_is_counted_and_later_batches_run() {
    let tmp = TempDir::new().unwrap();
    let pdf = tmp.path().join("guide.pdf");
    write_pdf(&pdf, 6);

    let cfg = e2e_config();
    // Upserts 2 and 3 are the first attempt and the retry of batch 2.
    let store = Arc::new(FlakyStore {
        inner: InMemoryVectorStore::new(),
        fail_calls: vec![2, 3],
        upserts: AtomicUsize::new(0),
    });
    let embedder = Arc::new(HashEmbedder::new(16));

    let result = ingest_with(&cfg, &pdf, &NoProgress, |_| {
        Ok(Clients {
            embedder: embedder.clone(),
            store: store.clone(),
        })
    })
    .await
    .unwrap();

    assert_eq!(result.chunks, 6);
    assert_eq!(result.batches, 3);
    assert_eq!(result.failed_batches, 1);
    assert_eq!(result.failed, 2);
    assert_eq!(result.successful, 4);
    assert!(!result.is_success());
    assert_eq!(store.inner.point_count("guide"), 4);
}

#[tokio::test]
async fn test_retry_success_counts_as_success() {
    let tmp = TempDir::new().unwrap();
    let pdf = tmp.path().join("guide.pdf");
    write_pdf(&pdf, 4);

    let cfg = e2e_config();
    let store = Arc::new(FlakyStore {
        inner: InMemoryVectorStore::new(),
        fail_calls: vec![1],
        upserts: AtomicUsize::new(0),
    });
    let embedder = Arc::new(HashEmbedder::new(16));

    let result = ingest_with(&cfg, &pdf, &NoProgress, |_| {
        Ok(Clients {
            embedder: embedder.clone(),
            store: store.clone(),
        })
    })
    .await
    .unwrap();

    assert_eq!(result.successful, 4);
    assert_eq!(result.failed, 0);
    assert!(result.is_success());
}

#[tokio::test]
async fn test_missing_credentials_fail_before_any_work() {
    let cfg = Config::from_env_map(HashMap::new()).unwrap();
    let connected = AtomicBool::new(false);

    let err = ingest_with(
        &cfg,
        Path::new("/no/such/file.pdf"),
        &NoProgress,
        |_| {
            connected.store(true, Ordering::SeqCst);
            Err(RagError::Configuration("should not connect".into()))
        },
    )
    .await
    .unwrap_err();

    match err {
        RagError::MissingCredentials(names) => {
            assert_eq!(names.len(), REQUIRED_ENV_VARS.len());
            for var in REQUIRED_ENV_VARS {
                assert!(names.iter().any(|n| n == var), "{} not reported", var);
            }
        }
        other => panic!("expected MissingCredentials, got {:?}", other),
    }
    assert!(!connected.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_missing_pdf_is_not_found() {
    let cfg = e2e_config();
    let err = ingest_with(&cfg, Path::new("/no/such/file.pdf"), &NoProgress, |_| {
        Err(RagError::Configuration("should not connect".into()))
    })
    .await
    .unwrap_err();
    assert!(matches!(err, RagError::NotFound { kind: "PDF", .. }));
}

/// Echoes the system prompt so the test can see the retrieved context.
struct ContextEcho {
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ChatModel for ContextEcho {
    fn stream(&self, messages: Vec<ChatMessage>) -> TokenStream {
        let system = messages[0].content.clone();
        self.seen.lock().unwrap().push(messages);
        futures::stream::iter(vec![Ok(system)]).boxed()
    }
}

#[tokio::test]
async fn test_chain_answers_from_ingested_chunks() {
    let tmp = TempDir::new().unwrap();
    let pdf = tmp.path().join("guide.pdf");
    write_pdf(&pdf, 10);

    let cfg = e2e_config();
    let store = Arc::new(InMemoryVectorStore::new());
    let embedder = Arc::new(HashEmbedder::new(64));
    ingest_with(&cfg, &pdf, &NoProgress, |_| {
        Ok(Clients {
            embedder: embedder.clone(),
            store: store.clone(),
        })
    })
    .await
    .unwrap();

    let handle = CollectionHandle::new(store.clone(), embedder.clone(), "guide");
    let retriever = Arc::new(MmrRetriever::new(handle, 3, 8, 0.5));
    let model = Arc::new(ContextEcho {
        seen: Mutex::new(Vec::new()),
    });
    let chain = RagChain::new(
        retriever,
        model.clone(),
        "Context:\n{context}",
        "{query}",
        Arc::new(RunTracer::new("tests", "docchat")),
    );

    let answer = chain.invoke("What scope does level 4 own?").await.unwrap();
    assert!(answer.starts_with("Context:\n"));
    assert_eq!(answer.matches("of the leveling guide").count(), 3);

    let seen = model.seen.lock().unwrap();
    assert_eq!(seen[0][1].content, "What scope does level 4 own?");
}

// ============ Binary ============

fn run_docchat(cwd: &Path, args: &[&str]) -> (String, String, Option<i32>) {
    let binary = docchat_binary();
    let output = Command::new(&binary)
        .current_dir(cwd)
        .env_clear()
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code())
}

#[test]
fn test_binary_ingest_without_credentials_exits_one() {
    let tmp = TempDir::new().unwrap();
    let (stdout, stderr, code) = run_docchat(tmp.path(), &["ingest", "missing.pdf"]);

    assert_eq!(code, Some(1), "stdout={}, stderr={}", stdout, stderr);
    for var in REQUIRED_ENV_VARS {
        assert!(stderr.contains(var), "{} missing from stderr: {}", var, stderr);
    }
    // Failed before touching the file.
    assert!(!stderr.contains("not found"));
}

#[test]
fn test_binary_check_lists_missing_credentials() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _stderr, code) = run_docchat(tmp.path(), &["check"]);

    assert_eq!(code, Some(1));
    assert!(stdout.contains("chunk_size = 2048"));
    assert!(stdout.contains("credentials: missing"));
    assert!(stdout.contains("QDRANT_API_KEY"));
}

#[test]
fn test_binary_reads_config_file() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("custom.toml");
    std::fs::write(
        &config_path,
        "collection_name = \"handbook\"\nchunk_size = 512\nchunk_overlap = 32\n",
    )
    .unwrap();

    let (stdout, stderr, _) = run_docchat(
        tmp.path(),
        &["--config", config_path.to_str().unwrap(), "check"],
    );
    assert!(stdout.contains("collection_name = \"handbook\""), "stderr={}", stderr);
    assert!(stdout.contains("chunk_size = 512"));
}
