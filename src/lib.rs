//! # docchat
//!
//! Ask questions about a PDF. docchat ingests a document into a Qdrant
//! collection (page extraction, chunking, Azure OpenAI embeddings) and
//! answers questions with a retrieval-augmented chain whose output is
//! streamed token by token.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//!  │  loader  │──▶│  chunk   │──▶│  upload   │──▶│  Qdrant  │
//!  │ PDF page │   │ splitter │   │ batches   │   │collection│
//!  └──────────┘   └──────────┘   └───────────┘   └────┬─────┘
//!                                                     │ MMR
//!                    ┌────────────┐   ┌──────────┐    │
//!   query ──────────▶│   chain    │◀──│ retriever│◀───┘
//!                    │ prompt+LLM │   └──────────┘
//!                    └─────┬──────┘
//!                          ▼ tokens
//!                 ┌────────────────┐
//!                 │ chat  │ server │
//!                 └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat check                 # show settings, list missing credentials
//! docchat ingest ./guide.pdf    # load, split, embed, upload
//! docchat chat                  # terminal Q&A
//! docchat serve                 # HTTP + SSE on 127.0.0.1:8501
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Settings from `docchat.toml` and the environment |
//! | [`error`] | Error type and log-and-rethrow helper |
//! | [`models`] | Documents, metadata, ingestion results |
//! | [`loader`] | PDF pages, parallel over page ranges |
//! | [`chunk`] | Recursive character splitter |
//! | [`embedding`] | Embedding client abstraction |
//! | [`vector_store`] | Collection provisioning, upsert, MMR search |
//! | [`upload`] | Batched upload with one retry |
//! | [`progress`] | Upload progress on stderr |
//! | [`ingest`] | Ingestion orchestration |
//! | [`prompts`] | Cached prompt templates |
//! | [`llm`] | Streaming chat model |
//! | [`tracer`] | Per-run tracing |
//! | [`chain`] | Retrieval-augmented answer chain |
//! | [`chat`] | Terminal front end |
//! | [`server`] | HTTP front end |

pub mod chain;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod models;
pub mod progress;
pub mod prompts;
pub mod server;
pub mod tracer;
pub mod upload;
pub mod vector_store;

pub use error::{RagError, Result};
