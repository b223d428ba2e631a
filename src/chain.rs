//! Retrieval-augmented answer chain.
//!
//! ```text
//!  query ──▶ Retriever (MMR over the collection)
//!        │          │
//!        │          ▼ context = chunk texts joined by blank lines
//!        └──▶ system/user templates ◀── {context}, {query}
//!                   │
//!                   ▼
//!              ChatModel::stream ──▶ TokenStream
//! ```
//!
//! A [`RagChain`] holds only shared, immutable components, so one instance
//! serves any number of concurrent queries behind an `Arc`.

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tracing::Instrument;

use crate::config::Config;
use crate::embedding::{AzureOpenAIEmbedder, Embedder};
use crate::error::Result;
use crate::llm::{AzureChatModel, ChatMessage, ChatModel, TokenStream};
use crate::models::Document;
use crate::tracer::RunTracer;
use crate::vector_store::qdrant::QdrantStore;
use crate::vector_store::{CollectionHandle, VectorStore};

/// Finds the documents relevant to a query.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>>;
}

/// Maximal-marginal-relevance retrieval over a collection.
pub struct MmrRetriever {
    handle: CollectionHandle,
    k: usize,
    fetch_k: usize,
    lambda: f32,
}

impl MmrRetriever {
    pub fn new(handle: CollectionHandle, k: usize, fetch_k: usize, lambda: f32) -> Self {
        Self {
            handle,
            k,
            fetch_k,
            lambda,
        }
    }

    pub fn from_config(handle: CollectionHandle, config: &Config) -> Self {
        Self::new(handle, config.mmr_k, config.mmr_fetch_k, config.mmr_lambda)
    }
}

#[async_trait]
impl Retriever for MmrRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>> {
        self.handle
            .max_marginal_relevance_search(query, self.k, self.fetch_k, self.lambda)
            .await
    }
}

/// Replace `{name}` placeholders from `vars`; `{{` and `}}` produce literal
/// braces. Unknown placeholders are left untouched and substituted values
/// are not rescanned.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            continue;
        }
        if let Some(end) = tail.strip_prefix('{').and_then(|t| t.find('}')) {
            let name = &tail[1..end + 1];
            if let Some((_, value)) = vars.iter().find(|(key, _)| *key == name) {
                out.push_str(value);
                rest = &tail[end + 2..];
                continue;
            }
        }
        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }
    out.push_str(rest);
    out
}

/// Retrieved chunk texts separated by blank lines.
pub fn format_context(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|d| d.content.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct RagChain {
    retriever: Arc<dyn Retriever>,
    model: Arc<dyn ChatModel>,
    system_template: Arc<str>,
    user_template: Arc<str>,
    tracer: Arc<RunTracer>,
}

impl RagChain {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        model: Arc<dyn ChatModel>,
        system_template: impl Into<Arc<str>>,
        user_template: impl Into<Arc<str>>,
        tracer: Arc<RunTracer>,
    ) -> Self {
        Self {
            retriever,
            model,
            system_template: system_template.into(),
            user_template: user_template.into(),
            tracer,
        }
    }

    /// The system and user messages for `query` given retrieved `documents`.
    pub fn messages(&self, query: &str, documents: &[Document]) -> Vec<ChatMessage> {
        build_messages(&self.system_template, &self.user_template, query, documents)
    }

    /// Answer `query`, yielding text fragments as the model produces them.
    ///
    /// Retrieval happens on first poll. An error ends the stream after
    /// being yielded once.
    pub fn stream(&self, query: &str) -> TokenStream {
        let retriever = self.retriever.clone();
        let model = self.model.clone();
        let system = self.system_template.clone();
        let user = self.user_template.clone();
        let tracer = self.tracer.clone();
        let query = query.to_string();

        Box::pin(stream! {
            let mut run = tracer.start(&query);
            let span = run.span().clone();

            let documents = match retriever.retrieve(&query).instrument(span.clone()).await {
                Ok(docs) => docs,
                Err(e) => {
                    run.fail(&e);
                    yield Err(e);
                    return;
                }
            };
            span.in_scope(|| tracing::debug!(documents = documents.len(), "context retrieved"));

            let messages = build_messages(&system, &user, &query, &documents);
            drop(documents);

            let mut tokens = model.stream(messages);
            while let Some(item) = tokens.next().instrument(span.clone()).await {
                match item {
                    Ok(token) => {
                        run.record_token();
                        yield Ok(token);
                    }
                    Err(e) => {
                        run.fail(&e);
                        yield Err(e);
                        return;
                    }
                }
            }
            run.complete();
        })
    }

    /// Answer `query` and return the full text.
    pub async fn invoke(&self, query: &str) -> Result<String> {
        let mut answer = String::new();
        let mut tokens = self.stream(query);
        while let Some(token) = tokens.next().await {
            answer.push_str(&token?);
        }
        Ok(answer)
    }
}

fn build_messages(
    system_template: &str,
    user_template: &str,
    query: &str,
    documents: &[Document],
) -> Vec<ChatMessage> {
    let context = format_context(documents);
    let vars = [("context", context.as_str()), ("query", query)];
    vec![
        ChatMessage::system(render_template(system_template, &vars)),
        ChatMessage::user(render_template(user_template, &vars)),
    ]
}

/// Everything [`build_rag_chain`] wires together.
pub struct RagComponents {
    pub chain: Arc<RagChain>,
    pub handle: CollectionHandle,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub tracer: Arc<RunTracer>,
}

/// Build the production chain: Azure OpenAI embeddings and chat, Qdrant
/// retrieval with MMR, and a run tracer.
///
/// No network traffic happens here; clients connect on first use.
pub fn build_rag_chain(
    system_template: &str,
    user_template: &str,
    config: &Config,
) -> Result<RagComponents> {
    config.ensure_credentials()?;

    let embedder: Arc<dyn Embedder> = Arc::new(AzureOpenAIEmbedder::from_config(config)?);
    let store: Arc<dyn VectorStore> = Arc::new(QdrantStore::from_config(config)?);
    let handle = CollectionHandle::new(
        store.clone(),
        embedder.clone(),
        config.collection_name.clone(),
    );
    let retriever = Arc::new(MmrRetriever::from_config(handle.clone(), config));
    let model = Arc::new(AzureChatModel::from_config(config)?);
    let tracer = Arc::new(RunTracer::from_config(config));

    let chain = Arc::new(RagChain::new(
        retriever,
        model,
        system_template,
        user_template,
        tracer.clone(),
    ));

    Ok(RagComponents {
        chain,
        handle,
        store,
        embedder,
        tracer,
    })
}
