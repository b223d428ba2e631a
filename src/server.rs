//! HTTP chat server.
//!
//! Serves the retrieval chain over HTTP with answers streamed as
//! server-sent events. One [`RagChain`] is shared by every session.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version and collection) |
//! | `POST` | `/chat` | `{"query": "..."}` → SSE answer stream |
//!
//! # Stream Contract
//!
//! ```text
//! event: token   data: <fragment>      (zero or more)
//! event: done    data: [DONE]          (success)
//! event: error   data: <message>       (failure; ends the stream)
//! ```
//!
//! Request errors (malformed JSON, missing fields, empty query) are JSON with
//! the matching 4xx status:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser UI on another
//! origin can call the API.

use async_stream::stream;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chain::{build_rag_chain, RagChain};
use crate::config::Config;
use crate::error::Result;
use crate::prompts::PromptLoader;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    chain: Arc<RagChain>,
    collection: Arc<str>,
}

/// Starts the chat server on `config.bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> Result<()> {
    let loader = PromptLoader::new(&config.prompts_dir);
    let (system, user) = loader.load_pair(config)?;
    let components = build_rag_chain(&system, &user, config)?;

    let app = router(components.chain, &config.collection_name);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    println!("chat server listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let stats = components.tracer.stats();
    tracing::info!(runs = stats.runs, failed_runs = stats.failed_runs, "server stopped");
    Ok(())
}

/// Build the router around an existing chain.
pub fn router(chain: Arc<RagChain>, collection: &str) -> Router {
    let state = AppState {
        chain,
        collection: collection.into(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/chat", post(handle_chat))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: rejection.status(),
            code: "bad_request".to_string(),
            message: rejection.body_text(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    collection: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        collection: state.collection.to_string(),
    })
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    query: String,
}

/// Handler for `POST /chat`.
///
/// Returns a JSON error for a malformed body or an empty query; otherwise
/// always `200` with an SSE body, since failures during generation can only
/// be reported in-stream.
async fn handle_chat(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, AppError>
{
    let Json(request) = payload?;
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let chain = state.chain.clone();
    let events = stream! {
        let mut tokens = chain.stream(&query);
        while let Some(item) = tokens.next().await {
            match item {
                Ok(token) => yield Ok::<Event, Infallible>(event("token", &token)),
                Err(e) => {
                    yield Ok::<Event, Infallible>(event("error", &e.to_string()));
                    return;
                }
            }
        }
        yield Ok::<Event, Infallible>(event("done", "[DONE]"));
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// SSE data cannot carry carriage returns.
fn event(name: &str, data: &str) -> Event {
    Event::default().event(name).data(data.replace('\r', ""))
}
