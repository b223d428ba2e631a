//! Streaming chat-completion client.
//!
//! [`ChatModel::stream`] returns a lazy [`TokenStream`]: no request is made
//! until the stream is first polled, and dropping it closes the connection.
//! The Azure OpenAI implementation reads server-sent events and yields each
//! `choices[0].delta.content` fragment as it arrives.
//!
//! The request timeout bounds connecting, waiting for the response head and
//! each gap between body chunks. It does not cap the length of an answer.

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;

use crate::config::{AzureDeployment, Config};
use crate::error::{RagError, Result};

const SERVICE: &str = "chat model";

/// Text fragments of a streamed completion, in order.
pub type TokenStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

pub trait ChatModel: Send + Sync {
    /// Start a completion for `messages`.
    fn stream(&self, messages: Vec<ChatMessage>) -> TokenStream;
}

/// Client for an Azure OpenAI chat deployment.
pub struct AzureChatModel {
    client: reqwest::Client,
    url: String,
    api_key: String,
    idle_timeout: Duration,
}

impl AzureChatModel {
    pub fn new(deployment: AzureDeployment, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| RagError::remote(SERVICE, e))?;
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            deployment.endpoint.trim_end_matches('/'),
            deployment.deployment,
            deployment.api_version
        );
        Ok(Self {
            client,
            url,
            api_key: deployment.api_key,
            idle_timeout: timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.chat_deployment()?, config.request_timeout())
    }
}

impl ChatModel for AzureChatModel {
    fn stream(&self, messages: Vec<ChatMessage>) -> TokenStream {
        let request = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&serde_json::json!({
                "messages": messages,
                "stream": true,
            }));
        let idle = self.idle_timeout;

        Box::pin(stream! {
            let response = match tokio::time::timeout(idle, request.send()).await {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => {
                    yield Err(RagError::remote(SERVICE, e));
                    return;
                }
                Err(_) => {
                    yield Err(timed_out(idle));
                    return;
                }
            };
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                yield Err(RagError::remote(SERVICE, format!("HTTP {}: {}", status, body)));
                return;
            }

            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            loop {
                let chunk = match tokio::time::timeout(idle, body.next()).await {
                    Ok(Some(Ok(c))) => c,
                    Ok(Some(Err(e))) => {
                        yield Err(RagError::remote(SERVICE, e));
                        return;
                    }
                    Ok(None) => return,
                    Err(_) => {
                        yield Err(timed_out(idle));
                        return;
                    }
                };
                for data in decoder.push(&chunk) {
                    match parse_event(&data) {
                        Ok(Delta::Done) => return,
                        Ok(Delta::Token(text)) => yield Ok(text),
                        Ok(Delta::Empty) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
        })
    }
}

fn timed_out(idle: Duration) -> RagError {
    RagError::remote(SERVICE, format!("no data for {:.1}s", idle.as_secs_f64()))
}

/// Splits a byte stream into SSE `data:` payloads.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                out.push(data.trim_start().to_string());
            }
        }
        out
    }
}

#[derive(Debug, PartialEq)]
enum Delta {
    Token(String),
    Empty,
    Done,
}

fn parse_event(data: &str) -> Result<Delta> {
    if data == "[DONE]" {
        return Ok(Delta::Done);
    }
    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| RagError::remote(SERVICE, format!("invalid stream event: {}", e)))?;
    if let Some(error) = json.get("error") {
        return Err(RagError::remote(SERVICE, error.to_string()));
    }
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or_default();
    if content.is_empty() {
        Ok(Delta::Empty)
    } else {
        Ok(Delta::Token(content.to_string()))
    }
}
