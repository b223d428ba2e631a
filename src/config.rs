//! Runtime configuration.
//!
//! A [`Config`] is built once per process from an optional TOML file
//! overlaid by environment variables (`CHUNK_SIZE`, `QDRANT_URL`, ...), then
//! passed by reference into every component. It is never mutated after
//! construction.
//!
//! Tunables fall back to defaults. Credentials have no defaults; use
//! [`Config::ensure_credentials`] to fail fast with every missing variable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RagError, Result};

/// Config file read from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "docchat.toml";

/// Environment variables that must be set (and non-empty) before any
/// remote call is made.
pub const REQUIRED_ENV_VARS: [&str; 10] = [
    "AZURE_OPENAI_API_KEY",
    "AZURE_OPENAI_ENDPOINT",
    "AZURE_OPENAI_API_VERSION",
    "AZURE_OPENAI_DEPLOYMENT_NAME",
    "AZURE_OPENAI_EMBEDDINGS_API_KEY",
    "AZURE_OPENAI_EMBEDDINGS_ENDPOINT",
    "AZURE_OPENAI_EMBEDDINGS_API_VERSION",
    "AZURE_OPENAI_EMBEDDINGS_DEPLOYMENT_NAME",
    "QDRANT_URL",
    "QDRANT_API_KEY",
];

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub chunk_overlap: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_mmr_k")]
    pub mmr_k: usize,
    #[serde(default = "default_mmr_fetch_k")]
    pub mmr_fetch_k: usize,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_pdf_path")]
    pub pdf_path: PathBuf,
    #[serde(default = "default_max_processes")]
    pub max_processes: usize,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
    #[serde(default = "default_system_prompt_file")]
    pub system_prompt_file: String,
    #[serde(default = "default_user_prompt_file")]
    pub user_prompt_file: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_upload_pause_ms")]
    pub upload_pause_ms: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_trace_workspace")]
    pub trace_workspace: String,
    #[serde(default = "default_trace_project")]
    pub trace_project: String,
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default, skip_serializing)]
    pub azure_openai_api_key: Option<String>,
    #[serde(default, skip_serializing)]
    pub azure_openai_endpoint: Option<String>,
    #[serde(default, skip_serializing)]
    pub azure_openai_api_version: Option<String>,
    #[serde(default, skip_serializing)]
    pub azure_openai_deployment_name: Option<String>,
    #[serde(default, skip_serializing)]
    pub azure_openai_embeddings_api_key: Option<String>,
    #[serde(default, skip_serializing)]
    pub azure_openai_embeddings_endpoint: Option<String>,
    #[serde(default, skip_serializing)]
    pub azure_openai_embeddings_api_version: Option<String>,
    #[serde(default, skip_serializing)]
    pub azure_openai_embeddings_deployment_name: Option<String>,
    #[serde(default, skip_serializing)]
    pub qdrant_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub qdrant_api_key: Option<String>,
}

fn default_collection_name() -> String {
    "rag-chatbot".to_string()
}
fn default_chunk_size() -> usize {
    2048
}
fn default_batch_size() -> usize {
    2
}
fn default_mmr_k() -> usize {
    3
}
fn default_mmr_fetch_k() -> usize {
    20
}
fn default_mmr_lambda() -> f32 {
    0.5
}
fn default_embedding_batch_size() -> usize {
    1000
}
fn default_pdf_path() -> PathBuf {
    PathBuf::from("./document.pdf")
}
fn default_max_processes() -> usize {
    8
}
fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}
fn default_system_prompt_file() -> String {
    "system.txt".to_string()
}
fn default_user_prompt_file() -> String {
    "user_query.txt".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_upload_pause_ms() -> u64 {
    100
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_trace_workspace() -> String {
    "default".to_string()
}
fn default_trace_project() -> String {
    "rag-chatbot".to_string()
}
fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}

/// Connection details for one Azure OpenAI deployment.
#[derive(Debug, Clone)]
pub struct AzureDeployment {
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
    pub deployment: String,
}

/// Connection details for the Qdrant REST API.
#[derive(Debug, Clone)]
pub struct QdrantConnection {
    pub url: String,
    pub api_key: String,
}

impl Config {
    /// Load from `path` (required when given) or from `docchat.toml` in the
    /// working directory (optional), then overlay the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some((p.to_path_buf(), true)),
            None => Some((PathBuf::from(DEFAULT_CONFIG_FILE), false)),
        };
        Self::build(file, None)
    }

    /// Build from an explicit environment map instead of the process
    /// environment. No config file is read.
    pub fn from_env_map(vars: HashMap<String, String>) -> Result<Self> {
        Self::build(None, Some(vars))
    }

    fn build(
        file: Option<(PathBuf, bool)>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some((path, required)) = file {
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(required),
            );
        }
        builder = builder.add_source(config::Environment::default().ignore_empty(true).source(env));

        let cfg: Config = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check tunables. Credentials are checked separately so that commands
    /// which never touch the network can still run.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size must be > 0"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(invalid(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be > 0"));
        }
        if self.max_processes == 0 {
            return Err(invalid("max_processes must be > 0"));
        }
        if self.embedding_batch_size == 0 {
            return Err(invalid("embedding_batch_size must be > 0"));
        }
        if self.mmr_k == 0 {
            return Err(invalid("mmr_k must be > 0"));
        }
        if self.mmr_fetch_k < self.mmr_k {
            return Err(invalid(format!(
                "mmr_fetch_k ({}) must be >= mmr_k ({})",
                self.mmr_fetch_k, self.mmr_k
            )));
        }
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err(invalid("mmr_lambda must be in [0.0, 1.0]"));
        }
        Ok(())
    }

    fn credentials(&self) -> [(&'static str, Option<&str>); 10] {
        [
            (REQUIRED_ENV_VARS[0], self.azure_openai_api_key.as_deref()),
            (REQUIRED_ENV_VARS[1], self.azure_openai_endpoint.as_deref()),
            (REQUIRED_ENV_VARS[2], self.azure_openai_api_version.as_deref()),
            (REQUIRED_ENV_VARS[3], self.azure_openai_deployment_name.as_deref()),
            (REQUIRED_ENV_VARS[4], self.azure_openai_embeddings_api_key.as_deref()),
            (REQUIRED_ENV_VARS[5], self.azure_openai_embeddings_endpoint.as_deref()),
            (REQUIRED_ENV_VARS[6], self.azure_openai_embeddings_api_version.as_deref()),
            (REQUIRED_ENV_VARS[7], self.azure_openai_embeddings_deployment_name.as_deref()),
            (REQUIRED_ENV_VARS[8], self.qdrant_url.as_deref()),
            (REQUIRED_ENV_VARS[9], self.qdrant_api_key.as_deref()),
        ]
    }

    /// Names of every required variable that is unset or empty, in
    /// declaration order.
    pub fn missing_credentials(&self) -> Vec<String> {
        self.credentials()
            .iter()
            .filter(|(_, value)| value.map_or(true, |v| v.trim().is_empty()))
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Fail with [`RagError::MissingCredentials`] naming all missing variables.
    pub fn ensure_credentials(&self) -> Result<()> {
        let missing = self.missing_credentials();
        if !missing.is_empty() {
            return Err(RagError::MissingCredentials(missing));
        }
        for endpoint in [&self.azure_openai_endpoint, &self.azure_openai_embeddings_endpoint]
            .into_iter()
            .flatten()
        {
            if !endpoint.starts_with("https://") {
                tracing::warn!(endpoint = %endpoint, "Azure OpenAI endpoint is not an https URL");
            }
        }
        Ok(())
    }

    /// Chat-completion deployment credentials.
    pub fn chat_deployment(&self) -> Result<AzureDeployment> {
        Ok(AzureDeployment {
            endpoint: self.require(1)?,
            api_key: self.require(0)?,
            api_version: self.require(2)?,
            deployment: self.require(3)?,
        })
    }

    /// Embedding deployment credentials.
    pub fn embedding_deployment(&self) -> Result<AzureDeployment> {
        Ok(AzureDeployment {
            endpoint: self.require(5)?,
            api_key: self.require(4)?,
            api_version: self.require(6)?,
            deployment: self.require(7)?,
        })
    }

    pub fn qdrant(&self) -> Result<QdrantConnection> {
        Ok(QdrantConnection {
            url: self.require(8)?,
            api_key: self.require(9)?,
        })
    }

    fn require(&self, slot: usize) -> Result<String> {
        let (name, value) = self.credentials()[slot];
        match value {
            Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
            _ => Err(RagError::MissingCredentials(vec![name.to_string()])),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn upload_pause(&self) -> Duration {
        Duration::from_millis(self.upload_pause_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn invalid(msg: impl Into<String>) -> RagError {
    RagError::Configuration(msg.into())
}
