//! Error types shared by every pipeline component.
//!
//! Library functions return [`RagError`] so callers can tell fatal setup
//! problems (configuration, missing files) apart from remote-service
//! failures, which the batch uploader contains and the chat front ends
//! render inline.

use std::path::PathBuf;

/// Result alias used across the library.
pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// One or more required credentials are absent. Lists every missing
    /// environment variable, not just the first.
    #[error("missing environment variables: {}", .0.join(", "))]
    MissingCredentials(Vec<String>),

    /// A tunable is out of range or could not be parsed.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// An input file (PDF or prompt template) does not exist.
    #[error("{kind} not found: {}", .path.display())]
    NotFound { kind: &'static str, path: PathBuf },

    /// The PDF exists but its pages could not be read.
    #[error("failed to read PDF {}: {message}", .path.display())]
    Pdf { path: PathBuf, message: String },

    /// An embedding, vector-store, or chat-model call failed (including timeouts).
    #[error("{service} request failed: {message}")]
    Remote {
        service: &'static str,
        message: String,
    },

    /// Collection provisioning found an existing collection.
    #[error("collection `{0}` already exists")]
    AlreadyExists(String),

    /// A vector's length does not match the collection's dimensionality.
    #[error("vector dimension {actual} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A page-loading worker panicked or was cancelled.
    #[error("page loader worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagError {
    pub(crate) fn remote(service: &'static str, message: impl ToString) -> Self {
        RagError::Remote {
            service,
            message: message.to_string(),
        }
    }

    /// True for errors that abort a run before any remote work starts.
    pub fn is_fatal_setup(&self) -> bool {
        matches!(
            self,
            RagError::MissingCredentials(_)
                | RagError::Configuration(_)
                | RagError::NotFound { .. }
        )
    }
}

impl From<config::ConfigError> for RagError {
    fn from(e: config::ConfigError) -> Self {
        RagError::Configuration(e.to_string())
    }
}

/// Log-and-rethrow combinator applied explicitly at call sites.
pub trait ResultExt<T> {
    /// Logs the error with `context` at error level and returns it unchanged.
    fn log_err(self, context: &str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn log_err(self, context: &str) -> Result<T> {
        if let Err(e) = &self {
            tracing::error!(error = %e, "{}", context);
        }
        self
    }
}
