//! Error types for the classification engine.

use thiserror::Error;

/// Result type alias using the engine's `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur anywhere in the classification pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// A product row could not be parsed or was missing required fields.
    #[error("input error: {0}")]
    Input(String),

    /// The Knowledge Base failed to load. Fatal at startup; never raised
    /// mid-classification since reloads are atomic and pre-validated.
    #[error("knowledge base load error: source={source_file}, row={row}, cause={cause}")]
    KbLoad {
        source_file: String,
        row: u64,
        cause: String,
    },

    /// Retrieval against the KB failed.
    #[error("retrieval error: {message}")]
    Retrieval { transient: bool, message: String },

    /// An LLM call failed.
    #[error("LLM error: provider={provider}, {message}")]
    Llm {
        transient: bool,
        provider: String,
        message: String,
    },

    /// A provider client's low-level HTTP/transport or response-parsing
    /// failure, raised below the point where transience is known.
    #[error("LLM error: {0}")]
    LLM(String),

    /// Structured-output parsing failed after repair retries were exhausted.
    #[error("LLM schema error: {message} (response preview: {response_preview})")]
    LlmSchema {
        message: String,
        response_preview: String,
    },

    /// An agent's output violated a postcondition invariant.
    #[error("postcondition violated: {0}")]
    Postcondition(String),

    /// Surfaced when a cooperative cancellation signal was observed.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A per-node, per-item, or per-retrieval-mode deadline elapsed.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Audit or Golden Set storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration is invalid or incomplete.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violated; kept for defensive error sites that
    /// cannot otherwise fail.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn kb_load(source_file: impl Into<String>, row: u64, cause: impl Into<String>) -> Self {
        Self::KbLoad {
            source_file: source_file.into(),
            row,
            cause: cause.into(),
        }
    }

    pub fn retrieval_transient(message: impl Into<String>) -> Self {
        Self::Retrieval {
            transient: true,
            message: message.into(),
        }
    }

    pub fn retrieval_permanent(message: impl Into<String>) -> Self {
        Self::Retrieval {
            transient: false,
            message: message.into(),
        }
    }

    pub fn llm_transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Llm {
            transient: true,
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn llm_permanent(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Llm {
            transient: false,
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn llm_schema(message: impl Into<String>, raw_response: &str) -> Self {
        let preview: String = raw_response.chars().take(200).collect();
        Self::LlmSchema {
            message: message.into(),
            response_preview: preview,
        }
    }

    pub fn postcondition(message: impl Into<String>) -> Self {
        Self::Postcondition(message.into())
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled(message.into())
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True if the error represents a transient condition worth retrying
    /// under the orchestrator's per-node backoff policy.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Retrieval { transient: true, .. } | Self::Llm { transient: true, .. } | Self::Timeout { .. } => true,
            Self::LLM(message) => {
                let lower = message.to_ascii_lowercase();
                lower.contains("429") || lower.contains("rate limit") || lower.contains("timeout")
            }
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
