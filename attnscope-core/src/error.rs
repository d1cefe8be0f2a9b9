//! Error types for the attnscope-core crate.

use thiserror::Error;

/// Top-level error type for loading and querying attention data.
#[derive(Debug, Error)]
pub enum AttnError {
    /// The document is missing required fields or the tensor shape is inconsistent.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Sequence length mismatch: local has {local} steps, global has {global}")]
    SequenceLengthMismatch { local: usize, global: usize },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("No dataset loaded")]
    NotLoaded,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AttnError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }

    pub fn invalid_selection(msg: impl Into<String>) -> Self {
        Self::InvalidSelection(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the failure came from the document itself rather than from IO.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedInput(_) | Self::SequenceLengthMismatch { .. } | Self::Serde(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AttnError>;
