//! Error types for ShellForge
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - Degradation classification (which failures a query survives)
//! - Error codes for client handling

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // Retrieval errors (2xxx)
    ChannelUnavailable,
    ChannelTimeout,

    // Budget errors (3xxx)
    BudgetExhausted,

    // Compression errors (4xxx)
    CompressionFailed,
    EmbeddingError,

    // Generation errors (5xxx)
    GenerationTimeout,
    GenerationFailed,
    Cancelled,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1002,

            // Retrieval (2xxx)
            ErrorCode::ChannelUnavailable => 2001,
            ErrorCode::ChannelTimeout => 2002,

            // Budget (3xxx)
            ErrorCode::BudgetExhausted => 3001,

            // Compression (4xxx)
            ErrorCode::CompressionFailed => 4001,
            ErrorCode::EmbeddingError => 4002,

            // Generation (5xxx)
            ErrorCode::GenerationTimeout => 5001,
            ErrorCode::GenerationFailed => 5002,
            ErrorCode::Cancelled => 5003,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Retrieval errors
    #[error("Channel '{channel}' unavailable: {message}")]
    ChannelUnavailable { channel: String, message: String },

    #[error("Channel '{channel}' timed out after {timeout_ms}ms")]
    ChannelTimeout { channel: String, timeout_ms: u64 },

    // Budget errors
    #[error("Token budget exhausted: {required} tokens reserved, {available} available")]
    BudgetExhausted { required: usize, available: usize },

    // Compression errors
    #[error("Compression failed: {message}")]
    CompressionFailed { message: String },

    #[error("Embedding error: {message}")]
    EmbeddingError { message: String },

    // Generation errors
    #[error("Generation timed out after {timeout_ms}ms")]
    GenerationTimeout { timeout_ms: u64 },

    #[error("Generation failed: {message}")]
    GenerationFailed { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::ChannelUnavailable { .. } => ErrorCode::ChannelUnavailable,
            AppError::ChannelTimeout { .. } => ErrorCode::ChannelTimeout,
            AppError::BudgetExhausted { .. } => ErrorCode::BudgetExhausted,
            AppError::CompressionFailed { .. } => ErrorCode::CompressionFailed,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::GenerationTimeout { .. } => ErrorCode::GenerationTimeout,
            AppError::GenerationFailed { .. } => ErrorCode::GenerationFailed,
            AppError::Cancelled => ErrorCode::Cancelled,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Failures a query survives: the affected stage is skipped or falls
    /// back, and the request still produces a prompt.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            AppError::ChannelUnavailable { .. }
                | AppError::ChannelTimeout { .. }
                | AppError::BudgetExhausted { .. }
                | AppError::CompressionFailed { .. }
                | AppError::EmbeddingError { .. }
        )
    }

    /// Failures surfaced to the caller, who decides on retry or fallback.
    pub fn is_hard_failure(&self) -> bool {
        !self.is_degradable()
    }

    /// Build a channel failure from any displayable provider error
    pub fn channel(channel: impl Into<String>, err: impl std::fmt::Display) -> Self {
        AppError::ChannelUnavailable {
            channel: channel.into(),
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}
