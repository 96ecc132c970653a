//! Language model boundary
//!
//! The engine never runs inference itself. It hands a [`PromptBundle`] to a
//! [`LanguageModel`] implementation and bounds the call with a deadline and
//! a cancellation token.

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::metrics::record_generation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Prompt handed to the language model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptBundle {
    /// Task instructions, never compressed
    pub system: String,

    /// Assembled retrieval context
    pub context: String,

    /// The user's query, never compressed
    pub query: String,
}

impl PromptBundle {
    pub fn new(system: impl Into<String>, context: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            context: context.into(),
            query: query.into(),
        }
    }

    /// Render as a single prompt string. Empty sections are skipped.
    pub fn render(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if !self.system.is_empty() {
            parts.push(self.system.clone());
        }
        if !self.context.is_empty() {
            parts.push(format!("Context:\n{}", self.context));
        }
        if !self.query.is_empty() {
            parts.push(format!("Query: {}", self.query));
        }
        parts.join("\n\n")
    }

    /// Estimated token cost of the rendered prompt
    pub fn estimated_tokens(&self) -> usize {
        crate::context::estimate_tokens(&self.render())
    }
}

/// Generation options
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Maximum output tokens
    pub max_tokens: usize,

    /// Sampling temperature
    pub temperature: f32,

    /// Sequences that end generation
    pub stop_sequences: Vec<String>,

    /// Deadline for the whole call
    pub timeout: Duration,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from(&LlmConfig::default())
    }
}

impl From<&LlmConfig> for GenerationOptions {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stop_sequences: config.stop_sequences.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// External inference engine
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for the prompt
    async fn generate(&self, prompt: &PromptBundle, options: &GenerationOptions) -> Result<String>;

    /// Model identifier for logs
    fn model_name(&self) -> &str;
}

/// Run a generation bounded by `options.timeout` and `cancel`.
///
/// Timeout yields `GenerationTimeout`, cancellation yields `Cancelled`. The
/// in-flight future is dropped in both cases. A blank completion is a
/// `GenerationFailed`.
pub async fn generate_with_timeout(
    model: &dyn LanguageModel,
    prompt: &PromptBundle,
    options: &GenerationOptions,
    cancel: &CancellationToken,
) -> Result<String> {
    let start = Instant::now();
    let timeout_ms = options.timeout.as_millis() as u64;

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        res = tokio::time::timeout(options.timeout, model.generate(prompt, options)) => {
            match res {
                Ok(Ok(text)) if text.trim().is_empty() => Err(AppError::GenerationFailed {
                    message: format!("{} returned an empty completion", model.model_name()),
                }),
                Ok(inner) => inner,
                Err(_) => Err(AppError::GenerationTimeout { timeout_ms }),
            }
        }
    };

    let elapsed = start.elapsed().as_secs_f64();
    match &outcome {
        Ok(text) => {
            debug!(model = model.model_name(), chars = text.len(), elapsed, "Generation complete");
            record_generation(elapsed, "success");
        }
        Err(AppError::GenerationTimeout { .. }) => {
            warn!(model = model.model_name(), timeout_ms, "Generation timed out");
            record_generation(elapsed, "timeout");
        }
        Err(AppError::Cancelled) => {
            debug!(model = model.model_name(), "Generation cancelled");
            record_generation(elapsed, "cancelled");
        }
        Err(e) => {
            warn!(model = model.model_name(), code = e.code().as_code(), error = %e, "Generation failed");
            record_generation(elapsed, "error");
        }
    }

    outcome
}
