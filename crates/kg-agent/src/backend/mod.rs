//! Generation backend abstraction.
//!
//! The loop only needs "conversation + tool specs in, one assistant text out".
//! [`OpenAiCompatibleBackend`] covers vLLM, TGI, llama.cpp server, Ollama and hosted
//! APIs; [`ScriptedBackend`] replays fixed replies for tests and dry runs.

mod openai;
mod scripted;

pub use openai::OpenAiCompatibleBackend;
pub use scripted::ScriptedBackend;

use async_trait::async_trait;
use kg_core::config::{CallSyntax, GenerationConfig};
use kg_core::message::Message;
use kg_core::tool::ToolSpec;

/// Errors from generation calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("response parse error: {0}")]
    Parse(String),
    #[error("empty response from generation backend")]
    EmptyResponse,
    #[error("generation request timed out: {0}")]
    Timeout(String),
}

/// Sampling parameters forwarded to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_k: Option<u32>,
    pub top_p: f32,
    pub max_new_tokens: u32,
    /// When false the backend decodes greedily.
    pub do_sample: bool,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

impl SamplingParams {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            max_new_tokens: config.max_new_tokens,
            do_sample: config.do_sample,
        }
    }

    /// Temperature actually sent: zero when sampling is disabled.
    pub fn effective_temperature(&self) -> f32 {
        if self.do_sample { self.temperature } else { 0.0 }
    }
}

/// Everything one generation call sees.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
    pub call_syntax: CallSyntax,
    pub params: &'a SamplingParams,
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResponse {
    pub text: String,
    /// Prompt tokens, if the backend reports them.
    pub input_tokens: Option<u64>,
    /// Completion tokens, if the backend reports them.
    pub output_tokens: Option<u64>,
}

impl GenerationResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            input_tokens: None,
            output_tokens: None,
        }
    }
}

/// Produces one assistant turn for a conversation.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
    ) -> Result<GenerationResponse, GenerationError>;

    /// The model name (for display/logging).
    fn model_name(&self) -> &str;
}
