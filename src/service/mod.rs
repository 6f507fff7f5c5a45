//! Generation service integrations.
//!
//! The dispatch controller talks to the model through the
//! [`GenerationService`] trait: a pure intent check, a single-shot image
//! call, and a streamed chat call. [`GeminiService`] is the production
//! implementation backed by the Google Gemini API.

pub mod gemini;
pub mod intent;
pub mod prompt;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::storage::models::{
    AgentType, AspectRatio, GroundingSource, LanguageCode, Message, MessageImage,
    SubscriptionTier,
};

pub use gemini::GeminiService;
pub use intent::IntentDetector;

/// One piece of a streamed chat reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatChunk {
    /// Text delta carried by this chunk.
    pub text: String,
    /// Grounding sources, when the chunk reports any.
    pub sources: Option<Vec<GroundingSource>>,
}

/// Stream of chat chunks. Consumed once; not restartable.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, ServiceError>> + Send>>;

/// Everything a chat call needs.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Conversation so far, ending with the new user message.
    pub history: Vec<Message>,
    /// The new prompt text.
    pub text: String,
    pub tier: SubscriptionTier,
    pub agent: AgentType,
    pub language: LanguageCode,
}

/// External collaborator that produces replies.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Whether the prompt asks for an image.
    fn is_image_generation_intent(&self, text: &str) -> bool;

    /// Generates one image for the prompt.
    async fn generate_image(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<MessageImage, ServiceError>;

    /// Starts a streamed chat reply.
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, ServiceError>;
}

/// Errors that can occur while talking to the generation service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// No API key is configured.
    #[error(
        "Gemini API key not configured. Set METGPT_API_KEY or run 'metgpt config set api_key <KEY>'."
    )]
    NotConfigured,

    /// Network or connection error when calling the API.
    #[error("Request failed: {0}")]
    Request(String),

    /// The API returned a non-success HTTP status code.
    #[error("HTTP error ({status}): {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// The API reported an error or refused the prompt.
    #[error("API error: {0}")]
    Api(String),

    /// Failed to parse an API response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The event stream broke off.
    #[error("Stream error: {0}")]
    Stream(String),

    /// The image call finished without an image.
    #[error("No image returned{}", .0.as_deref().map(|t| format!(": {t}")).unwrap_or_default())]
    NoImage(Option<String>),
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        ServiceError::Request(e.to_string())
    }
}
