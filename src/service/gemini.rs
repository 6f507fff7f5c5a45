//! Google Gemini implementation of the generation service.
//!
//! Chat replies stream from `models/{model}:streamGenerateContent?alt=sse`.
//! Images come from a single `models/{model}:generateContent` call with the
//! image response modality.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::intent::{image_prompt, IntentDetector};
use super::prompt::{system_instruction, uses_web_search};
use super::sse::parse_sse_stream;
use super::{ChatChunk, ChatRequest, ChatStream, GenerationService, ServiceError};
use crate::config::{Config, DEFAULT_BASE_URL};
use crate::storage::models::{
    AspectRatio, GroundingSource, Message, MessageImage, Role, SubscriptionTier,
};

/// Timeout for establishing a connection (30 seconds).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a whole request, including a full streamed reply (300 seconds).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

// ==================== Wire types ====================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_config: Option<ImageConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImageConfig {
    pub aspect_ratio: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct GroundingChunk {
    #[serde(default)]
    pub web: Option<WebSource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct WebSource {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl GroundingMetadata {
    /// Web sources with a URI, deduplicated in report order.
    fn sources(self) -> Vec<GroundingSource> {
        let mut sources: Vec<GroundingSource> = Vec::new();
        for web in self.grounding_chunks.into_iter().filter_map(|c| c.web) {
            let Some(uri) = web.uri else { continue };
            if sources.iter().any(|s| s.uri == uri) {
                continue;
            }
            sources.push(GroundingSource {
                title: web.title.unwrap_or_else(|| uri.clone()),
                uri,
            });
        }
        sources
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            Some(status) => write!(f, "{} {}: {}", self.code, status, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

// ==================== Response mapping ====================

/// Turns one streamed response frame into a chat chunk.
///
/// Returns `Ok(None)` for frames without candidates.
pub(crate) fn chunk_from_response(
    response: GenerateContentResponse,
) -> Result<Option<ChatChunk>, ServiceError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ServiceError::Api(format!("prompt blocked: {reason}")));
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(None);
    };

    let text = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
        .unwrap_or_default();
    let sources = candidate
        .grounding_metadata
        .map(GroundingMetadata::sources)
        .filter(|s| !s.is_empty());

    Ok(Some(ChatChunk { text, sources }))
}

/// Extracts the first inline image from an image-generation response.
pub(crate) fn image_from_response(
    response: GenerateContentResponse,
) -> Result<MessageImage, ServiceError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ServiceError::Api(format!("prompt blocked: {reason}")));
    }

    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();

    let mut text = String::new();
    for part in parts {
        if let Some(inline) = part.inline_data {
            return Ok(MessageImage {
                data: inline.data,
                mime_type: inline.mime_type,
            });
        }
        if let Some(t) = part.text {
            text.push_str(&t);
        }
    }

    Err(ServiceError::NoImage(
        Some(text.trim().to_string()).filter(|t| !t.is_empty()),
    ))
}

/// Maps conversation history to Gemini contents.
///
/// Empty placeholders are skipped. The prompt is appended when the history
/// does not already end with it.
fn history_to_contents(history: &[Message], text: &str) -> Vec<Content> {
    let mut contents: Vec<Content> = history
        .iter()
        .filter(|m| !m.content.is_empty() || m.image.is_some())
        .map(|m| {
            let mut parts = Vec::new();
            if let Some(image) = &m.image {
                parts.push(Part {
                    text: None,
                    inline_data: Some(InlineData {
                        mime_type: image.mime_type.clone(),
                        data: image.data.clone(),
                    }),
                });
            }
            if !m.content.is_empty() {
                parts.push(Part {
                    text: Some(m.content.clone()),
                    inline_data: None,
                });
            }
            Content {
                role: Some(
                    match m.role {
                        Role::User => "user",
                        Role::Assistant => "model",
                    }
                    .to_string(),
                ),
                parts,
            }
        })
        .collect();

    let ends_with_prompt = history
        .last()
        .is_some_and(|m| m.role == Role::User && m.content == text);
    if !ends_with_prompt && !text.is_empty() {
        contents.push(Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: Some(text.to_string()),
                inline_data: None,
            }],
        });
    }
    contents
}

// ==================== Service ====================

/// Gemini API client.
pub struct GeminiService {
    /// HTTP client instance.
    client: Client,
    /// Gemini API key.
    api_key: String,
    /// API base URL without trailing slash.
    base_url: String,
    /// Chat model for free-tier users.
    free_model: String,
    /// Chat model for pro-tier users.
    pro_model: String,
    /// Image generation model.
    image_model: String,
    intent: IntentDetector,
}

impl GeminiService {
    /// Creates a service with default models and base URL.
    pub fn new(api_key: String) -> Result<Self, ServiceError> {
        let defaults = Config::default();
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let intent =
            IntentDetector::new().map_err(|e| ServiceError::Parse(format!("intent pattern: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            free_model: defaults.free_model,
            pro_model: defaults.pro_model,
            image_model: defaults.image_model,
            intent,
        })
    }

    /// Creates a service from resolved configuration.
    ///
    /// Returns `NotConfigured` when no API key is available.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let api_key = config
            .resolved_api_key()
            .ok_or(ServiceError::NotConfigured)?;
        let mut service = Self::new(api_key)?.with_base_url(&config.base_url);
        service.free_model = config.chat_model(SubscriptionTier::Free);
        service.pro_model = config.chat_model(SubscriptionTier::Pro);
        service.image_model = config.resolved_image_model();
        Ok(service)
    }

    /// Overrides the base URL.
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Chat model used for the given tier.
    pub fn model_for(&self, tier: SubscriptionTier) -> &str {
        match tier {
            SubscriptionTier::Free => &self.free_model,
            SubscriptionTier::Pro => &self.pro_model,
        }
    }

    fn build_chat_request(&self, request: &ChatRequest) -> GenerateContentRequest {
        let tools = if uses_web_search(request.agent) {
            vec![serde_json::json!({ "googleSearch": {} })]
        } else {
            Vec::new()
        };

        GenerateContentRequest {
            contents: history_to_contents(&request.history, &request.text),
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part {
                    text: Some(system_instruction(
                        request.agent,
                        request.language,
                        request.tier,
                    )),
                    inline_data: None,
                }],
            }),
            tools,
            generation_config: None,
        }
    }

    fn build_image_request(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(image_prompt(prompt).to_string()),
                    inline_data: None,
                }],
            }],
            system_instruction: None,
            tools: Vec::new(),
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["IMAGE".to_string()],
                image_config: Some(ImageConfig {
                    aspect_ratio: aspect_ratio.to_string(),
                }),
            }),
        }
    }

    async fn post(
        &self,
        url: &str,
        body: &GenerateContentRequest,
    ) -> Result<reqwest::Response, ServiceError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        debug!(status = %status, "gemini response received");
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let body = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(api_err) => api_err.error.message,
            Err(_) => body,
        };
        Err(ServiceError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl GenerationService for GeminiService {
    fn is_image_generation_intent(&self, text: &str) -> bool {
        self.intent.is_image_request(text)
    }

    async fn generate_image(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<MessageImage, ServiceError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.image_model
        );
        debug!(model = %self.image_model, %aspect_ratio, "requesting image");

        let body = self.build_image_request(prompt, aspect_ratio);
        let response = self.post(&url, &body).await?;
        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;
        image_from_response(parsed)
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, ServiceError> {
        let model = self.model_for(request.tier);
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        );
        debug!(
            model,
            agent = %request.agent,
            language = %request.language,
            history = request.history.len(),
            "starting chat stream"
        );

        let body = self.build_chat_request(&request);
        let response = self.post(&url, &body).await?;
        Ok(parse_sse_stream(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{AgentType, LanguageCode};
    use futures::StreamExt;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_service(base_url: &str) -> GeminiService {
        GeminiService::new("test-key".to_string())
            .unwrap()
            .with_base_url(base_url)
    }

    fn request(agent: AgentType, history: Vec<Message>, text: &str) -> ChatRequest {
        ChatRequest {
            history,
            text: text.to_string(),
            tier: SubscriptionTier::Free,
            agent,
            language: LanguageCode::En,
        }
    }

    // ==================== Request body tests ====================

    #[test]
    fn test_chat_request_maps_roles_and_skips_empty() {
        let service = test_service("http://localhost");
        let history = vec![
            Message::user("hi", None),
            Message::assistant(Uuid::new_v4(), "hello!"),
            Message::assistant(Uuid::new_v4(), ""),
            Message::user("how are you?", None),
        ];
        let body = service.build_chat_request(&request(AgentType::Core, history, "how are you?"));
        let json = serde_json::to_value(&body).unwrap();

        let contents = json["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["text"], "how are you?");
        assert!(json.get("tools").is_none());
        assert!(json["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("MetGPT"));
    }

    #[test]
    fn test_chat_request_appends_prompt_missing_from_history() {
        let service = test_service("http://localhost");
        let body = service.build_chat_request(&request(AgentType::Core, Vec::new(), "Hello!"));
        assert_eq!(body.contents.len(), 1);
        assert_eq!(body.contents[0].parts[0].text.as_deref(), Some("Hello!"));
    }

    #[test]
    fn test_chat_request_inlines_user_images() {
        let service = test_service("http://localhost");
        let image = MessageImage {
            data: "aGk=".to_string(),
            mime_type: "image/png".to_string(),
        };
        let history = vec![Message::user("what is this?", Some(image))];
        let body = service.build_chat_request(&request(AgentType::Core, history, "what is this?"));
        let json = serde_json::to_value(&body).unwrap();
        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["text"], "what is this?");
    }

    #[test]
    fn test_researcher_gets_search_tool() {
        let service = test_service("http://localhost");
        let body = service.build_chat_request(&request(AgentType::Researcher, Vec::new(), "news?"));
        let json = serde_json::to_value(&body).unwrap();
        assert!(json["tools"][0].get("googleSearch").is_some());
    }

    #[test]
    fn test_image_request_body() {
        let service = test_service("http://localhost");
        let body = service.build_image_request("/imagine a red fox", AspectRatio::Wide);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "a red fox");
        assert_eq!(json["generationConfig"]["responseModalities"][0], "IMAGE");
        assert_eq!(json["generationConfig"]["imageConfig"]["aspectRatio"], "16:9");
    }

    #[test]
    fn test_model_for_tier() {
        let service = test_service("http://localhost");
        assert_eq!(service.model_for(SubscriptionTier::Free), "gemini-2.5-flash");
        assert_eq!(service.model_for(SubscriptionTier::Pro), "gemini-2.5-pro");
    }

    // ==================== Response mapping tests ====================

    #[test]
    fn test_chunk_joins_text_parts() {
        let response: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "a"}, {"text": "b"}]}}]
        }))
        .unwrap();
        let chunk = chunk_from_response(response).unwrap().unwrap();
        assert_eq!(chunk.text, "ab");
    }

    #[test]
    fn test_chunk_dedupes_sources() {
        let response: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "x"}]},
                "groundingMetadata": {"groundingChunks": [
                    {"web": {"uri": "https://a", "title": "A"}},
                    {"web": {"uri": "https://a", "title": "A again"}},
                    {"web": {"uri": "https://b"}},
                    {}
                ]}
            }]
        }))
        .unwrap();
        let sources = chunk_from_response(response).unwrap().unwrap().sources.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].title, "A");
        assert_eq!(sources[1].title, "https://b");
    }

    #[test]
    fn test_blocked_prompt_is_api_error() {
        let response: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        match chunk_from_response(response).unwrap_err() {
            ServiceError::Api(msg) => assert!(msg.contains("SAFETY")),
            other => panic!("Expected Api error, got: {other:?}"),
        }
    }

    #[test]
    fn test_image_from_response_without_image() {
        let response: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "I can't draw that."}]}}]
        }))
        .unwrap();
        match image_from_response(response).unwrap_err() {
            ServiceError::NoImage(Some(text)) => assert_eq!(text, "I can't draw that."),
            other => panic!("Expected NoImage, got: {other:?}"),
        }
    }

    #[test]
    fn test_from_config_requires_key() {
        let mut config = Config::default();
        config.api_key = None;
        if std::env::var("METGPT_API_KEY").is_err() && std::env::var("GEMINI_API_KEY").is_err() {
            assert!(matches!(
                GeminiService::from_config(&config),
                Err(ServiceError::NotConfigured)
            ));
        }
        config.api_key = Some("k".to_string());
        assert!(GeminiService::from_config(&config).is_ok());
    }

    // ==================== HTTP tests ====================

    #[tokio::test]
    async fn test_stream_chat_success() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"lo\"}]}}]}\n\n",
        );

        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let service = test_service(&server.uri());
        let stream = service
            .stream_chat(request(AgentType::Core, Vec::new(), "Hi"))
            .await
            .unwrap();
        let texts: Vec<String> = stream.map(|c| c.unwrap().text).collect().await;
        assert_eq!(texts.concat(), "Hello");
    }

    #[tokio::test]
    async fn test_stream_chat_http_error() {
        let server = MockServer::start().await;
        let error_body = serde_json::json!({
            "error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT"}
        });

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(&error_body))
            .mount(&server)
            .await;

        let service = test_service(&server.uri());
        match service
            .stream_chat(request(AgentType::Core, Vec::new(), "Hi"))
            .await
        {
            Err(ServiceError::Http { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "API key not valid.");
            }
            Err(other) => panic!("Expected Http error, got: {other:?}"),
            Ok(_) => panic!("Expected Http error, got a stream"),
        }
    }

    #[tokio::test]
    async fn test_generate_image_success() {
        let server = MockServer::start().await;
        let response_body = serde_json::json!({
            "candidates": [{"content": {"parts": [
                {"text": "Here you go"},
                {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}
            ]}}]
        });

        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash-image:generateContent"))
            .and(body_partial_json(serde_json::json!({
                "generationConfig": {"imageConfig": {"aspectRatio": "1:1"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(&response_body))
            .mount(&server)
            .await;

        let service = test_service(&server.uri());
        let image = service
            .generate_image("draw a cat", AspectRatio::Square)
            .await
            .unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, "iVBORw0KGgo=");
    }
}
