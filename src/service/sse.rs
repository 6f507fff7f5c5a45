//! SSE stream parser for Gemini `streamGenerateContent?alt=sse` responses.
//!
//! Converts a reqwest response byte stream into [`ChatChunk`]s using the
//! `eventsource-stream` crate for SSE protocol compliance.

use eventsource_stream::Eventsource;
use futures::stream::StreamExt;

use super::gemini::{chunk_from_response, ApiErrorResponse, GenerateContentResponse};
use super::{ChatChunk, ChatStream, ServiceError};

/// Parses a streaming response into chat chunks.
///
/// Events without candidates (usage-only frames) are skipped. An error
/// payload inside the stream ends up as an `Err` item.
pub fn parse_sse_stream(response: reqwest::Response) -> ChatStream {
    let events = response.bytes_stream().eventsource();

    let mapped = events.filter_map(|result| async move {
        match result {
            Ok(event) => parse_event_data(&event.data).transpose(),
            Err(e) => Some(Err(ServiceError::Stream(e.to_string()))),
        }
    });

    Box::pin(mapped)
}

/// Parses the `data:` payload of one event.
pub fn parse_event_data(data: &str) -> Result<Option<ChatChunk>, ServiceError> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|e| ServiceError::Parse(e.to_string()))?;

    if value.get("error").is_some() {
        let api_err: ApiErrorResponse =
            serde_json::from_value(value).map_err(|e| ServiceError::Parse(e.to_string()))?;
        return Err(ServiceError::Api(api_err.error.to_string()));
    }

    let response: GenerateContentResponse =
        serde_json::from_value(value).map_err(|e| ServiceError::Parse(e.to_string()))?;
    chunk_from_response(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    /// Serves raw SSE text from a wiremock server to get a real reqwest::Response.
    async fn mock_sse_response(sse_text: &str) -> reqwest::Response {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_text.to_string()),
            )
            .mount(&server)
            .await;

        reqwest::get(&server.uri()).await.unwrap()
    }

    #[test]
    fn test_parse_text_event() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"}]}}]}"#;
        let chunk = parse_event_data(data).unwrap().unwrap();
        assert_eq!(chunk.text, "Hel");
        assert!(chunk.sources.is_none());
    }

    #[test]
    fn test_parse_usage_only_event_is_skipped() {
        let data = r#"{"usageMetadata":{"promptTokenCount":3}}"#;
        assert!(parse_event_data(data).unwrap().is_none());
        assert!(parse_event_data("").unwrap().is_none());
    }

    #[test]
    fn test_parse_error_event() {
        let data = r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#;
        match parse_event_data(data).unwrap_err() {
            ServiceError::Api(msg) => {
                assert!(msg.contains("503"));
                assert!(msg.contains("overloaded"));
            }
            other => panic!("Expected Api error, got: {other:?}"),
        }
    }

    #[test]
    fn test_parse_garbage_is_parse_error() {
        assert!(matches!(
            parse_event_data("{not json"),
            Err(ServiceError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_in_order() {
        let sse = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n",
            "data: {\"usageMetadata\":{\"totalTokenCount\":9}}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]}}]}\n\n",
        );
        let response = mock_sse_response(sse).await;
        let chunks: Vec<_> = parse_sse_stream(response).collect().await;

        let texts: Vec<_> = chunks
            .into_iter()
            .map(|c| c.unwrap().text)
            .collect();
        assert_eq!(texts, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_carries_grounding_sources() {
        let sse = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Rust 1.0 shipped in 2015.\"}]},\"groundingMetadata\":{\"groundingChunks\":[{\"web\":{\"uri\":\"https://blog.rust-lang.org\",\"title\":\"Rust Blog\"}}]}}]}\n\n";
        let response = mock_sse_response(sse).await;
        let mut stream = parse_sse_stream(response);

        let chunk = stream.next().await.unwrap().unwrap();
        let sources = chunk.sources.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].title, "Rust Blog");
        assert!(stream.next().await.is_none());
    }
}
