//! Rules for turning one dispatch into updates of an assistant message.
//!
//! Two shapes exist. A single-shot reply appends a placeholder and replaces
//! it once with the final content. An incremental reply appends an empty
//! message and overwrites its content with the cumulative text after every
//! chunk, so the stored content always equals everything received so far.

use uuid::Uuid;

use crate::service::ChatChunk;
use crate::session::repository::MessagePatch;
use crate::storage::models::{GroundingSource, Message, MessageImage};

/// Status text shown while an image is being generated.
pub const IMAGE_PLACEHOLDER: &str = "🎨 _Generating neural art..._";

/// Caption of a finished generated image.
pub const IMAGE_CAPTION: &str = "Generated with MetGPT:";

/// How the assistant reply for a prompt is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Placeholder first, replaced once by the final result.
    SingleShot,
    /// Empty message updated with the cumulative text of a stream.
    Incremental,
}

/// Picks the response shape. Image generation only runs for prompts that
/// read as an image request and carry no image of their own.
pub fn classify(has_image: bool, is_image_intent: bool) -> ResponseShape {
    if is_image_intent && !has_image {
        ResponseShape::SingleShot
    } else {
        ResponseShape::Incremental
    }
}

/// The first assistant message for a reply of the given shape.
pub fn initial_assistant_message(shape: ResponseShape) -> Message {
    match shape {
        ResponseShape::SingleShot => Message::assistant(Uuid::new_v4(), IMAGE_PLACEHOLDER),
        ResponseShape::Incremental => Message::assistant(Uuid::new_v4(), ""),
    }
}

/// The single replacement applied when a generated image arrives.
pub fn image_result_patch(image: MessageImage) -> MessagePatch {
    MessagePatch {
        content: Some(IMAGE_CAPTION.to_string()),
        image: Some(image),
        sources: None,
    }
}

/// Builds cumulative patches from streamed chunks.
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    text: String,
    sources: Option<Vec<GroundingSource>>,
    chunks: usize,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a chunk and returns the patch carrying the full text so far.
    ///
    /// Sources from the chunk replace the previous set; a chunk without
    /// sources keeps what earlier chunks reported.
    pub fn push(&mut self, chunk: ChatChunk) -> MessagePatch {
        self.text.push_str(&chunk.text);
        if let Some(sources) = chunk.sources {
            self.sources = Some(sources);
        }
        self.chunks += 1;
        MessagePatch {
            content: Some(self.text.clone()),
            image: None,
            sources: self.sources.clone(),
        }
    }

    /// Everything received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sources(&self) -> Option<&[GroundingSource]> {
        self.sources.as_deref()
    }

    /// Number of chunks pushed.
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::Role;

    fn chunk(text: &str) -> ChatChunk {
        ChatChunk {
            text: text.to_string(),
            sources: None,
        }
    }

    fn source(title: &str) -> GroundingSource {
        GroundingSource {
            title: title.to_string(),
            uri: format!("https://{title}.example"),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(false, true), ResponseShape::SingleShot);
        assert_eq!(classify(true, true), ResponseShape::Incremental);
        assert_eq!(classify(false, false), ResponseShape::Incremental);
        assert_eq!(classify(true, false), ResponseShape::Incremental);
    }

    #[test]
    fn test_initial_messages() {
        let placeholder = initial_assistant_message(ResponseShape::SingleShot);
        assert_eq!(placeholder.role, Role::Assistant);
        assert_eq!(placeholder.content, IMAGE_PLACEHOLDER);

        let empty = initial_assistant_message(ResponseShape::Incremental);
        assert_eq!(empty.role, Role::Assistant);
        assert!(empty.content.is_empty());
    }

    #[test]
    fn test_cumulative_content() {
        let mut acc = StreamAccumulator::new();
        let first = acc.push(chunk("Hel"));
        let second = acc.push(chunk("lo"));
        assert_eq!(first.content.as_deref(), Some("Hel"));
        assert_eq!(second.content.as_deref(), Some("Hello"));
        assert_eq!(acc.text(), "Hello");
        assert_eq!(acc.chunk_count(), 2);
    }

    #[test]
    fn test_sources_replace_previous_set() {
        let mut acc = StreamAccumulator::new();
        acc.push(ChatChunk {
            text: "a".to_string(),
            sources: Some(vec![source("one"), source("two")]),
        });
        let patch = acc.push(ChatChunk {
            text: "b".to_string(),
            sources: Some(vec![source("three")]),
        });
        assert_eq!(patch.sources, Some(vec![source("three")]));
    }

    #[test]
    fn test_chunk_without_sources_keeps_previous() {
        let mut acc = StreamAccumulator::new();
        acc.push(ChatChunk {
            text: "a".to_string(),
            sources: Some(vec![source("one")]),
        });
        let patch = acc.push(chunk("b"));
        assert_eq!(patch.sources, Some(vec![source("one")]));
        assert_eq!(acc.sources().map(<[_]>::len), Some(1));
    }

    #[test]
    fn test_empty_chunks_still_produce_patches() {
        let mut acc = StreamAccumulator::new();
        let patch = acc.push(chunk(""));
        assert_eq!(patch.content.as_deref(), Some(""));
        assert!(patch.sources.is_none());
    }

    #[test]
    fn test_image_result_patch() {
        let image = MessageImage {
            data: "iVBOR".to_string(),
            mime_type: "image/png".to_string(),
        };
        let patch = image_result_patch(image.clone());
        assert_eq!(patch.content.as_deref(), Some(IMAGE_CAPTION));
        assert_eq!(patch.image, Some(image));
    }
}
