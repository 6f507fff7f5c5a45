//! Heuristic for telling image requests apart from chat prompts.

use regex::Regex;

/// Explicit command prefix that always requests an image.
const IMAGINE_PREFIX: &str = "/imagine";

/// Classifies prompts as image-generation requests.
#[derive(Debug, Clone)]
pub struct IntentDetector {
    /// A creation verb followed closely by an image noun.
    verb_noun: Regex,
    /// Prompts that open with a drawing verb.
    leading_verb: Regex,
}

impl IntentDetector {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            verb_noun: Regex::new(
                r"(?i)\b(generate|create|draw|paint|make|design|render|sketch|imagine|illustrate)\b.{0,40}?\b(images?|pictures?|photos?|art|artwork|drawings?|paintings?|illustrations?|logos?|wallpapers?|portraits?|posters?|icons?)\b",
            )?,
            leading_verb: Regex::new(r"(?i)^\s*(draw|paint|sketch|illustrate)\b")?,
        })
    }

    /// Whether `text` asks for an image.
    pub fn is_image_request(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return false;
        }
        if trimmed.to_lowercase().starts_with(IMAGINE_PREFIX) {
            return true;
        }
        self.leading_verb.is_match(trimmed) || self.verb_noun.is_match(trimmed)
    }
}

/// Strips the `/imagine` prefix from an image prompt.
pub fn image_prompt(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.get(..IMAGINE_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(IMAGINE_PREFIX) => {
            trimmed[IMAGINE_PREFIX.len()..].trim_start()
        }
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> IntentDetector {
        IntentDetector::new().unwrap()
    }

    #[test]
    fn test_image_requests() {
        let d = detector();
        assert!(d.is_image_request("Generate an image of a neon city at night"));
        assert!(d.is_image_request("can you create a logo for my bakery"));
        assert!(d.is_image_request("make me a picture of a cat"));
        assert!(d.is_image_request("Draw a dragon"));
        assert!(d.is_image_request("/imagine a lighthouse in a storm"));
    }

    #[test]
    fn test_chat_prompts() {
        let d = detector();
        assert!(!d.is_image_request("Generate a Python script that parses CSV"));
        assert!(!d.is_image_request("What is modern art?"));
        assert!(!d.is_image_request("How do I make pancakes?"));
        assert!(!d.is_image_request(""));
        assert!(!d.is_image_request("   "));
    }

    #[test]
    fn test_image_prompt_strips_prefix() {
        assert_eq!(image_prompt("/imagine  a red fox"), "a red fox");
        assert_eq!(image_prompt("/IMAGINE a red fox"), "a red fox");
        assert_eq!(image_prompt("draw a red fox"), "draw a red fox");
    }
}
