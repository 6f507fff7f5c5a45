//! Core data models for MetGPT
//!
//! These are the records that live in the session repository and get
//! mirrored to the key/value store. Field names serialize in camelCase so
//! the stored JSON keeps the shape the web client wrote.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a chat session.
pub type SessionId = Uuid;

/// Identifier of a message within a session.
pub type MessageId = Uuid;

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A Session is one named conversation with an ordered list of messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique identifier for this session
    pub id: SessionId,

    /// Display title (placeholder until the first prompt arrives)
    pub title: String,

    /// Messages in conversation order
    pub messages: Vec<Message>,

    /// Last update time in epoch milliseconds
    pub updated_at: i64,

    /// Agent persona the session was started with
    pub agent_id: AgentType,
}

/// A single message in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier for this message
    pub id: MessageId,

    /// Who sent this message
    pub role: Role,

    /// Text content. For assistant messages this grows while streaming.
    pub content: String,

    /// Creation time in epoch milliseconds
    pub timestamp: i64,

    /// Attached or generated image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<MessageImage>,

    /// Grounding sources reported by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<GroundingSource>>,
}

impl Message {
    /// Creates a user message stamped with the current time.
    pub fn user(content: impl Into<String>, image: Option<MessageImage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            timestamp: now_millis(),
            image,
            sources: None,
        }
    }

    /// Creates an assistant message with the given id and content.
    pub fn assistant(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: content.into(),
            timestamp: now_millis(),
            image: None,
            sources: None,
        }
    }

    /// Get a single-line preview of the content
    pub fn summary(&self, max_len: usize) -> String {
        let text = self.content.replace('\n', " ");
        if text.chars().count() <= max_len {
            text
        } else {
            format!(
                "{}...",
                text.chars().take(max_len.saturating_sub(3)).collect::<String>()
            )
        }
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human user message.
    User,
    /// An AI assistant response.
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Binary image payload carried inline as base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageImage {
    /// Base64-encoded bytes
    pub data: String,
    /// MIME type, e.g. `image/png`
    pub mime_type: String,
}

impl MessageImage {
    /// Approximate decoded size in bytes.
    pub fn decoded_len(&self) -> usize {
        self.data.len() / 4 * 3
    }

    /// File extension matching the MIME type.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

/// A web source the model grounded its answer on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

/// Subscription tier of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Pro,
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTier::Free => write!(f, "free"),
            SubscriptionTier::Pro => write!(f, "pro"),
        }
    }
}

/// How the user signed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Google,
    #[default]
    Email,
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthProvider::Google => write!(f, "google"),
            AuthProvider::Email => write!(f, "email"),
        }
    }
}

impl FromStr for AuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "google" => Ok(AuthProvider::Google),
            "email" => Ok(AuthProvider::Email),
            other => Err(format!("Unknown auth provider: '{other}'. Expected one of: google, email")),
        }
    }
}

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    pub provider: AuthProvider,
    pub tier: SubscriptionTier,
    /// Number of pro-only agent uses spent on the free tier.
    #[serde(default)]
    pub pro_usage_count: u32,
}

impl User {
    /// Creates a free-tier user with a fresh identifier.
    pub fn new(email: impl Into<String>, name: impl Into<String>, provider: AuthProvider) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.into(),
            name: name.into(),
            picture: None,
            provider,
            tier: SubscriptionTier::Free,
            pro_usage_count: 0,
        }
    }
}

/// Agent personas a session can be bound to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    #[default]
    Core,
    Researcher,
    Designer,
    Coder,
    Analyst,
}

impl AgentType {
    /// Catalog entry for this agent.
    pub fn info(self) -> &'static Agent {
        AGENTS
            .iter()
            .find(|a| a.id == self)
            .unwrap_or(&AGENTS[0])
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentType::Core => "core",
            AgentType::Researcher => "researcher",
            AgentType::Designer => "designer",
            AgentType::Coder => "coder",
            AgentType::Analyst => "analyst",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AGENTS
            .iter()
            .map(|a| a.id)
            .find(|id| id.to_string() == s.to_lowercase())
            .ok_or_else(|| {
                format!("Unknown agent: '{s}'. Expected one of: core, researcher, designer, coder, analyst")
            })
    }
}

/// Static description of an agent persona.
#[derive(Debug)]
pub struct Agent {
    pub id: AgentType,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub pro_only: bool,
}

/// The agent catalog, `Core` first.
pub static AGENTS: [Agent; 5] = [
    Agent {
        id: AgentType::Core,
        name: "MetGPT Core",
        description: "Universal intelligence engine.",
        icon: "🧠",
        pro_only: false,
    },
    Agent {
        id: AgentType::Researcher,
        name: "Cyber Researcher",
        description: "Deep web search and verification.",
        icon: "🌐",
        pro_only: true,
    },
    Agent {
        id: AgentType::Designer,
        name: "Neural Designer",
        description: "Creative image generation and design.",
        icon: "🎨",
        pro_only: true,
    },
    Agent {
        id: AgentType::Coder,
        name: "Logic Architect",
        description: "Advanced coding and systems design.",
        icon: "💻",
        pro_only: true,
    },
    Agent {
        id: AgentType::Analyst,
        name: "Insight Analyst",
        description: "Data analysis and structured reasoning.",
        icon: "📊",
        pro_only: true,
    },
];

/// Languages the assistant can be asked to reply in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageCode {
    #[default]
    En,
    Ur,
    Ar,
    Es,
    Fr,
    De,
    Hi,
    Zh,
    Ja,
    Ru,
    Pt,
}

impl LanguageCode {
    /// All supported languages in menu order.
    pub const ALL: [LanguageCode; 11] = [
        LanguageCode::En,
        LanguageCode::Ur,
        LanguageCode::Ar,
        LanguageCode::Es,
        LanguageCode::Fr,
        LanguageCode::De,
        LanguageCode::Hi,
        LanguageCode::Zh,
        LanguageCode::Ja,
        LanguageCode::Ru,
        LanguageCode::Pt,
    ];

    /// Two-letter code.
    pub fn code(self) -> &'static str {
        match self {
            LanguageCode::En => "en",
            LanguageCode::Ur => "ur",
            LanguageCode::Ar => "ar",
            LanguageCode::Es => "es",
            LanguageCode::Fr => "fr",
            LanguageCode::De => "de",
            LanguageCode::Hi => "hi",
            LanguageCode::Zh => "zh",
            LanguageCode::Ja => "ja",
            LanguageCode::Ru => "ru",
            LanguageCode::Pt => "pt",
        }
    }

    /// English name of the language.
    pub fn name(self) -> &'static str {
        match self {
            LanguageCode::En => "English",
            LanguageCode::Ur => "Urdu",
            LanguageCode::Ar => "Arabic",
            LanguageCode::Es => "Spanish",
            LanguageCode::Fr => "French",
            LanguageCode::De => "German",
            LanguageCode::Hi => "Hindi",
            LanguageCode::Zh => "Chinese",
            LanguageCode::Ja => "Japanese",
            LanguageCode::Ru => "Russian",
            LanguageCode::Pt => "Portuguese",
        }
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for LanguageCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        LanguageCode::ALL
            .into_iter()
            .find(|l| l.code() == lower || l.name().to_lowercase() == lower)
            .ok_or_else(|| format!("Unknown language: '{s}'"))
    }
}

/// Aspect ratios accepted by the image model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "16:9")]
    Wide,
}

impl AspectRatio {
    /// Ratio string as sent to the API.
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Tall => "9:16",
            AspectRatio::Wide => "16:9",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1:1" => Ok(AspectRatio::Square),
            "3:4" => Ok(AspectRatio::Portrait),
            "4:3" => Ok(AspectRatio::Landscape),
            "9:16" => Ok(AspectRatio::Tall),
            "16:9" => Ok(AspectRatio::Wide),
            other => Err(format!(
                "Unknown aspect ratio: '{other}'. Expected one of: 1:1, 3:4, 4:3, 9:16, 16:9"
            )),
        }
    }
}
