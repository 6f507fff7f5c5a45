//! In-memory session repository.
//!
//! Sessions are kept newest-first and addressed by their identifiers. Every
//! mutation bumps [`SessionRepository::revision`], which is what the store
//! adapter compares to decide whether the collection needs to be written.

use uuid::Uuid;

use crate::storage::models::{
    now_millis, AgentType, GroundingSource, Message, MessageId, MessageImage, Role, Session,
    SessionId,
};

/// Title given to a session before its first prompt.
pub const PLACEHOLDER_TITLE: &str = "...";

/// Maximum characters of a derived session title.
const TITLE_MAX_CHARS: usize = 40;

/// Partial update for a message. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub image: Option<MessageImage>,
    pub sources: Option<Vec<GroundingSource>>,
}

/// Result of [`SessionRepository::update_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The patch was applied.
    Applied,
    /// No session has the given id.
    SessionMissing,
    /// The session has no message with the given id.
    MessageMissing,
    /// The target is a user message, which never changes once appended.
    Immutable,
}

#[derive(Debug, Clone, Default)]
pub struct SessionRepository {
    sessions: Vec<Session>,
    revision: u64,
}

impl SessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a repository from sessions already ordered newest-first.
    pub fn from_sessions(sessions: Vec<Session>) -> Self {
        Self {
            sessions,
            revision: 0,
        }
    }

    /// Sessions, newest first.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Counter bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.get(id).is_some()
    }

    /// Sessions whose id starts with `prefix`.
    pub fn find_by_prefix(&self, prefix: &str) -> Vec<&Session> {
        self.sessions
            .iter()
            .filter(|s| s.id.to_string().starts_with(prefix))
            .collect()
    }

    /// Creates an empty session at the front of the collection.
    pub fn create_session(&mut self, agent_id: AgentType) -> SessionId {
        let session = Session {
            id: Uuid::new_v4(),
            title: PLACEHOLDER_TITLE.to_string(),
            messages: Vec::new(),
            updated_at: now_millis(),
            agent_id,
        };
        let id = session.id;
        self.insert_front(session);
        id
    }

    /// Puts a fully formed session at the front. Replaces any session with
    /// the same id.
    pub fn insert_front(&mut self, session: Session) {
        self.sessions.retain(|s| s.id != session.id);
        self.sessions.insert(0, session);
        self.touch();
    }

    /// Appends a message to a session. Returns `false` (and changes nothing)
    /// when the session does not exist.
    pub fn append_message(&mut self, session_id: &SessionId, message: Message) -> bool {
        let Some(session) = self.sessions.iter_mut().find(|s| &s.id == session_id) else {
            tracing::debug!(%session_id, "append to missing session ignored");
            return false;
        };

        if message.role == Role::User {
            session.updated_at = now_millis();
            let first_prompt = !session.messages.iter().any(|m| m.role == Role::User);
            if first_prompt && session.title == PLACEHOLDER_TITLE {
                if let Some(title) = title_from_prompt(&message.content) {
                    session.title = title;
                }
            }
        }
        session.messages.push(message);
        self.touch();
        true
    }

    /// Applies `patch` to exactly the message with `message_id`.
    pub fn update_message(
        &mut self,
        session_id: &SessionId,
        message_id: &MessageId,
        patch: MessagePatch,
    ) -> UpdateOutcome {
        let Some(session) = self.sessions.iter_mut().find(|s| &s.id == session_id) else {
            return UpdateOutcome::SessionMissing;
        };
        let Some(message) = session.messages.iter_mut().find(|m| &m.id == message_id) else {
            return UpdateOutcome::MessageMissing;
        };
        if message.role == Role::User {
            return UpdateOutcome::Immutable;
        }

        if let Some(content) = patch.content {
            message.content = content;
        }
        if let Some(image) = patch.image {
            message.image = Some(image);
        }
        if let Some(sources) = patch.sources {
            message.sources = Some(sources);
        }
        self.touch();
        UpdateOutcome::Applied
    }

    /// Renames a session. Returns `false` when it does not exist.
    pub fn rename_session(&mut self, id: &SessionId, title: &str) -> bool {
        let Some(session) = self.sessions.iter_mut().find(|s| &s.id == id) else {
            return false;
        };
        session.title = title.trim().to_string();
        self.touch();
        true
    }

    /// Removes exactly one session, leaving the order of the rest intact.
    pub fn delete_session(&mut self, id: &SessionId) -> Option<Session> {
        let index = self.sessions.iter().position(|s| &s.id == id)?;
        let removed = self.sessions.remove(index);
        self.touch();
        Some(removed)
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}

/// Derives a session title from the first prompt.
fn title_from_prompt(prompt: &str) -> Option<String> {
    let line = prompt.lines().map(str::trim).find(|l| !l.is_empty())?;
    if line.chars().count() <= TITLE_MAX_CHARS {
        Some(line.to_string())
    } else {
        let cut: String = line.chars().take(TITLE_MAX_CHARS - 3).collect();
        Some(format!("{}...", cut.trim_end()))
    }
}
