//! Application state and its single transition function.
//!
//! Every change to what the user sees (selection, busy flag, sessions,
//! user, preferences) goes through [`reduce`]. The reducer never performs
//! I/O; anything that must happen outside the state comes back as an
//! [`Effect`].

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, OrphanPolicy};
use crate::service::{ChatChunk, ServiceError};
use crate::session::merge::{
    image_result_patch, initial_assistant_message, ResponseShape, StreamAccumulator,
};
use crate::session::repository::{MessagePatch, SessionRepository, UpdateOutcome};
use crate::storage::models::{
    now_millis, AgentType, AspectRatio, LanguageCode, Message, MessageId, MessageImage, Session,
    SessionId, SubscriptionTier, User,
};
use crate::storage::persist::PersistedState;

/// Identifier of one generation request.
pub type RequestId = Uuid;

/// Behaviour switches taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatPolicy {
    pub orphan_policy: OrphanPolicy,
    pub cancel_on_switch: bool,
    pub pro_usage_limit: u32,
}

impl Default for ChatPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ChatPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            orphan_policy: config.orphan_policy,
            cancel_on_switch: config.cancel_on_switch,
            pro_usage_limit: config.pro_usage_limit,
        }
    }
}

/// Why a request was refused without touching state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyPrompt,
    Busy,
    NotSignedIn,
    /// A free user has used up the pro-only agent allowance.
    ProLimitReached,
    UnknownSession,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            RejectReason::EmptyPrompt => "nothing to send",
            RejectReason::Busy => "a reply is still being generated",
            RejectReason::NotSignedIn => "not signed in (run 'metgpt login')",
            RejectReason::ProLimitReached => {
                "free allowance for pro agents used up (run 'metgpt upgrade')"
            }
            RejectReason::UnknownSession => "no such session",
        };
        write!(f, "{msg}")
    }
}

/// Everything the dispatcher needs to run one accepted prompt.
#[derive(Debug, Clone)]
pub struct GenerationTicket {
    pub request_id: RequestId,
    pub session_id: SessionId,
    pub message_id: MessageId,
    pub shape: ResponseShape,
    pub text: String,
    /// Session messages up to and including the new user message.
    pub history: Vec<Message>,
    pub agent: AgentType,
    pub tier: SubscriptionTier,
    pub language: LanguageCode,
    pub aspect_ratio: AspectRatio,
    pub cancel: CancellationToken,
}

/// The one generation that may write to a session right now.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub request_id: RequestId,
    pub session_id: SessionId,
    pub message_id: MessageId,
    pub cancel: CancellationToken,
    user_message: Message,
    title: String,
    agent: AgentType,
    accumulator: StreamAccumulator,
}

/// Inputs to [`reduce`].
#[derive(Debug, Clone)]
pub enum Event {
    Login(User),
    Logout,
    Upgrade,
    NewChat,
    SelectSession(SessionId),
    DeleteSession(SessionId),
    RenameSession { id: SessionId, title: String },
    SelectAgent(AgentType),
    SetLanguage(LanguageCode),
    SetAspectRatio(AspectRatio),
    ToggleSidebar,
    OpenUpgradePrompt,
    CloseUpgradePrompt,
    Submit {
        text: String,
        image: Option<MessageImage>,
        shape: ResponseShape,
    },
    ChunkReceived {
        request_id: RequestId,
        chunk: ChatChunk,
    },
    ImageGenerated {
        request_id: RequestId,
        image: MessageImage,
    },
    GenerationFailed {
        request_id: RequestId,
        error: ServiceError,
    },
    /// Interrupt from the user (Ctrl-C).
    CancelGeneration,
    GenerationFinished {
        request_id: RequestId,
    },
}

/// Outputs of [`reduce`].
#[derive(Debug, Clone)]
pub enum Effect {
    Rejected(RejectReason),
    SessionCreated(SessionId),
    StartImage(GenerationTicket),
    StartStream(GenerationTicket),
    MessageUpdated {
        session_id: SessionId,
        message_id: MessageId,
    },
    GenerationCancelled(RequestId),
    UpgradePrompted,
    OrphanDiscarded(RequestId),
    SessionRestored(SessionId),
}

/// Single source of truth for the client.
#[derive(Debug, Clone)]
pub struct AppState {
    pub user: Option<User>,
    pub sessions: SessionRepository,
    pub current_session: Option<SessionId>,
    pub busy: bool,
    pub in_flight: Option<InFlight>,
    pub selected_agent: AgentType,
    pub language: LanguageCode,
    pub aspect_ratio: AspectRatio,
    pub sidebar_open: bool,
    pub upgrade_prompt_open: bool,
    pub policy: ChatPolicy,
    user_revision: u64,
}

impl AppState {
    pub fn new(policy: ChatPolicy) -> Self {
        Self {
            user: None,
            sessions: SessionRepository::new(),
            current_session: None,
            busy: false,
            in_flight: None,
            selected_agent: AgentType::default(),
            language: LanguageCode::default(),
            aspect_ratio: AspectRatio::default(),
            sidebar_open: true,
            upgrade_prompt_open: false,
            policy,
            user_revision: 0,
        }
    }

    /// Restores state read from the store. The newest session is selected.
    pub fn from_persisted(persisted: PersistedState, policy: ChatPolicy) -> Self {
        let mut state = Self::new(policy);
        state.user = persisted.user;
        if let Some(sessions) = persisted.sessions {
            state.current_session = sessions.first().map(|s| s.id);
            state.sessions = SessionRepository::from_sessions(sessions);
        }
        if let Some(language) = persisted.language {
            state.language = language;
        }
        state
    }

    /// Counter bumped whenever the user record changes.
    pub fn user_revision(&self) -> u64 {
        self.user_revision
    }

    pub fn current(&self) -> Option<&Session> {
        self.current_session.and_then(|id| self.sessions.get(&id))
    }

    /// Looks up one message.
    pub fn message(&self, session_id: &SessionId, message_id: &MessageId) -> Option<&Message> {
        self.sessions
            .get(session_id)?
            .messages
            .iter()
            .find(|m| &m.id == message_id)
    }

    /// Whether a free user may still use a pro-only agent.
    fn pro_allowance_left(&self) -> bool {
        match &self.user {
            Some(user) if user.tier == SubscriptionTier::Free => {
                user.pro_usage_count < self.policy.pro_usage_limit
            }
            _ => true,
        }
    }

    fn touch_user(&mut self) {
        self.user_revision += 1;
    }

    /// Cancels the lease when `moving_from` is the in-flight session.
    fn cancel_if_leaving(&self, moving_from: Option<SessionId>, effects: &mut Vec<Effect>) {
        let Some(lease) = &self.in_flight else { return };
        if moving_from != Some(lease.session_id) || lease.cancel.is_cancelled() {
            return;
        }
        if self.policy.cancel_on_switch {
            lease.cancel.cancel();
            info!(request_id = %lease.request_id, "generation cancelled by session switch");
            effects.push(Effect::GenerationCancelled(lease.request_id));
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(ChatPolicy::default())
    }
}

// ==================== Reducer ====================

pub fn reduce(state: &mut AppState, event: Event) -> Vec<Effect> {
    match event {
        Event::Login(user) => {
            info!(email = %user.email, provider = %user.provider, "signed in");
            state.user = Some(user);
            state.touch_user();
            vec![]
        }
        Event::Logout => handle_logout(state),
        Event::Upgrade => {
            let Some(user) = state.user.as_mut() else {
                return vec![Effect::Rejected(RejectReason::NotSignedIn)];
            };
            user.tier = SubscriptionTier::Pro;
            state.touch_user();
            state.upgrade_prompt_open = false;
            info!("upgraded to pro");
            vec![]
        }
        Event::NewChat => {
            let mut effects = Vec::new();
            state.cancel_if_leaving(state.current_session, &mut effects);
            state.current_session = None;
            effects
        }
        Event::SelectSession(id) => {
            if !state.sessions.contains(&id) {
                return vec![Effect::Rejected(RejectReason::UnknownSession)];
            }
            let mut effects = Vec::new();
            if state.current_session != Some(id) {
                state.cancel_if_leaving(state.current_session, &mut effects);
            }
            state.current_session = Some(id);
            effects
        }
        Event::DeleteSession(id) => {
            let mut effects = Vec::new();
            state.cancel_if_leaving(Some(id), &mut effects);
            if state.sessions.delete_session(&id).is_none() {
                return vec![Effect::Rejected(RejectReason::UnknownSession)];
            }
            if state.current_session == Some(id) {
                state.current_session = None;
            }
            debug!(session_id = %id, "session deleted");
            effects
        }
        Event::RenameSession { id, title } => {
            if state.sessions.rename_session(&id, &title) {
                vec![]
            } else {
                vec![Effect::Rejected(RejectReason::UnknownSession)]
            }
        }
        Event::SelectAgent(agent) => {
            if agent.info().pro_only && !state.pro_allowance_left() {
                state.upgrade_prompt_open = true;
                return vec![
                    Effect::Rejected(RejectReason::ProLimitReached),
                    Effect::UpgradePrompted,
                ];
            }
            state.selected_agent = agent;
            vec![]
        }
        Event::SetLanguage(language) => {
            state.language = language;
            vec![]
        }
        Event::SetAspectRatio(ratio) => {
            state.aspect_ratio = ratio;
            vec![]
        }
        Event::ToggleSidebar => {
            state.sidebar_open = !state.sidebar_open;
            vec![]
        }
        Event::OpenUpgradePrompt => {
            state.upgrade_prompt_open = true;
            vec![Effect::UpgradePrompted]
        }
        Event::CloseUpgradePrompt => {
            state.upgrade_prompt_open = false;
            vec![]
        }
        Event::Submit { text, image, shape } => handle_submit(state, text, image, shape),
        Event::ChunkReceived { request_id, chunk } => {
            let Some(lease) = live_lease(state, request_id) else {
                return vec![];
            };
            let patch = lease.accumulator.push(chunk);
            apply_update(state, request_id, patch)
        }
        Event::ImageGenerated { request_id, image } => {
            if live_lease(state, request_id).is_none() {
                return vec![];
            }
            apply_update(state, request_id, image_result_patch(image))
        }
        Event::GenerationFailed { request_id, error } => {
            // Partial content stays as it is.
            error!(%request_id, %error, "generation failed");
            vec![]
        }
        Event::CancelGeneration => match &state.in_flight {
            Some(lease) if !lease.cancel.is_cancelled() => {
                lease.cancel.cancel();
                info!(request_id = %lease.request_id, "generation interrupted");
                vec![Effect::GenerationCancelled(lease.request_id)]
            }
            _ => vec![],
        },
        Event::GenerationFinished { request_id } => {
            match &state.in_flight {
                Some(lease) if lease.request_id == request_id => {
                    let chunks = lease.accumulator.chunk_count();
                    state.in_flight = None;
                    state.busy = false;
                    debug!(%request_id, chunks, "generation finished");
                }
                _ => warn!(%request_id, "finish for unknown request ignored"),
            }
            vec![]
        }
    }
}

fn handle_logout(state: &mut AppState) -> Vec<Effect> {
    let mut effects = Vec::new();
    if let Some(lease) = &state.in_flight {
        if !lease.cancel.is_cancelled() {
            lease.cancel.cancel();
            effects.push(Effect::GenerationCancelled(lease.request_id));
        }
    }
    if state.user.take().is_some() {
        state.touch_user();
        info!("signed out");
    }
    state.upgrade_prompt_open = false;
    effects
}

fn handle_submit(
    state: &mut AppState,
    text: String,
    image: Option<MessageImage>,
    shape: ResponseShape,
) -> Vec<Effect> {
    if text.trim().is_empty() && image.is_none() {
        return vec![Effect::Rejected(RejectReason::EmptyPrompt)];
    }
    if state.busy {
        return vec![Effect::Rejected(RejectReason::Busy)];
    }
    let Some(tier) = state.user.as_ref().map(|u| u.tier) else {
        return vec![Effect::Rejected(RejectReason::NotSignedIn)];
    };

    // An existing session keeps the agent it was started with.
    let agent = state
        .current()
        .map(|s| s.agent_id)
        .unwrap_or(state.selected_agent);
    let counts_as_pro_use = agent.info().pro_only && tier == SubscriptionTier::Free;
    if counts_as_pro_use && !state.pro_allowance_left() {
        state.upgrade_prompt_open = true;
        return vec![
            Effect::Rejected(RejectReason::ProLimitReached),
            Effect::UpgradePrompted,
        ];
    }

    let mut effects = Vec::new();
    let session_id = match state.current() {
        Some(session) => session.id,
        None => {
            let id = state.sessions.create_session(agent);
            state.current_session = Some(id);
            effects.push(Effect::SessionCreated(id));
            id
        }
    };

    let user_message = Message::user(text.clone(), image);
    state.sessions.append_message(&session_id, user_message.clone());
    let history = state
        .sessions
        .get(&session_id)
        .map(|s| s.messages.clone())
        .unwrap_or_default();

    let assistant = initial_assistant_message(shape);
    let message_id = assistant.id;
    state.sessions.append_message(&session_id, assistant);

    if counts_as_pro_use {
        if let Some(user) = state.user.as_mut() {
            user.pro_usage_count += 1;
        }
        state.touch_user();
    }

    let request_id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let title = state
        .sessions
        .get(&session_id)
        .map(|s| s.title.clone())
        .unwrap_or_default();
    state.busy = true;
    state.in_flight = Some(InFlight {
        request_id,
        session_id,
        message_id,
        cancel: cancel.clone(),
        user_message,
        title,
        agent,
        accumulator: StreamAccumulator::new(),
    });
    debug!(%request_id, %session_id, ?shape, "prompt accepted");

    let ticket = GenerationTicket {
        request_id,
        session_id,
        message_id,
        shape,
        text,
        history,
        agent,
        tier,
        language: state.language,
        aspect_ratio: state.aspect_ratio,
        cancel,
    };
    effects.push(match shape {
        ResponseShape::SingleShot => Effect::StartImage(ticket),
        ResponseShape::Incremental => Effect::StartStream(ticket),
    });
    effects
}

/// The lease for `request_id`, unless it is stale or cancelled.
fn live_lease(state: &mut AppState, request_id: RequestId) -> Option<&mut InFlight> {
    match state.in_flight.as_mut() {
        Some(lease) if lease.request_id == request_id && !lease.cancel.is_cancelled() => {
            Some(lease)
        }
        Some(_) => {
            debug!(%request_id, "late update ignored");
            None
        }
        None => None,
    }
}

/// Writes a patch to the leased assistant message, handling a session that
/// was deleted while the reply was being produced.
fn apply_update(state: &mut AppState, request_id: RequestId, patch: MessagePatch) -> Vec<Effect> {
    let Some(lease) = state.in_flight.as_ref() else {
        return vec![];
    };
    let session_id = lease.session_id;
    let message_id = lease.message_id;

    match state.sessions.update_message(&session_id, &message_id, patch.clone()) {
        UpdateOutcome::Applied => vec![Effect::MessageUpdated {
            session_id,
            message_id,
        }],
        UpdateOutcome::SessionMissing => match state.policy.orphan_policy {
            OrphanPolicy::Discard => {
                debug!(%request_id, %session_id, "update for deleted session discarded");
                vec![Effect::OrphanDiscarded(request_id)]
            }
            OrphanPolicy::Recreate => {
                let restored = restore_session(lease, patch);
                state.sessions.insert_front(restored);
                info!(%request_id, %session_id, "deleted session restored by late update");
                vec![
                    Effect::SessionRestored(session_id),
                    Effect::MessageUpdated {
                        session_id,
                        message_id,
                    },
                ]
            }
        },
        outcome => {
            warn!(%request_id, ?outcome, "update not applied");
            vec![]
        }
    }
}

/// Rebuilds a deleted session from the lease: the leased user prompt plus
/// the assistant message carrying `patch`.
fn restore_session(lease: &InFlight, patch: MessagePatch) -> Session {
    let mut assistant = Message::assistant(lease.message_id, patch.content.unwrap_or_default());
    assistant.image = patch.image;
    assistant.sources = patch.sources;
    Session {
        id: lease.session_id,
        title: lease.title.clone(),
        messages: vec![lease.user_message.clone(), assistant],
        updated_at: now_millis(),
        agent_id: lease.agent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{AuthProvider, GroundingSource, Role};

    fn signed_in() -> AppState {
        let mut state = AppState::new(ChatPolicy::default());
        reduce(
            &mut state,
            Event::Login(User::new("ada@example.com", "Ada", AuthProvider::Email)),
        );
        state
    }

    fn submit(state: &mut AppState, text: &str, shape: ResponseShape) -> Vec<Effect> {
        reduce(
            state,
            Event::Submit {
                text: text.to_string(),
                image: None,
                shape,
            },
        )
    }

    fn ticket(effects: &[Effect]) -> GenerationTicket {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::StartImage(t) | Effect::StartStream(t) => Some(t.clone()),
                _ => None,
            })
            .expect("no start effect")
    }

    fn chunk_event(request_id: RequestId, text: &str) -> Event {
        Event::ChunkReceived {
            request_id,
            chunk: chunk(text),
        }
    }

    fn finished(request_id: RequestId) -> Event {
        Event::GenerationFinished { request_id }
    }

    fn chunk(text: &str) -> ChatChunk {
        ChatChunk {
            text: text.to_string(),
            sources: None,
        }
    }

    fn rejection(effects: &[Effect]) -> Option<RejectReason> {
        effects.iter().find_map(|e| match e {
            Effect::Rejected(r) => Some(*r),
            _ => None,
        })
    }

    // ==================== Submit ====================

    #[test]
    fn test_submit_creates_session_and_lease() {
        let mut state = signed_in();
        let effects = submit(&mut state, "Hello!", ResponseShape::Incremental);
        let t = ticket(&effects);

        assert!(matches!(effects[0], Effect::SessionCreated(id) if id == t.session_id));
        assert_eq!(state.current_session, Some(t.session_id));
        assert!(state.busy);

        let session = state.sessions.get(&t.session_id).unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[1].id, t.message_id);
        assert!(session.messages[1].content.is_empty());
        assert_eq!(t.history.len(), 1);
        assert_eq!(t.history[0].content, "Hello!");
    }

    #[test]
    fn test_single_shot_appends_placeholder() {
        let mut state = signed_in();
        let t = ticket(&submit(&mut state, "draw a cat", ResponseShape::SingleShot));
        let msg = state.message(&t.session_id, &t.message_id).unwrap();
        assert_eq!(msg.content, crate::session::IMAGE_PLACEHOLDER);
    }

    #[test]
    fn test_submit_rejections_leave_state_untouched() {
        let mut state = AppState::new(ChatPolicy::default());
        let effects = submit(&mut state, "hi", ResponseShape::Incremental);
        assert_eq!(rejection(&effects), Some(RejectReason::NotSignedIn));
        assert!(state.sessions.is_empty());

        let mut state = signed_in();
        let effects = submit(&mut state, "   ", ResponseShape::Incremental);
        assert_eq!(rejection(&effects), Some(RejectReason::EmptyPrompt));
        assert!(state.sessions.is_empty());
        assert!(!state.busy);
    }

    #[test]
    fn test_image_only_prompt_is_accepted() {
        let mut state = signed_in();
        let effects = reduce(
            &mut state,
            Event::Submit {
                text: String::new(),
                image: Some(MessageImage {
                    data: "aGk=".to_string(),
                    mime_type: "image/png".to_string(),
                }),
                shape: ResponseShape::Incremental,
            },
        );
        assert!(rejection(&effects).is_none());
    }

    #[test]
    fn test_submit_while_busy_is_rejected() {
        let mut state = signed_in();
        submit(&mut state, "first", ResponseShape::Incremental);
        let revision = state.sessions.revision();

        let effects = submit(&mut state, "second", ResponseShape::Incremental);
        assert_eq!(rejection(&effects), Some(RejectReason::Busy));
        assert_eq!(state.sessions.revision(), revision);
    }

    #[test]
    fn test_submit_uses_existing_session_agent() {
        let mut state = signed_in();
        let id = state.sessions.create_session(AgentType::Coder);
        reduce(&mut state, Event::SelectSession(id));
        state.user.as_mut().unwrap().tier = SubscriptionTier::Pro;

        let t = ticket(&submit(&mut state, "hi", ResponseShape::Incremental));
        assert_eq!(t.session_id, id);
        assert_eq!(t.agent, AgentType::Coder);
        assert_eq!(t.tier, SubscriptionTier::Pro);
    }

    // ==================== Streaming updates ====================

    #[test]
    fn test_chunks_accumulate_into_assistant_message() {
        let mut state = signed_in();
        let t = ticket(&submit(&mut state, "hi", ResponseShape::Incremental));

        reduce(&mut state, chunk_event(t.request_id, "Hel"));
        let effects = reduce(
            &mut state,
            Event::ChunkReceived {
                request_id: t.request_id,
                chunk: ChatChunk {
                    text: "lo".to_string(),
                    sources: Some(vec![GroundingSource {
                        title: "Docs".to_string(),
                        uri: "https://docs.example".to_string(),
                    }]),
                },
            },
        );

        assert!(matches!(
            effects[0],
            Effect::MessageUpdated { message_id, .. } if message_id == t.message_id
        ));
        let msg = state.message(&t.session_id, &t.message_id).unwrap();
        assert_eq!(msg.content, "Hello");
        assert_eq!(msg.sources.as_ref().unwrap()[0].title, "Docs");
        assert_eq!(state.message(&t.session_id, &t.history[0].id).unwrap().content, "hi");
    }

    #[test]
    fn test_image_replaces_placeholder_once() {
        let mut state = signed_in();
        let t = ticket(&submit(&mut state, "draw a cat", ResponseShape::SingleShot));
        let image = MessageImage {
            data: "iVBOR".to_string(),
            mime_type: "image/png".to_string(),
        };
        reduce(
            &mut state,
            Event::ImageGenerated {
                request_id: t.request_id,
                image: image.clone(),
            },
        );

        let msg = state.message(&t.session_id, &t.message_id).unwrap();
        assert_eq!(msg.content, crate::session::IMAGE_CAPTION);
        assert_eq!(msg.image.as_ref(), Some(&image));
    }

    #[test]
    fn test_stale_request_is_ignored() {
        let mut state = signed_in();
        let t = ticket(&submit(&mut state, "hi", ResponseShape::Incremental));
        let effects = reduce(&mut state, chunk_event(Uuid::new_v4(), "nope"));
        assert!(effects.is_empty());
        assert!(state.message(&t.session_id, &t.message_id).unwrap().content.is_empty());
    }

    #[test]
    fn test_failure_keeps_partial_content_and_finish_clears_busy() {
        let mut state = signed_in();
        let t = ticket(&submit(&mut state, "hi", ResponseShape::Incremental));
        reduce(&mut state, chunk_event(t.request_id, "part"));
        reduce(
            &mut state,
            Event::GenerationFailed {
                request_id: t.request_id,
                error: ServiceError::Stream("reset".to_string()),
            },
        );
        assert!(state.busy);

        reduce(&mut state, finished(t.request_id));
        assert!(!state.busy);
        assert!(state.in_flight.is_none());
        assert_eq!(state.message(&t.session_id, &t.message_id).unwrap().content, "part");
    }

    // ==================== Cancellation ====================

    #[test]
    fn test_switching_session_cancels_generation() {
        let mut state = signed_in();
        let other = state.sessions.create_session(AgentType::Core);
        let t = ticket(&submit(&mut state, "hi", ResponseShape::Incremental));
        assert_ne!(t.session_id, other);

        let effects = reduce(&mut state, Event::SelectSession(other));
        assert!(matches!(effects[0], Effect::GenerationCancelled(id) if id == t.request_id));
        assert!(t.cancel.is_cancelled());

        let effects = reduce(&mut state, chunk_event(t.request_id, "late"));
        assert!(effects.is_empty());
        assert!(state.message(&t.session_id, &t.message_id).unwrap().content.is_empty());
    }

    #[test]
    fn test_switch_without_cancel_policy_keeps_streaming() {
        let mut state = signed_in();
        state.policy.cancel_on_switch = false;
        let other = state.sessions.create_session(AgentType::Core);
        let t = ticket(&submit(&mut state, "hi", ResponseShape::Incremental));

        reduce(&mut state, Event::SelectSession(other));
        reduce(&mut state, chunk_event(t.request_id, "ok"));

        assert!(!t.cancel.is_cancelled());
        assert_eq!(state.current_session, Some(other));
        assert_eq!(state.message(&t.session_id, &t.message_id).unwrap().content, "ok");
    }

    #[test]
    fn test_new_chat_clears_selection() {
        let mut state = signed_in();
        let t = ticket(&submit(&mut state, "hi", ResponseShape::Incremental));
        reduce(&mut state, Event::NewChat);
        assert!(state.current_session.is_none());
        assert!(t.cancel.is_cancelled());
        assert!(state.busy);
    }

    #[test]
    fn test_logout_cancels_and_clears_user() {
        let mut state = signed_in();
        let t = ticket(&submit(&mut state, "hi", ResponseShape::Incremental));
        let revision = state.user_revision();

        reduce(&mut state, Event::Logout);
        assert!(state.user.is_none());
        assert!(t.cancel.is_cancelled());
        assert!(state.user_revision() > revision);
    }

    #[test]
    fn test_cancel_generation_event() {
        let mut state = signed_in();
        let t = ticket(&submit(&mut state, "hi", ResponseShape::Incremental));
        let effects = reduce(&mut state, Event::CancelGeneration);
        assert!(matches!(effects[0], Effect::GenerationCancelled(_)));
        assert!(t.cancel.is_cancelled());
        assert!(reduce(&mut state, Event::CancelGeneration).is_empty());
    }

    // ==================== Orphans ====================

    #[test]
    fn test_orphan_update_discarded_by_default() {
        let mut state = signed_in();
        state.policy.cancel_on_switch = false;
        let t = ticket(&submit(&mut state, "hi", ResponseShape::Incremental));
        reduce(&mut state, Event::DeleteSession(t.session_id));

        let effects = reduce(&mut state, chunk_event(t.request_id, "late"));
        assert!(matches!(effects[0], Effect::OrphanDiscarded(_)));
        assert!(state.sessions.is_empty());
    }

    #[test]
    fn test_orphan_update_recreates_session() {
        let mut state = signed_in();
        state.policy.cancel_on_switch = false;
        state.policy.orphan_policy = OrphanPolicy::Recreate;
        let t = ticket(&submit(&mut state, "tell me a story", ResponseShape::Incremental));
        reduce(&mut state, chunk_event(t.request_id, "Once"));
        reduce(&mut state, Event::DeleteSession(t.session_id));

        let effects = reduce(&mut state, chunk_event(t.request_id, " upon"));
        assert!(matches!(effects[0], Effect::SessionRestored(id) if id == t.session_id));

        let session = state.sessions.get(&t.session_id).unwrap();
        assert_eq!(session.title, "tell me a story");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].content, "tell me a story");
        assert_eq!(session.messages[1].content, "Once upon");

        reduce(&mut state, chunk_event(t.request_id, " a time"));
        let session = state.sessions.get(&t.session_id).unwrap();
        assert_eq!(session.messages[1].content, "Once upon a time");
    }

    #[test]
    fn test_deleting_in_flight_session_cancels_by_default() {
        let mut state = signed_in();
        let t = ticket(&submit(&mut state, "hi", ResponseShape::Incremental));
        let effects = reduce(&mut state, Event::DeleteSession(t.session_id));
        assert!(matches!(effects[0], Effect::GenerationCancelled(_)));
        assert!(state.current_session.is_none());
    }

    // ==================== Tier and agents ====================

    #[test]
    fn test_pro_agent_allowance() {
        let mut state = signed_in();
        state.policy.pro_usage_limit = 1;
        assert!(reduce(&mut state, Event::SelectAgent(AgentType::Researcher)).is_empty());

        let t = ticket(&submit(&mut state, "news?", ResponseShape::Incremental));
        assert_eq!(t.agent, AgentType::Researcher);
        assert_eq!(state.user.as_ref().unwrap().pro_usage_count, 1);
        reduce(&mut state, finished(t.request_id));

        let effects = submit(&mut state, "more news?", ResponseShape::Incremental);
        assert_eq!(rejection(&effects), Some(RejectReason::ProLimitReached));
        assert!(state.upgrade_prompt_open);

        let effects = reduce(&mut state, Event::SelectAgent(AgentType::Designer));
        assert_eq!(rejection(&effects), Some(RejectReason::ProLimitReached));
        assert_eq!(state.selected_agent, AgentType::Researcher);
    }

    #[test]
    fn test_upgrade_lifts_limit() {
        let mut state = signed_in();
        state.policy.pro_usage_limit = 0;
        reduce(&mut state, Event::OpenUpgradePrompt);
        reduce(&mut state, Event::Upgrade);

        assert_eq!(state.user.as_ref().unwrap().tier, SubscriptionTier::Pro);
        assert!(!state.upgrade_prompt_open);
        assert!(reduce(&mut state, Event::SelectAgent(AgentType::Coder)).is_empty());
    }

    #[test]
    fn test_preferences() {
        let mut state = signed_in();
        reduce(&mut state, Event::SetLanguage(LanguageCode::Ja));
        reduce(&mut state, Event::SetAspectRatio(AspectRatio::Wide));
        reduce(&mut state, Event::ToggleSidebar);
        assert_eq!(state.language, LanguageCode::Ja);
        assert_eq!(state.aspect_ratio, AspectRatio::Wide);
        assert!(!state.sidebar_open);
    }

    #[test]
    fn test_from_persisted_selects_newest() {
        let mut repo = SessionRepository::new();
        let older = repo.create_session(AgentType::Core);
        let newer = repo.create_session(AgentType::Core);
        let state = AppState::from_persisted(
            PersistedState {
                user: None,
                sessions: Some(repo.sessions().to_vec()),
                language: Some(LanguageCode::Es),
            },
            ChatPolicy::default(),
        );
        assert_eq!(state.current_session, Some(newer));
        assert!(state.sessions.contains(&older));
        assert_eq!(state.language, LanguageCode::Es);
    }
}
