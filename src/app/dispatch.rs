//! Runs accepted prompts against the generation service.
//!
//! [`App`] pairs the state with its store so every transition is mirrored
//! to disk. [`Dispatcher::send`] drives one prompt from submission to the
//! final `GenerationFinished`, which is applied on every path so the busy
//! flag can never stay set.

use anyhow::Result;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::state::{reduce, AppState, ChatPolicy, Effect, Event, GenerationTicket, RejectReason};
use crate::config::Config;
use crate::service::{ChatRequest, GenerationService, ServiceError};
use crate::session::merge::{classify, ResponseShape};
use crate::storage::models::{Message, MessageId, MessageImage, SessionId};
use crate::storage::{Database, StateStore};

/// Application state bound to its persistent store.
pub struct App {
    pub state: AppState,
    store: StateStore,
}

impl App {
    /// Restores state from `store`.
    pub fn load(mut store: StateStore, policy: ChatPolicy) -> Result<Self> {
        let persisted = store.load()?;
        let state = AppState::from_persisted(persisted, policy);
        store.mark_synced(&state);
        Ok(Self { state, store })
    }

    /// Opens the default database for the configured namespace.
    pub fn open(config: &Config) -> Result<Self> {
        let db = Database::open_default()?;
        Self::load(
            StateStore::new(db, &config.namespace),
            ChatPolicy::from_config(config),
        )
    }

    /// Applies one event and writes whatever changed.
    pub fn apply(&mut self, event: Event) -> Result<Vec<Effect>> {
        let effects = reduce(&mut self.state, event);
        self.store.sync(&self.state)?;
        Ok(effects)
    }

    /// Applies a `Submit`. If the store cannot be written, an accepted
    /// request is finished before the error is returned so the client
    /// does not stay busy.
    fn submit(&mut self, event: Event) -> Result<Vec<Effect>> {
        let effects = reduce(&mut self.state, event);
        if let Err(e) = self.store.sync(&self.state) {
            let accepted = effects.iter().find_map(|effect| match effect {
                Effect::StartImage(t) | Effect::StartStream(t) => Some(t.request_id),
                _ => None,
            });
            if let Some(request_id) = accepted {
                warn!(%request_id, "store write failed, dropping the request");
                reduce(&mut self.state, Event::GenerationFinished { request_id });
            }
            return Err(e);
        }
        Ok(effects)
    }

    pub fn message(&self, session_id: &SessionId, message_id: &MessageId) -> Option<&Message> {
        self.state.message(session_id, message_id)
    }
}

/// How one `send` ended.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Completed {
        session_id: SessionId,
        message_id: MessageId,
    },
    /// The service failed; partial content stays in the message.
    Failed {
        session_id: SessionId,
        message_id: MessageId,
        error: ServiceError,
    },
    Cancelled {
        session_id: SessionId,
        message_id: MessageId,
    },
    Rejected(RejectReason),
}

enum Progress {
    Done,
    Failed(ServiceError),
    Cancelled,
}

/// Drives prompts through a [`GenerationService`].
pub struct Dispatcher<S> {
    service: S,
    /// UI events delivered while a generation runs.
    events: Option<mpsc::UnboundedReceiver<Event>>,
    ctrl_c: bool,
}

impl<S: GenerationService> Dispatcher<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            events: None,
            ctrl_c: false,
        }
    }

    /// Applies events from `rx` while a generation is running, so the
    /// user can switch or delete sessions mid-stream.
    pub fn with_events(mut self, rx: mpsc::UnboundedReceiver<Event>) -> Self {
        self.events = Some(rx);
        self
    }

    /// Treats Ctrl-C during a generation as a cancel request.
    pub fn with_ctrl_c(mut self) -> Self {
        self.ctrl_c = true;
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Submits a prompt and runs the resulting generation to the end.
    ///
    /// `on_update` sees the assistant message after it is appended and
    /// after every change.
    pub async fn send<F>(
        &mut self,
        app: &mut App,
        text: &str,
        image: Option<MessageImage>,
        mut on_update: F,
    ) -> Result<SendOutcome>
    where
        F: FnMut(&Message),
    {
        let shape = classify(
            image.is_some(),
            self.service.is_image_generation_intent(text),
        );
        let effects = app.submit(Event::Submit {
            text: text.to_string(),
            image,
            shape,
        })?;

        let ticket = effects.into_iter().find_map(|effect| match effect {
            Effect::StartImage(t) | Effect::StartStream(t) => Some(Ok(t)),
            Effect::Rejected(reason) => Some(Err(reason)),
            _ => None,
        });
        let ticket = match ticket {
            Some(Ok(ticket)) => ticket,
            Some(Err(reason)) => {
                debug!(%reason, "prompt rejected");
                return Ok(SendOutcome::Rejected(reason));
            }
            None => return Ok(SendOutcome::Rejected(RejectReason::Busy)),
        };

        if let Some(message) = app.message(&ticket.session_id, &ticket.message_id) {
            on_update(message);
        }

        let progress = match ticket.shape {
            ResponseShape::SingleShot => self.run_image(app, &ticket, &mut on_update).await,
            ResponseShape::Incremental => self.run_stream(app, &ticket, &mut on_update).await,
        };

        let outcome = match progress {
            Ok(Progress::Done) => Ok(SendOutcome::Completed {
                session_id: ticket.session_id,
                message_id: ticket.message_id,
            }),
            Ok(Progress::Cancelled) => {
                info!(request_id = %ticket.request_id, "generation stopped early");
                Ok(SendOutcome::Cancelled {
                    session_id: ticket.session_id,
                    message_id: ticket.message_id,
                })
            }
            Ok(Progress::Failed(err)) => {
                app.apply(Event::GenerationFailed {
                    request_id: ticket.request_id,
                    error: err.clone(),
                })
                .map(|_| SendOutcome::Failed {
                    session_id: ticket.session_id,
                    message_id: ticket.message_id,
                    error: err,
                })
            }
            Err(e) => Err(e),
        };

        let finished = app.apply(Event::GenerationFinished {
            request_id: ticket.request_id,
        });
        let outcome = outcome?;
        finished?;
        Ok(outcome)
    }

    async fn run_image<F: FnMut(&Message)>(
        &mut self,
        app: &mut App,
        ticket: &GenerationTicket,
        on_update: &mut F,
    ) -> Result<Progress> {
        let interrupt = interrupted(self.ctrl_c);
        tokio::pin!(interrupt);
        let generate = self
            .service
            .generate_image(&ticket.text, ticket.aspect_ratio);
        tokio::pin!(generate);

        loop {
            tokio::select! {
                biased;
                _ = ticket.cancel.cancelled() => return Ok(Progress::Cancelled),
                _ = &mut interrupt => {
                    app.apply(Event::CancelGeneration)?;
                    return Ok(Progress::Cancelled);
                }
                Some(event) = next_event(&mut self.events) => forward(app, event)?,
                result = &mut generate => {
                    return match result {
                        Ok(image) => {
                            let effects = app.apply(Event::ImageGenerated {
                                request_id: ticket.request_id,
                                image,
                            })?;
                            notify(app, &effects, on_update);
                            Ok(Progress::Done)
                        }
                        Err(err) => Ok(Progress::Failed(err)),
                    };
                }
            }
        }
    }

    async fn run_stream<F: FnMut(&Message)>(
        &mut self,
        app: &mut App,
        ticket: &GenerationTicket,
        on_update: &mut F,
    ) -> Result<Progress> {
        let interrupt = interrupted(self.ctrl_c);
        tokio::pin!(interrupt);
        let open = self.service.stream_chat(ChatRequest {
            history: ticket.history.clone(),
            text: ticket.text.clone(),
            tier: ticket.tier,
            agent: ticket.agent,
            language: ticket.language,
        });
        tokio::pin!(open);

        let mut stream = loop {
            tokio::select! {
                biased;
                _ = ticket.cancel.cancelled() => return Ok(Progress::Cancelled),
                _ = &mut interrupt => {
                    app.apply(Event::CancelGeneration)?;
                    return Ok(Progress::Cancelled);
                }
                Some(event) = next_event(&mut self.events) => forward(app, event)?,
                result = &mut open => match result {
                    Ok(stream) => break stream,
                    Err(err) => return Ok(Progress::Failed(err)),
                },
            }
        };

        loop {
            tokio::select! {
                biased;
                _ = ticket.cancel.cancelled() => return Ok(Progress::Cancelled),
                _ = &mut interrupt => {
                    app.apply(Event::CancelGeneration)?;
                    return Ok(Progress::Cancelled);
                }
                Some(event) = next_event(&mut self.events) => forward(app, event)?,
                item = stream.next() => match item {
                    None => return Ok(Progress::Done),
                    Some(Ok(chunk)) => {
                        let effects = app.apply(Event::ChunkReceived {
                            request_id: ticket.request_id,
                            chunk,
                        })?;
                        if effects.iter().any(|e| matches!(e, Effect::OrphanDiscarded(_))) {
                            return Ok(Progress::Cancelled);
                        }
                        notify(app, &effects, on_update);
                    }
                    Some(Err(err)) => return Ok(Progress::Failed(err)),
                },
            }
        }
    }
}

/// Next queued UI event, or never when no channel is attached.
async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<Event>>) -> Option<Event> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Resolves on Ctrl-C when enabled, otherwise never.
async fn interrupted(enabled: bool) {
    if enabled && tokio::signal::ctrl_c().await.is_ok() {
        return;
    }
    std::future::pending::<()>().await
}

fn forward(app: &mut App, event: Event) -> Result<()> {
    let effects = app.apply(event)?;
    for effect in &effects {
        if let Effect::Rejected(reason) = effect {
            debug!(%reason, "event rejected during generation");
        }
    }
    Ok(())
}

fn notify<F: FnMut(&Message)>(app: &App, effects: &[Effect], on_update: &mut F) {
    for effect in effects {
        if let Effect::MessageUpdated {
            session_id,
            message_id,
        } = effect
        {
            if let Some(message) = app.message(session_id, message_id) {
                on_update(message);
            }
        }
    }
}
