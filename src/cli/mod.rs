//! Command-line interface for MetGPT.
//!
//! Each subcommand opens the application state from the local store,
//! applies events to it and prints the result. The `chat` command is the
//! interactive client; the others are one-shot operations.

/// Individual CLI command implementations.
pub mod commands;
pub mod format;
pub mod render;

use anyhow::{bail, Result};
use colored::Colorize;

pub use format::OutputFormat;

use crate::app::AppState;
use crate::storage::models::SessionId;

/// Resolves a session id prefix to exactly one session.
pub fn resolve_session(state: &AppState, prefix: &str) -> Result<SessionId> {
    let matching = state.sessions.find_by_prefix(prefix);
    match matching.as_slice() {
        [] if state.sessions.is_empty() => bail!(
            "No session found matching '{prefix}'. No sessions yet. \
             Run 'metgpt chat' or 'metgpt send' to start one."
        ),
        [] => bail!(
            "No session found matching '{prefix}'. \
             Run 'metgpt sessions' to list available sessions."
        ),
        [session] => Ok(session.id),
        many => {
            println!("{}", "Multiple sessions match that prefix:".yellow());
            for s in many {
                println!("  {} - {}", format::short_id(&s.id).cyan(), s.title);
            }
            bail!(
                "Multiple sessions match '{prefix}'. Please use a more specific prefix from the list above."
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ChatPolicy;
    use crate::storage::models::AgentType;

    #[test]
    fn test_resolve_session_by_prefix() {
        let mut state = AppState::new(ChatPolicy::default());
        let id = state.sessions.create_session(AgentType::Core);
        let prefix = &id.to_string()[..6];
        assert_eq!(resolve_session(&state, prefix).unwrap(), id);
        assert_eq!(resolve_session(&state, "").unwrap(), id);
    }

    #[test]
    fn test_resolve_session_errors() {
        let mut state = AppState::new(ChatPolicy::default());
        let err = resolve_session(&state, "abc").unwrap_err().to_string();
        assert!(err.contains("No sessions yet"));

        state.sessions.create_session(AgentType::Core);
        state.sessions.create_session(AgentType::Core);
        let err = resolve_session(&state, "").unwrap_err().to_string();
        assert!(err.contains("Multiple sessions"));

        let err = resolve_session(&state, "zzzz").unwrap_err().to_string();
        assert!(err.contains("metgpt sessions"));
    }
}
