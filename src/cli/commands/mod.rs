//! CLI commands for MetGPT.
//!
//! Each submodule implements a single CLI command with its argument
//! parsing and execution logic.

/// Interactive chat session.
pub mod chat;

/// Shell completion scripts.
pub mod completions;

/// Configuration viewing and management.
pub mod config;

/// Delete a session.
pub mod delete;

/// Show or set the response language.
pub mod lang;

/// Sign in.
pub mod login;

/// Sign out.
pub mod logout;

/// Send a single prompt.
pub mod send;

/// List sessions.
pub mod sessions;

/// Display one session.
pub mod show;

/// Show account and store status.
pub mod status;

/// Switch the account to the pro tier.
pub mod upgrade;
