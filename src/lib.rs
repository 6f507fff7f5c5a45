//! MetGPT - chat with Gemini from the terminal
//!
//! Conversations are held in an [`app::AppState`] that only changes through
//! [`app::reduce`]. The [`app::Dispatcher`] drives generation requests
//! against a [`service::GenerationService`] and feeds results back as
//! events; [`storage::StateStore`] mirrors the state into SQLite.

pub mod app;
pub mod cli;
pub mod config;
pub mod service;
pub mod session;
pub mod storage;
