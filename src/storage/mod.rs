//! Storage layer for MetGPT

pub mod db;
pub mod models;
pub mod persist;

pub use db::Database;
pub use models::*;
pub use persist::{PersistedState, StateStore, StorageKeys};
