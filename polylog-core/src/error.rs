//! Error types for polylog-core

use thiserror::Error;

/// Main error type for the polylog-core library
///
/// Malformed records inside a transcript never surface here; they become
/// [`ParseErrorTurn`](crate::types::ParseErrorTurn)s in the turn stream.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error from a read-only source store
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// No plugin registered under this id
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Composite session id without a `<plugin>::<id>` shape
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    /// Blocking task panicked or was cancelled
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type alias for polylog-core
pub type Result<T> = std::result::Result<T, Error>;
