//! Error types for roadwatch.
//!
//! Most of these never reach a sensor producer: ingestion degrades a single
//! reading instead of failing. They surface from storage, configuration,
//! the notification collaborator and the CLI.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for roadwatch operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// The persistence worker has shut down or dropped the request.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Escalation Errors ===
    /// The external notification action reported a failure.
    #[error("notification failed: {0}")]
    Notification(String),

    /// No notification command is configured.
    #[error("no notification channel configured")]
    NotifierUnconfigured,

    // === Server Errors ===
    /// Failed to bind the HTTP listener.
    #[error("failed to bind {addr}: {source}")]
    ServerBind {
        /// The address that could not be bound.
        addr: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An HTTP request to a running server failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for roadwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new notification error.
    #[must_use]
    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification(message.into())
    }

    /// Create a new persistence-unavailable error.
    #[must_use]
    pub fn persistence_unavailable(message: impl Into<String>) -> Self {
        Self::PersistenceUnavailable(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error came from the notification collaborator.
    #[must_use]
    pub fn is_notification_error(&self) -> bool {
        matches!(
            self,
            Self::Notification(_) | Self::NotifierUnconfigured | Self::Timeout { .. }
        )
    }
}
