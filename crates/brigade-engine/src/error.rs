//! Error types for the Brigade engine binary.
//!
//! [`StartupError`] is the top-level error type that wraps every failure
//! mode during startup and shutdown.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: brigade_core::config::ConfigError,
    },

    /// The engine could not be built from configuration.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: brigade_core::engine::EngineError,
    },

    /// `PostgreSQL` or `Dragonfly` failed.
    #[error("database error: {source}")]
    Database {
        /// The underlying database error.
        #[from]
        source: brigade_db::DbError,
    },

    /// The sync bus refused a subscription.
    #[error("sync error: {source}")]
    Sync {
        /// The underlying sync error.
        #[from]
        source: brigade_sync::SyncError,
    },

    /// The session API server failed.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: brigade_server::ServerError,
    },

    /// Logging could not be initialized.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },
}
