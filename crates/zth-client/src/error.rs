//! Error types for the ZeroToHire session engine.
//!
//! Errors are grouped into the four kinds the session reacts to differently
//! (see [`ErrorKind`]): transport drops are recovered silently, turn failures
//! become a conversation entry plus a dismissible banner, auth failures end
//! the session, and persistence failures are logged and otherwise ignored.

use std::path::PathBuf;

/// A specialized `Result` type for session engine operations.
pub type Result<T> = std::result::Result<T, ZthError>;

/// Errors that can occur while running a tutoring session.
#[derive(Debug, thiserror::Error)]
pub enum ZthError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your zth.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Network Errors
    // ========================================================================
    /// An HTTP request through the gateway failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The persistent connection could not carry a message.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// The local cache or credential store could not be written.
    #[error("Local storage error: {0}")]
    Store(#[from] zth_store::StoreError),

    // ========================================================================
    // Session Usage Errors
    // ========================================================================
    /// A blank chat message was rejected.
    #[error("Cannot send an empty message")]
    EmptyMessage,

    /// A message was sent while the previous reply is still outstanding.
    #[error("The tutor is still replying\n\nSuggestion: Wait for the current reply to finish")]
    TurnInProgress,

    /// Code evaluation was requested with an empty buffer.
    #[error("Nothing to evaluate: the code buffer is empty")]
    EmptyCode,

    /// An operation needs a current problem but none is selected.
    #[error("No problem is selected\n\nSuggestion: Pick a problem from the catalog first")]
    NoProblemSelected,

    /// A reset confirmation no longer matches the current problem.
    #[error("Reset was confirmed for problem {confirmed}, but the current problem is {current}")]
    StaleResetConfirmation {
        /// Problem the confirmation was issued for.
        confirmed: u64,
        /// Problem that is current now, or "none".
        current: String,
    },

    /// The session has been shut down and accepts no more work.
    #[error("Session has been shut down")]
    SessionClosed,

    // ========================================================================
    // General Errors
    // ========================================================================
    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the request gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request never produced a response.
    #[error("Request to {path} failed: {source}")]
    Transport {
        /// Request path relative to the API base.
        path: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("Server returned {status} for {path}: {message}")]
    Status {
        /// Request path relative to the API base.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Error text from the response body, or the status reason.
        message: String,
    },

    /// Authorization failed and could not be recovered by a token refresh.
    ///
    /// Credentials have already been cleared when this is returned.
    #[error("Not authenticated: {message}\n\nSuggestion: Log in again")]
    Unauthenticated {
        /// Error text from the last authorization failure.
        message: String,
    },

    /// The response body did not match the expected shape.
    #[error("Unexpected response from {path}: {source}")]
    Decode {
        /// Request path relative to the API base.
        path: String,
        /// Underlying decode error.
        #[source]
        source: reqwest::Error,
    },
}

impl GatewayError {
    /// Returns `true` if the session must fall back to the logged-out state.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthenticated { .. })
    }

    /// Returns the HTTP status, if the server answered at all.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Unauthenticated { .. } => Some(401),
            Self::Transport { .. } | Self::Decode { .. } => None,
        }
    }
}

/// Failures of the persistent connection's send path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The connection is not open; use the request/response path instead.
    #[error("connection is not ready")]
    NotReady,
    /// The connection manager has been disposed.
    #[error("connection manager has been disposed")]
    Disposed,
}

/// How an error is surfaced to the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection drop, recovered by reconnecting.
    Transport,
    /// A chat turn or request failed; shown as a dismissible banner.
    Turn,
    /// Credentials are invalid; the session is logged out.
    Auth,
    /// Local or remote persistence failed; logged only.
    Persistence,
    /// Configuration is invalid.
    Config,
    /// The caller asked for something the session cannot do right now.
    Usage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::Turn => write!(f, "turn"),
            Self::Auth => write!(f, "auth"),
            Self::Persistence => write!(f, "persistence"),
            Self::Config => write!(f, "config"),
            Self::Usage => write!(f, "usage"),
        }
    }
}

impl ZthError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `StaleResetConfirmation` error.
    #[must_use]
    pub fn stale_reset(confirmed: u64, current: Option<u64>) -> Self {
        Self::StaleResetConfirmation {
            confirmed,
            current: current.map_or_else(|| "none".to_string(), |id| id.to_string()),
        }
    }

    /// Classifies the error by how it is surfaced.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigParseError { .. } | Self::ConfigValidationError { .. } => ErrorKind::Config,
            Self::Gateway(GatewayError::Unauthenticated { .. }) => ErrorKind::Auth,
            Self::Gateway(_) => ErrorKind::Turn,
            Self::Connection(_) => ErrorKind::Transport,
            Self::Store(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Persistence,
            Self::EmptyMessage
            | Self::TurnInProgress
            | Self::EmptyCode
            | Self::NoProblemSelected
            | Self::StaleResetConfirmation { .. }
            | Self::SessionClosed => ErrorKind::Usage,
        }
    }

    /// Returns `true` if the error ended the authenticated session.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self.kind(), ErrorKind::Auth)
    }
}
