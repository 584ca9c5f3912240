//! SDK-specific error types with recovery context.
//!
//! Terminal conditions are explicit result values, never panics: callers are
//! forced to handle the "cluster unreachable" case by the type system.
//! Per-candidate probe failures stay internal to the locator and are never
//! surfaced individually; transport closures drive the reconnect state
//! machine and reach owners only as state-change notifications.

use snafu::{Location, Snafu};

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;

/// SDK error types with context-rich error messages.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SdkError {
    /// Every candidate probe failed and no cached leader address exists.
    #[snafu(display("no leader reachable across {candidates} candidate(s)"))]
    NoLeaderReachable {
        /// Number of candidates probed in the failed round.
        candidates: usize,
    },

    /// Configuration validation error.
    #[snafu(display("configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// URL parsing or scheme mapping error.
    #[snafu(display("invalid URL '{url}': {message}"))]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parse error description.
        message: String,
    },

    /// Opening the realtime channel against a resolved leader failed.
    #[snafu(display("handshake with {url} failed at {location}: {message}"))]
    Handshake {
        /// The realtime channel URL that was dialed.
        url: String,
        /// Failure description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Automatic reconnection stopped after exhausting the retry budget.
    #[snafu(display("reconnect exhausted after {attempts} attempt(s)"))]
    ReconnectExhausted {
        /// Number of failed attempts made before giving up.
        attempts: u32,
    },

    /// The session handle has been torn down.
    #[snafu(display("session has been shut down"))]
    SessionClosed,
}

impl SdkError {
    /// Returns true if the error is transient and the operation should be
    /// retried.
    ///
    /// Retryable: leader discovery failures and handshake failures, since
    /// the cluster may be mid-election and a later round can succeed.
    ///
    /// Non-retryable: configuration and URL errors (the inputs are wrong),
    /// exhaustion (requires an explicit owner decision), and operations on a
    /// torn-down session.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoLeaderReachable { .. } => true,
            Self::Handshake { .. } => true,
            Self::Config { .. } => false,
            Self::InvalidUrl { .. } => false,
            Self::ReconnectExhausted { .. } => false,
            Self::SessionClosed => false,
        }
    }
}
