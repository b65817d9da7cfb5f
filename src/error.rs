//! Error types for session configuration and connection management.
//!
//! Command reads never fail: when no prompt shows up they return whatever
//! output was accumulated. Errors here cover bad configuration, failing to
//! establish a session and using a session that is gone.

use thiserror::Error;

/// Errors that can occur while building, establishing or using a session.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The session configuration is malformed.
    ///
    /// Returned for empty credential fields, an unparsable port or a host
    /// that is not a dotted-quad IPv4 literal.
    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    /// Dialing, authenticating or opening the shell failed.
    ///
    /// Authentication failures, dial timeouts and pty request failures are
    /// all reported through this variant. Nothing is retried automatically.
    #[error("connect to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    /// The transport went away underneath an open session.
    #[error("transport lost: {0}")]
    TransportLost(String),

    /// The session has been closed and cannot be used anymore.
    #[error("session closed")]
    SessionClosed,
}

impl ConnectError {
    pub(crate) fn connect_failed(addr: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectFailed {
            addr: addr.into(),
            reason: reason.to_string(),
        }
    }
}
