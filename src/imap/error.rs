use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the session engine.
///
/// Cloneable so that a completion handle can resolve with its own copy of
/// the failure that terminated the command.
#[derive(Debug, Error, Clone)]
pub enum SessionError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl SessionError {
    /// Builds the authentication failure carried by a rejection continuation.
    ///
    /// XOAUTH2 servers pack the rejection detail into the continuation as a
    /// base64 payload; decode it when possible, fall back to the raw text.
    pub fn auth_from_continuation(message: &str) -> Self {
        match BASE64
            .decode(message.trim())
            .ok()
            .and_then(|raw| String::from_utf8(raw).ok())
        {
            Some(decoded) => SessionError::AuthenticationFailed(decoded),
            None => SessionError::AuthenticationFailed(message.to_string()),
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SessionError::AuthenticationFailed(_))
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => SessionError::ConnectionClosed,
            TransportError::DecodeError(msg) => SessionError::ProtocolViolation(msg),
            TransportError::Io(msg) => SessionError::Io(msg),
            TransportError::SendError(msg) => SessionError::Transport(msg),
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err.to_string())
    }
}

impl From<config::ConfigError> for SessionError {
    fn from(err: config::ConfigError) -> Self {
        SessionError::Config(err.to_string())
    }
}
