// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use async_trait::async_trait;

use crate::imap::command::Command;
use crate::imap::response::Response;

/// A delivery from the transport to the session engine.
///
/// One ordered delivery path exists per connection: decoded inbound
/// messages and idle notifications arrive on a single channel, in arrival
/// order.
#[derive(Debug, Clone)]
pub enum TransportNotice {
    /// A decoded inbound message.
    Message(Response),
    /// No traffic for the configured idle interval.
    Idle,
    /// The connection is gone (EOF, I/O failure or decode failure).
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to send command: {0}")]
    SendError(String),
    #[error("Connection closed")]
    Closed,
    #[error("Failed to decode response: {0}")]
    DecodeError(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Ordered byte pipe underneath one IMAP session.
///
/// Implementations must preserve write order within a connection and keep
/// `close` idempotent; the engine may reach it from the shutdown path and
/// the BYE path around the same time.
#[async_trait]
pub trait ImapTransport: Send + Sync {
    /// Enqueue one encoded command. Exactly one write per submitted command.
    async fn write(&self, command: &Command) -> Result<(), TransportError>;

    /// Terminate the connection. Safe to call multiple times.
    async fn close(&self);

    /// Whether the underlying connection is currently open.
    fn is_open(&self) -> bool;
}
