//! Library core for RustyIMAP, an asynchronous IMAP session protocol engine.
//!
//! The engine turns a single ordered connection into a safe
//! request/response API: strict command ordering with exactly one
//! outstanding command, tag correlation, the authentication handshake,
//! unsolicited event handling (BYE, idle keepalive), and a bounded
//! graceful shutdown sequence.

// --- Modules ---
pub mod config;
pub mod imap;
pub mod transport;

// CONSOLIDATED PRELUDE
pub mod prelude {
    // Config
    pub use crate::config::{AuthMode, SessionConfig};

    // IMAP
    pub use crate::imap::client::{CommandHandle, ImapClient, LoginHandle};
    pub use crate::imap::command::{Command, CommandKind};
    pub use crate::imap::error::SessionError;
    pub use crate::imap::response::{EventKind, Response, ResponseStatus};
    pub use crate::imap::session::SessionPhase;
    pub use crate::transport::{ImapTransport, TransportError, TransportNotice};

    // Common Libs
    pub use log::{debug, error, info, trace, warn};
    pub use std::sync::Arc;
    pub use thiserror::Error;
    pub use uuid::Uuid;
}
