// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Outgoing request entities.
//!
//! A [`Command`] is created at dispatch time, tagged by the ordering
//! context, and immutable from then on. Argument semantics belong to the
//! wire codec; the engine treats them as opaque strings.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Enumerated operation kinds understood by the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Login,
    /// SASL handshake (AUTHENTICATE XOAUTH2).
    Authenticate,
    Logout,
    Noop,
    List,
    Select,
    Examine,
    /// The empty recovery line sent to unblock a stalled exchange.
    Blank,
    /// Free-form escape hatch; the string is the wire verb.
    Raw(String),
}

impl CommandKind {
    pub fn verb(&self) -> &str {
        match self {
            CommandKind::Login => "LOGIN",
            CommandKind::Authenticate => "AUTHENTICATE",
            CommandKind::Logout => "LOGOUT",
            CommandKind::Noop => "NOOP",
            CommandKind::List => "LIST",
            CommandKind::Select => "SELECT",
            CommandKind::Examine => "EXAMINE",
            CommandKind::Blank => "",
            CommandKind::Raw(verb) => verb,
        }
    }
}

/// A single outgoing request.
#[derive(Debug, Clone)]
pub struct Command {
    /// Unique per session, strictly increasing, never reused.
    pub tag: u64,
    pub kind: CommandKind,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(tag: u64, kind: CommandKind, args: Vec<String>) -> Self {
        Self { tag, kind, args }
    }

    pub fn is_blank(&self) -> bool {
        self.kind == CommandKind::Blank
    }
}

/// Builds the XOAUTH2 SASL string and base64-encodes it for the wire.
///
/// Raw format: `user=<email>\x01auth=Bearer <access_token>\x01\x01`
pub fn xoauth2_token(username: &str, access_token: &str) -> String {
    BASE64.encode(format!(
        "user={}\x01auth=Bearer {}\x01\x01",
        username, access_token
    ))
}

/// Quotes a mailbox name or list pattern for the wire.
pub fn quote(value: &str) -> String {
    format!("\"{}\"", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xoauth2_token_format() {
        let token = xoauth2_token("user@outlook.com", "my-token-123");
        let decoded = BASE64.decode(token).unwrap();
        assert_eq!(
            String::from_utf8(decoded).unwrap(),
            "user=user@outlook.com\x01auth=Bearer my-token-123\x01\x01"
        );
    }

    #[test]
    fn test_blank_command_has_no_verb() {
        let blank = Command::new(4, CommandKind::Blank, Vec::new());
        assert!(blank.is_blank());
        assert_eq!(blank.kind.verb(), "");
    }

    #[test]
    fn test_quote_wraps_value() {
        assert_eq!(quote("INBOX/Sub Folder"), "\"INBOX/Sub Folder\"");
    }
}
