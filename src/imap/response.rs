//! Inbound message entities.
//!
//! Everything the server sends falls into one of three shapes, routed by
//! exhaustive matching in the session state machine.

/// Final status carried by a tagged response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    No,
    Bad,
}

impl ResponseStatus {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "OK" => Some(ResponseStatus::Ok),
            "NO" => Some(ResponseStatus::No),
            "BAD" => Some(ResponseStatus::Bad),
            _ => None,
        }
    }
}

/// Kind of an unsolicited server event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Server-initiated disconnect notice.
    Bye,
    /// Informational untagged update, greeting included.
    Info,
}

/// A decoded inbound message.
#[derive(Debug, Clone)]
pub enum Response {
    /// Intermediate, request-specific prompt awaiting more input.
    Continuation { message: String },
    /// Final outcome of the command bearing the matching tag.
    Tagged {
        tag: u64,
        status: ResponseStatus,
        message: String,
    },
    /// Unsolicited notification not tied to any command.
    Event { kind: EventKind, payload: String },
}

impl Response {
    pub fn is_continuation(&self) -> bool {
        matches!(self, Response::Continuation { .. })
    }

    pub fn is_bye(&self) -> bool {
        matches!(
            self,
            Response::Event {
                kind: EventKind::Bye,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!(ResponseStatus::parse("OK"), Some(ResponseStatus::Ok));
        assert_eq!(ResponseStatus::parse("NO"), Some(ResponseStatus::No));
        assert_eq!(ResponseStatus::parse("BAD"), Some(ResponseStatus::Bad));
        assert_eq!(ResponseStatus::parse("MAYBE"), None);
    }

    #[test]
    fn test_bye_detection() {
        let bye = Response::Event {
            kind: EventKind::Bye,
            payload: "BYE logging out".to_string(),
        };
        assert!(bye.is_bye());
        assert!(!bye.is_continuation());
    }
}
