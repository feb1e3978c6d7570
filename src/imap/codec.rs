//! Line codec for the session engine.
//!
//! Encodes one command per CRLF-terminated line and decodes each inbound
//! line into the [`Response`] sum type. Deliberately not a full IMAP
//! grammar: argument construction and payload parsing belong to the
//! callers on either side of this seam.

use tokio_util::bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::imap::command::Command;
use crate::imap::response::{EventKind, Response, ResponseStatus};
use crate::transport::TransportError;

const MAX_LINE: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct ImapCodec;

impl ImapCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<Command> for ImapCodec {
    type Error = TransportError;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), TransportError> {
        if command.is_blank() {
            dst.put_slice(b"\r\n");
            return Ok(());
        }
        let mut line = format!("{} {}", command.tag, command.kind.verb());
        for arg in &command.args {
            line.push(' ');
            line.push_str(arg);
        }
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

impl Decoder for ImapCodec {
    type Item = Response;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, TransportError> {
        let Some(pos) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > MAX_LINE {
                return Err(TransportError::DecodeError(format!(
                    "line exceeds {} bytes",
                    MAX_LINE
                )));
            }
            return Ok(None);
        };
        let raw = src.split_to(pos + 1);
        let line = std::str::from_utf8(&raw[..pos])
            .map_err(|e| TransportError::DecodeError(e.to_string()))?
            .trim_end_matches('\r');
        parse_line(line).map(Some)
    }
}

fn parse_line(line: &str) -> Result<Response, TransportError> {
    if line == "+" || line.starts_with("+ ") {
        let message = line.strip_prefix("+ ").unwrap_or("").to_string();
        return Ok(Response::Continuation { message });
    }

    if let Some(rest) = line.strip_prefix("* ") {
        let kind = if rest == "BYE" || rest.starts_with("BYE ") {
            EventKind::Bye
        } else {
            EventKind::Info
        };
        return Ok(Response::Event {
            kind,
            payload: rest.to_string(),
        });
    }

    let mut parts = line.splitn(3, ' ');
    if let (Some(tag), Some(status)) = (parts.next(), parts.next()) {
        if let (Ok(tag), Some(status)) = (tag.parse::<u64>(), ResponseStatus::parse(status)) {
            let message = parts.next().unwrap_or("").to_string();
            return Ok(Response::Tagged {
                tag,
                status,
                message,
            });
        }
    }

    Err(TransportError::DecodeError(format!(
        "unrecognized line: {:?}",
        line
    )))
}
