use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StompError;
use crate::frame::{Command, Frame, headers};
use crate::parser::{parse_frame_slice, unescape_header_value};

/// Escape a STOMP 1.2 header name or value for wire transmission.
///
/// backslash → `\\`, carriage return → `\r`, line feed → `\n`,
/// colon → `\c`.
fn escape_header_value(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            ':' => result.push_str("\\c"),
            _ => result.push(ch),
        }
    }
    result
}

/// CONNECT and CONNECTED headers travel unescaped (STOMP 1.2 §"Value Encoding").
fn uses_escaping(command: &str) -> bool {
    command != Command::Connect.as_str() && command != Command::Connected.as_str()
}

fn decode_text(bytes: Vec<u8>, what: &str) -> Result<String, StompError> {
    String::from_utf8(bytes).map_err(|e| StompError::Frame(format!("invalid utf8 in {}: {}", what, e)))
}

fn decode_header_part(raw: &[u8], escaped: bool, what: &str) -> Result<String, StompError> {
    let bytes = if escaped {
        unescape_header_value(raw)
            .map_err(|e| StompError::Frame(format!("invalid escape in {}: {}", what, e)))?
    } else {
        raw.to_vec()
    };
    decode_text(bytes, what)
}

/// Items produced or consumed by the codec.
///
/// A `StompItem` is either a decoded `Frame` or a `Heartbeat` marker
/// representing a single EOL received on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heartbeat pulse (EOL)
    Heartbeat,
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol.
///
/// Incoming bytes are appended to the read buffer by `Framed`; `decode` is
/// then called until it returns `Ok(None)`, yielding complete items in
/// arrival order. Frames carrying a `content-length` header may contain NUL
/// bytes in their body; the encoder adds that header itself when a body
/// would otherwise be cut short.
#[derive(Debug, Default)]
pub struct StompCodec {
    _private: (),
}

impl StompCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = StompError;

    /// Decode one item from `src`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched when the buffered bytes
    /// do not yet hold a complete item.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let eol = match src.chunk() {
            [b'\n', ..] => 1,
            [b'\r', b'\n', ..] => 2,
            _ => 0,
        };
        if eol > 0 {
            src.advance(eol);
            return Ok(Some(StompItem::Heartbeat));
        }

        let Some(raw) = parse_frame_slice(src.chunk())
            .map_err(|e| StompError::Frame(format!("parse error: {}", e)))?
        else {
            return Ok(None);
        };
        src.advance(raw.consumed);

        let command = decode_text(raw.command, "command")?;
        let escaped = uses_escaping(&command);
        let mut hdrs = Vec::with_capacity(raw.headers.len());
        for (k, v) in raw.headers {
            hdrs.push((
                decode_header_part(&k, escaped, "header key")?,
                decode_header_part(&v, escaped, "header value")?,
            ));
        }

        Ok(Some(StompItem::Frame(Frame {
            command,
            headers: hdrs,
            body: raw.body,
        })))
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = StompError;

    /// Append the wire form of `item` to `dst`.
    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = match item {
            StompItem::Heartbeat => {
                dst.put_u8(b'\n');
                return Ok(());
            }
            StompItem::Frame(frame) => frame,
        };

        dst.extend_from_slice(frame.command.as_bytes());
        dst.put_u8(b'\n');

        let escaped = uses_escaping(&frame.command);
        let has_cl = frame
            .headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(headers::CONTENT_LENGTH));
        let needs_cl =
            !has_cl && (frame.body.contains(&0) || std::str::from_utf8(&frame.body).is_err());

        for (k, v) in &frame.headers {
            if escaped {
                dst.extend_from_slice(escape_header_value(k).as_bytes());
                dst.put_u8(b':');
                dst.extend_from_slice(escape_header_value(v).as_bytes());
            } else {
                dst.extend_from_slice(k.as_bytes());
                dst.put_u8(b':');
                dst.extend_from_slice(v.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        if needs_cl {
            dst.extend_from_slice(headers::CONTENT_LENGTH.as_bytes());
            dst.put_u8(b':');
            dst.extend_from_slice(frame.body.len().to_string().as_bytes());
            dst.put_u8(b'\n');
        }

        dst.put_u8(b'\n');
        dst.extend_from_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}
