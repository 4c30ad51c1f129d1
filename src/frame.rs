use std::fmt;
use std::str::FromStr;

use crate::error::StompError;

/// Header names used by the client.
pub mod headers {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const ACK: &str = "ack";
    pub const CLIENT_ID: &str = "client-id";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const DESTINATION: &str = "destination";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const LOGIN: &str = "login";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const PASSCODE: &str = "passcode";
    pub const PERSISTENT: &str = "persistent";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const SESSION: &str = "session";
    pub const SUBSCRIPTION: &str = "subscription";
}

/// The STOMP commands this client sends or understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Ack,
    Error,
    Receipt,
    Disconnect,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Send => "SEND",
            Command::Message => "MESSAGE",
            Command::Ack => "ACK",
            Command::Error => "ERROR",
            Command::Receipt => "RECEIPT",
            Command::Disconnect => "DISCONNECT",
        }
    }
}

impl FromStr for Command {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "SEND" => Command::Send,
            "MESSAGE" => Command::Message,
            "ACK" => Command::Ack,
            "ERROR" => Command::Error,
            "RECEIPT" => Command::Receipt,
            "DISCONNECT" => Command::Disconnect,
            other => {
                return Err(StompError::Frame(format!(
                    "unknown STOMP command: {:?}",
                    other
                )));
            }
        })
    }
}

impl From<Command> for String {
    fn from(command: Command) -> Self {
        command.as_str().to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A simple representation of a STOMP frame.
///
/// `Frame` contains the command as it appears on the wire, an ordered list of
/// headers (key/value pairs) and the raw body bytes. Use [`Frame::kind`] to
/// classify the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. CONNECT, SEND, SUBSCRIBE)
    pub command: String,
    /// Ordered headers as (key, value) pairs
    pub headers: Vec<(String, String)>,
    /// Raw body bytes
    pub body: Vec<u8>,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    ///
    /// Accepts a [`Command`] or any text convertible into `String`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Add a header (builder style).
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Append every header from `headers`, keeping their order.
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the frame body (builder style).
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Get the value of a header by name.
    ///
    /// Returns the first header value matching the given key (case-sensitive),
    /// or `None` if no such header exists.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Classify the command text.
    ///
    /// Fails with [`StompError::Frame`] for commands this client does not
    /// know.
    pub fn kind(&self) -> Result<Command, StompError> {
        self.command.parse()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}

/// Headers that belong to one delivery and must not follow a message that is
/// re-sent elsewhere.
const DELIVERY_HEADERS: [&str; 5] = [
    headers::MESSAGE_ID,
    headers::DESTINATION,
    headers::SUBSCRIPTION,
    headers::ACK,
    headers::CONTENT_LENGTH,
];

/// Copy a received MESSAGE into the headers and body of a new SEND.
///
/// Delivery-specific headers are dropped. When `persistent` is set the copy
/// carries `persistent:true`, replacing any value the broker supplied.
pub fn clone_for_forwarding(message: &Frame, persistent: bool) -> (Vec<(String, String)>, Vec<u8>) {
    let mut copied: Vec<(String, String)> = message
        .headers
        .iter()
        .filter(|(k, _)| !DELIVERY_HEADERS.contains(&k.as_str()))
        .filter(|(k, _)| !(persistent && k == headers::PERSISTENT))
        .cloned()
        .collect();
    if persistent {
        copied.push((headers::PERSISTENT.to_string(), "true".to_string()));
    }
    (copied, message.body.clone())
}

/// Render a body for logs: at most `limit` bytes, lossily decoded.
pub(crate) fn body_preview(body: &[u8], limit: usize) -> String {
    if body.len() <= limit {
        String::from_utf8_lossy(body).into_owned()
    } else {
        format!("{}...", String::from_utf8_lossy(&body[..limit]))
    }
}
