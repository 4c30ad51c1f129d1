//! Protocol bookkeeping for one logical client, independent of any transport.
//!
//! A [`Session`] builds the frames the client sends and remembers active
//! subscriptions so they can be replayed when a new connection is made for
//! the same client. It performs no I/O.

use indexmap::IndexMap;
use std::fmt;

use crate::error::StompError;
use crate::frame::{Command, Frame, headers};
use crate::subscription::SubscriptionContext;

/// Key that matches incoming MESSAGE frames to their subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub destination: String,
    pub id: String,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "destination={} id={}", self.destination, self.id)
    }
}

/// A remembered subscription: everything needed to issue it again.
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub destination: String,
    /// SUBSCRIBE headers other than `destination`, including the assigned `id`.
    pub headers: Vec<(String, String)>,
    pub context: SubscriptionContext,
}

/// Whether [`Session::replay`] clears the records it yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Leave the records in place (reconnect after a failure).
    Keep,
    /// Drop the records (graceful disconnect).
    Forget,
}

const DEFAULT_ACCEPT_VERSION: &str = "1.0,1.1,1.2";
const DEFAULT_HOST: &str = "/";

#[derive(Debug)]
pub struct Session {
    connect_headers: Vec<(String, String)>,
    subscriptions: IndexMap<Token, SubscriptionRecord>,
    next_subscription_id: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A session whose CONNECT frame offers STOMP 1.0 to 1.2 on virtual host `/`.
    pub fn new() -> Self {
        Self::with_connect_headers(vec![
            (headers::ACCEPT_VERSION.to_string(), DEFAULT_ACCEPT_VERSION.to_string()),
            (headers::HOST.to_string(), DEFAULT_HOST.to_string()),
        ])
    }

    /// A session whose CONNECT frame carries exactly `connect_headers` in
    /// addition to the credentials.
    pub fn with_connect_headers(connect_headers: Vec<(String, String)>) -> Self {
        Self {
            connect_headers,
            subscriptions: IndexMap::new(),
            next_subscription_id: 1,
        }
    }

    /// Build the CONNECT frame. Empty credentials are left out.
    pub fn connect_frame(&self, login: &str, passcode: &str) -> Frame {
        let mut frame = Frame::new(Command::Connect).with_headers(self.connect_headers.iter().cloned());
        if !login.is_empty() {
            frame = frame.header(headers::LOGIN, login);
        }
        if !passcode.is_empty() {
            frame = frame.header(headers::PASSCODE, passcode);
        }
        frame.header(headers::HEART_BEAT, "0,0")
    }

    /// Build a SUBSCRIBE frame and record the subscription.
    ///
    /// An `id` header is assigned unless `extra` already carries one; a
    /// `destination` entry in `extra` is ignored in favour of `destination`.
    /// Recording a token that is already known replaces the record in place.
    pub fn subscribe_frame(
        &mut self,
        destination: &str,
        extra: Vec<(String, String)>,
        context: SubscriptionContext,
    ) -> (Token, Frame) {
        let mut extra: Vec<(String, String)> = extra
            .into_iter()
            .filter(|(k, _)| k != headers::DESTINATION)
            .collect();
        let id = match extra.iter().find(|(k, _)| k == headers::ID) {
            Some((_, id)) => id.clone(),
            None => {
                // skip ids the caller chose for earlier subscriptions
                let id = loop {
                    let candidate = self.next_subscription_id.to_string();
                    self.next_subscription_id += 1;
                    if !self.subscriptions.keys().any(|t| t.id == candidate) {
                        break candidate;
                    }
                };
                extra.push((headers::ID.to_string(), id.clone()));
                id
            }
        };

        let frame = Frame::new(Command::Subscribe)
            .header(headers::DESTINATION, destination)
            .with_headers(extra.iter().cloned());
        let token = Token {
            destination: destination.to_string(),
            id,
        };
        self.subscriptions.insert(
            token.clone(),
            SubscriptionRecord {
                destination: destination.to_string(),
                headers: extra,
                context,
            },
        );
        (token, frame)
    }

    /// Build an UNSUBSCRIBE frame and forget the subscription.
    pub fn unsubscribe_frame(&mut self, token: &Token) -> Result<Frame, StompError> {
        if self.subscriptions.shift_remove(token).is_none() {
            return Err(StompError::UnknownSubscription(token.clone()));
        }
        Ok(Frame::new(Command::Unsubscribe)
            .header(headers::ID, token.id.as_str())
            .header(headers::DESTINATION, token.destination.as_str()))
    }

    pub fn disconnect_frame(&self) -> Frame {
        Frame::new(Command::Disconnect)
    }

    pub fn send_frame(
        &self,
        destination: &str,
        body: Vec<u8>,
        extra: Vec<(String, String)>,
    ) -> Frame {
        Frame::new(Command::Send)
            .header(headers::DESTINATION, destination)
            .with_headers(extra.into_iter().filter(|(k, _)| k != headers::DESTINATION))
            .set_body(body)
    }

    /// Build the ACK for a received MESSAGE.
    ///
    /// `id` is the message's `ack` header when the broker sent one (STOMP
    /// 1.2) and its `message-id` otherwise; `message-id` and `subscription`
    /// are included for older brokers.
    pub fn ack_frame(&self, message: &Frame) -> Result<Frame, StompError> {
        let message_id = message
            .get_header(headers::MESSAGE_ID)
            .ok_or_else(|| StompError::Frame("MESSAGE frame without message-id header".into()))?;
        let mut frame = Frame::new(Command::Ack)
            .header(headers::ID, message.get_header(headers::ACK).unwrap_or(message_id))
            .header(headers::MESSAGE_ID, message_id);
        if let Some(subscription) = message.get_header(headers::SUBSCRIPTION) {
            frame = frame.header(headers::SUBSCRIPTION, subscription);
        }
        Ok(frame)
    }

    /// Derive the token of a SUBSCRIBE, UNSUBSCRIBE or MESSAGE frame.
    pub fn token(&self, frame: &Frame) -> Result<Token, StompError> {
        let id_header = match frame.kind()? {
            Command::Subscribe | Command::Unsubscribe => headers::ID,
            Command::Message => headers::SUBSCRIPTION,
            other => {
                return Err(StompError::Frame(format!(
                    "{} frames do not identify a subscription",
                    other
                )));
            }
        };
        let id = frame
            .get_header(id_header)
            .ok_or_else(|| StompError::Frame(format!("{} frame without {} header", frame.command, id_header)))?;

        let destination = match frame.get_header(headers::DESTINATION) {
            Some(d) => d.to_string(),
            // STOMP 1.1+ UNSUBSCRIBE carries only the id
            None if frame.command == Command::Unsubscribe.as_str() => self
                .subscriptions
                .keys()
                .find(|t| t.id == id)
                .map(|t| t.destination.clone())
                .ok_or_else(|| StompError::Frame(format!("no subscription with id {}", id)))?,
            None => {
                return Err(StompError::Frame(format!(
                    "{} frame without destination header",
                    frame.command
                )));
            }
        };
        Ok(Token {
            destination,
            id: id.to_string(),
        })
    }

    /// Every recorded subscription in the order it was first made.
    pub fn replay(&mut self, mode: ReplayMode) -> Vec<SubscriptionRecord> {
        match mode {
            ReplayMode::Keep => self.subscriptions.values().cloned().collect(),
            ReplayMode::Forget => std::mem::take(&mut self.subscriptions).into_values().collect(),
        }
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = (&Token, &SubscriptionRecord)> {
        self.subscriptions.iter()
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.subscriptions.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
