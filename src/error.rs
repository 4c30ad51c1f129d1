use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::session::Token;

/// Boxed error returned by message handlers.
pub type HandlerError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors produced by the STOMP client.
///
/// The type is `Clone` so one connection outcome can be handed to every task
/// waiting on it; I/O errors are shared behind an `Arc` for that reason.
#[derive(Error, Debug, Clone)]
pub enum StompError {
    /// I/O-level error
    #[error("io error: {0}")]
    Io(Arc<io::Error>),
    /// CONNECTED was not received within the configured window
    #[error("connect command timed out after {0:?}")]
    ConnectTimeout(Duration),
    /// The broker or the wire violated the protocol
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A frame could not be decoded or classified
    #[error("frame error: {0}")]
    Frame(String),
    /// The transport went away without a more specific cause
    #[error("connection error: {0}")]
    Connection(String),
    /// Unsubscribe for a token the session does not track
    #[error("unknown subscription: {0}")]
    UnknownSubscription(Token),
    /// A message handler failed and the failure ended the connection
    #[error("message handler failed: {0}")]
    Handler(#[source] Arc<dyn StdError + Send + Sync + 'static>),
    /// The operation is not valid in the connection's current state
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// Bad configuration, reported synchronously
    #[error("configuration error: {0}")]
    Config(String),
}

impl StompError {
    pub(crate) fn unexpected_loss() -> Self {
        StompError::Connection("unexpected connection loss".into())
    }

    pub(crate) fn closed() -> Self {
        StompError::Connection("connection closed".into())
    }

    /// Wrap a handler failure so it can be recorded as a disconnect cause.
    pub fn handler(err: HandlerError) -> Self {
        StompError::Handler(Arc::from(err))
    }
}

impl From<io::Error> for StompError {
    fn from(err: io::Error) -> Self {
        StompError::Io(Arc::new(err))
    }
}
