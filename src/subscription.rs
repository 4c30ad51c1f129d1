use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use crate::connection::Connection;
use crate::error::{HandlerError, StompError};
use crate::frame::{Frame, headers};

/// Subscription acknowledgement modes as defined by STOMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    Auto,
    /// Used when a subscription does not ask for anything else.
    #[default]
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }

    /// Whether a successfully handled message must be ACKed by the client.
    pub fn requires_ack(&self) -> bool {
        !matches!(self, AckMode::Auto)
    }
}

impl FromStr for AckMode {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(AckMode::Auto),
            "client" => Ok(AckMode::Client),
            "client-individual" => Ok(AckMode::ClientIndividual),
            other => Err(StompError::Config(format!("unknown ack mode '{}'", other))),
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that processes the messages of a subscription.
///
/// The handler gets a handle to the connection it was registered on and the
/// MESSAGE frame. The returned future may suspend; the connection keeps
/// reading frames meanwhile. `Ok` leads to an ACK for `client` and
/// `client-individual` subscriptions, `Err` to the error-destination or
/// disconnect policy of the connection.
///
/// Handlers must not await [`Connection::disconnect`] or
/// [`Connection::disconnected`]: the disconnect waits for the handler.
///
/// Closures `Fn(Connection, Frame) -> impl Future<Output = Result<(), E>>`
/// implement this trait.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, conn: Connection, message: Frame) -> BoxFuture<'static, Result<(), HandlerError>>;
}

impl<F, Fut, E> MessageHandler for F
where
    F: Fn(Connection, Frame) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<HandlerError> + 'static,
{
    fn handle(&self, conn: Connection, message: Frame) -> BoxFuture<'static, Result<(), HandlerError>> {
        (self)(conn, message).map(|r| r.map_err(Into::into)).boxed()
    }
}

/// Per-subscription settings for [`Connection::subscribe`].
///
/// `headers` are sent with the SUBSCRIBE frame and remembered so the
/// subscription can be replayed after a reconnect. Without an `ack` header
/// the subscription uses [`AckMode::Client`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub headers: Vec<(String, String)>,
    /// Failed messages are forwarded here (and ACKed) instead of ending the
    /// connection.
    pub error_destination: Option<String>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the acknowledgement mode, replacing any `ack` header.
    pub fn ack(mut self, mode: AckMode) -> Self {
        self.headers.retain(|(k, _)| k != headers::ACK);
        self.headers
            .push((headers::ACK.to_string(), mode.as_str().to_string()));
        self
    }

    /// Add an extra SUBSCRIBE header (for example `selector`).
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn error_destination(mut self, destination: impl Into<String>) -> Self {
        self.error_destination = Some(destination.into());
        self
    }
}

/// What the session remembers next to a subscription so that it can be
/// re-issued on a later connection.
#[derive(Clone)]
pub struct SubscriptionContext {
    pub handler: Arc<dyn MessageHandler>,
    pub options: SubscribeOptions,
}

impl fmt::Debug for SubscriptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionContext")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// A subscription as registered on one connection.
#[derive(Clone)]
pub(crate) struct Subscription {
    pub(crate) destination: String,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) ack: AckMode,
    pub(crate) error_destination: Option<String>,
}
