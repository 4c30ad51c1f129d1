use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::time::Sleep;
use tokio_util::codec::Framed;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::codec::{StompCodec, StompItem};
use crate::error::{HandlerError, StompError};
use crate::frame::{Command, Frame, body_preview, clone_for_forwarding, headers};
use crate::session::{ReplayMode, Session, Token};
use crate::subscription::{
    AckMode, MessageHandler, SubscribeOptions, Subscription, SubscriptionContext,
};

/// Number of body bytes shown when frames are logged.
const BODY_PREVIEW: usize = 20;

/// Text some brokers put in the ERROR they send for an ACK on a subscription
/// that does not take ACKs.
const UNSUPPORTED_ACK: &str = "Unexpected ACK received for message-id";

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, CONNECT not sent yet.
    Idle,
    /// CONNECT sent, waiting for CONNECTED.
    Connecting,
    /// CONNECTED received; messages are dispatched.
    Connected,
    /// Waiting for active handlers before sending DISCONNECT.
    Disconnecting,
    /// The transport closed after the connection was established.
    Disconnected,
    /// The transport closed before CONNECTED arrived.
    Failed,
}

/// Settings for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Disconnect after a handler failure even when the message could be
    /// forwarded to the subscription's error destination.
    pub always_disconnect_on_handler_error: bool,
    /// Capacity of the queue between [`Connection`] handles and the task.
    pub request_capacity: usize,
    /// Span the connection task runs in. Defaults to `info_span!("stomp")`.
    pub span: Option<Span>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            always_disconnect_on_handler_error: false,
            request_capacity: 32,
            span: None,
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_disconnect_on_handler_error(mut self, value: bool) -> Self {
        self.always_disconnect_on_handler_error = value;
        self
    }

    pub fn request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity;
        self
    }

    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

/// Whether `frame` is the ERROR some brokers answer an ACK with when the
/// subscription does not expect one. Such errors are logged and ignored.
pub fn is_unsupported_ack_error(frame: &Frame) -> bool {
    frame
        .get_header(headers::MESSAGE)
        .is_some_and(|m| m.contains(UNSUPPORTED_ACK))
}

type Outcome = Result<(), StompError>;

enum Request {
    Connect {
        login: String,
        passcode: String,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Outcome>,
    },
    Subscribe {
        destination: String,
        handler: Arc<dyn MessageHandler>,
        options: SubscribeOptions,
        reply: oneshot::Sender<Result<Token, StompError>>,
    },
    Unsubscribe {
        token: Token,
        reply: oneshot::Sender<()>,
    },
    Send {
        frame: Frame,
        reply: oneshot::Sender<Outcome>,
    },
    Disconnect {
        cause: Option<StompError>,
    },
}

/// Handle to a STOMP connection.
///
/// The transport, the [`Session`] and all protocol state are owned by a
/// background task; every method here is a request to that task. Handles
/// are cheap to clone. Once every handle is dropped the task disconnects
/// gracefully.
#[derive(Clone)]
pub struct Connection {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
    outcome: watch::Receiver<Option<Outcome>>,
    session: Arc<Mutex<Option<oneshot::Receiver<Session>>>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Start the connection task over an already open transport.
    ///
    /// Nothing is written until [`Connection::connect`] is called. Must be
    /// called from within a tokio runtime.
    pub fn open<T>(transport: T, session: Session, options: ConnectionOptions) -> Connection
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (requests_tx, requests_rx) = mpsc::channel(options.request_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let (session_tx, session_rx) = oneshot::channel();
        let session_slot = Arc::new(Mutex::new(Some(session_rx)));

        let driver = Driver {
            framed: Framed::new(transport, StompCodec::new()),
            session,
            requests: requests_rx,
            requests_open: true,
            handle: requests_tx.downgrade(),
            state_tx,
            outcome_tx,
            session_slot: session_slot.clone(),
            always_disconnect: options.always_disconnect_on_handler_error,
            subscriptions: HashMap::new(),
            active: HashSet::new(),
            handlers: FuturesUnordered::new(),
            connect_reply: None,
            connect_deadline: None,
            connect_timeout: Duration::ZERO,
            connect_error: None,
            disconnecting: false,
            awaiting_drain: false,
            disconnect_cause: None,
            closed: false,
        };

        let span = options.span.unwrap_or_else(|| info_span!("stomp"));
        tokio::spawn(
            async move {
                let session = driver.run().await;
                let _ = session_tx.send(session);
            }
            .instrument(span),
        );

        Connection {
            requests: requests_tx,
            state: state_rx,
            outcome: outcome_rx,
            session: session_slot,
        }
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Request,
    ) -> Result<R, StompError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(make(tx))
            .await
            .map_err(|_| StompError::closed())?;
        rx.await.map_err(|_| StompError::closed())
    }

    /// Send CONNECT and wait for CONNECTED.
    ///
    /// Empty `login` or `passcode` are left out of the frame. With a
    /// `timeout` the transport is closed if CONNECTED has not arrived in
    /// time and the call fails with [`StompError::ConnectTimeout`]. After
    /// CONNECTED every subscription recorded in the session is issued again
    /// before this returns.
    pub async fn connect(
        &self,
        login: &str,
        passcode: &str,
        timeout: Option<Duration>,
    ) -> Result<Connection, StompError> {
        self.request(|reply| Request::Connect {
            login: login.to_string(),
            passcode: passcode.to_string(),
            timeout,
            reply,
        })
        .await??;
        Ok(self.clone())
    }

    /// Subscribe `handler` to `destination`.
    ///
    /// Before CONNECTED the subscription is only recorded; it is sent when
    /// the connection comes up.
    pub async fn subscribe(
        &self,
        destination: &str,
        handler: impl MessageHandler,
        options: SubscribeOptions,
    ) -> Result<Token, StompError> {
        let handler: Arc<dyn MessageHandler> = Arc::new(handler);
        self.request(|reply| Request::Subscribe {
            destination: destination.to_string(),
            handler,
            options,
            reply,
        })
        .await?
    }

    /// Cancel a subscription. Unknown tokens are logged and ignored.
    pub async fn unsubscribe(&self, token: &Token) -> Result<(), StompError> {
        self.request(|reply| Request::Unsubscribe {
            token: token.clone(),
            reply,
        })
        .await
    }

    /// Send a message to `destination`. No receipt is requested.
    pub async fn send(
        &self,
        destination: &str,
        body: impl Into<Vec<u8>>,
        extra_headers: Vec<(String, String)>,
    ) -> Result<(), StompError> {
        let frame = Frame::new(Command::Send)
            .header(headers::DESTINATION, destination)
            .with_headers(extra_headers.into_iter().filter(|(k, _)| k != headers::DESTINATION))
            .set_body(body);
        self.send_frame(frame).await
    }

    /// Write `frame` as is. Only allowed once connected.
    pub async fn send_frame(&self, frame: Frame) -> Result<(), StompError> {
        self.request(|reply| Request::Send { frame, reply }).await?
    }

    /// Disconnect gracefully and wait until the transport is closed.
    ///
    /// Messages already being handled are allowed to finish (and be ACKed)
    /// before DISCONNECT is sent; new ones are ignored. Without `cause` the
    /// session forgets its subscriptions and the result is `Ok(())`. With a
    /// cause the subscriptions are kept for a later connection and the
    /// result is `Err(cause)`. Calling this again only records `cause` if
    /// none was set yet.
    ///
    /// Must not be awaited from inside a message handler.
    pub async fn disconnect(&self, cause: Option<StompError>) -> Result<(), StompError> {
        // a task that already ended has published its outcome
        let _ = self.requests.send(Request::Disconnect { cause }).await;
        self.disconnected().await
    }

    /// Wait until the transport is closed, without starting a disconnect.
    ///
    /// Resolves to `Ok(())` after a clean disconnect, to the disconnect
    /// cause after a failed one and to a connection error when the broker
    /// went away on its own.
    pub async fn disconnected(&self) -> Result<(), StompError> {
        let mut outcome = self.outcome.clone();
        match outcome.wait_for(|o| o.is_some()).await {
            Ok(value) => (*value).clone().unwrap_or_else(|| Err(StompError::closed())),
            Err(_) => Err(StompError::closed()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Take back the session once the connection task has ended.
    ///
    /// Waits for the task to end. Only the first caller gets the session.
    pub async fn take_session(&self) -> Option<Session> {
        let rx = self.session.lock().await.take()?;
        rx.await.ok()
    }
}

/// A handler that finished, successfully or not.
struct Completion {
    message: Frame,
    message_id: String,
    subscription: Subscription,
    result: Result<(), HandlerError>,
}

/// The connection task.
struct Driver<T> {
    framed: Framed<T, StompCodec>,
    session: Session,
    requests: mpsc::Receiver<Request>,
    requests_open: bool,
    handle: mpsc::WeakSender<Request>,
    state_tx: watch::Sender<ConnectionState>,
    outcome_tx: watch::Sender<Option<Outcome>>,
    session_slot: Arc<Mutex<Option<oneshot::Receiver<Session>>>>,
    always_disconnect: bool,
    subscriptions: HashMap<Token, Subscription>,
    /// message-ids whose handler has not finished
    active: HashSet<String>,
    handlers: FuturesUnordered<BoxFuture<'static, Completion>>,
    connect_reply: Option<oneshot::Sender<Outcome>>,
    connect_deadline: Option<Pin<Box<Sleep>>>,
    connect_timeout: Duration,
    connect_error: Option<StompError>,
    disconnecting: bool,
    awaiting_drain: bool,
    disconnect_cause: Option<StompError>,
    closed: bool,
}

async fn expired(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

impl<T> Driver<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self) -> Session {
        while !self.closed {
            tokio::select! {
                item = self.framed.next() => match item {
                    Some(Ok(StompItem::Heartbeat)) => {}
                    Some(Ok(StompItem::Frame(frame))) => self.on_frame(frame).await,
                    Some(Err(StompError::Io(err))) => {
                        debug!(error = %err, "transport read failed");
                        break;
                    }
                    Some(Err(err)) => self.fail(err).await,
                    None => break,
                },
                Some(done) = self.handlers.next(), if !self.handlers.is_empty() => {
                    self.on_handler_done(done).await;
                }
                req = self.requests.recv(), if self.requests_open => match req {
                    Some(req) => self.on_request(req).await,
                    None => {
                        self.requests_open = false;
                        self.on_handles_dropped().await;
                    }
                },
                _ = expired(&mut self.connect_deadline), if self.connect_deadline.is_some() => {
                    self.on_connect_timeout().await;
                }
            }
        }
        self.on_transport_closed();
        self.session
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(?state, "connection state");
        self.state_tx.send_replace(state);
    }

    fn connection(&self) -> Option<Connection> {
        Some(Connection {
            requests: self.handle.upgrade()?,
            state: self.state_tx.subscribe(),
            outcome: self.outcome_tx.subscribe(),
            session: self.session_slot.clone(),
        })
    }

    async fn on_request(&mut self, req: Request) {
        match req {
            Request::Connect {
                login,
                passcode,
                timeout,
                reply,
            } => {
                if self.state() != ConnectionState::Idle {
                    let _ = reply.send(Err(StompError::InvalidState(
                        "connect is only allowed on a fresh connection",
                    )));
                    return;
                }
                self.set_state(ConnectionState::Connecting);
                self.connect_reply = Some(reply);
                if let Some(timeout) = timeout {
                    self.connect_timeout = timeout;
                    self.connect_deadline = Some(Box::pin(tokio::time::sleep(timeout)));
                }
                let frame = self.session.connect_frame(&login, &passcode);
                self.transmit(frame).await;
            }
            Request::Subscribe {
                destination,
                handler,
                options,
                reply,
            } => {
                let result = if self.disconnecting {
                    Err(StompError::InvalidState("connection is disconnecting"))
                } else {
                    let headers = options.headers.clone();
                    let context = SubscriptionContext { handler, options };
                    Ok(self.subscribe(destination, headers, context).await)
                };
                let _ = reply.send(result);
            }
            Request::Unsubscribe { token, reply } => {
                self.unsubscribe(&token).await;
                let _ = reply.send(());
            }
            Request::Send { frame, reply } => {
                let result = match self.state() {
                    ConnectionState::Connected | ConnectionState::Disconnecting => {
                        self.transmit(frame).await;
                        Ok(())
                    }
                    _ => Err(StompError::InvalidState("not connected")),
                };
                let _ = reply.send(result);
            }
            Request::Disconnect { cause } => self.disconnect(cause).await,
        }
    }

    async fn on_handles_dropped(&mut self) {
        debug!("all connection handles dropped");
        match self.state() {
            ConnectionState::Connected => self.disconnect(None).await,
            ConnectionState::Disconnecting => {}
            _ => {
                self.disconnecting = true;
                self.close_transport().await;
            }
        }
    }

    /// Record a subscription and send SUBSCRIBE when connected.
    async fn subscribe(
        &mut self,
        destination: String,
        mut headers: Vec<(String, String)>,
        context: SubscriptionContext,
    ) -> Token {
        let requested = headers
            .iter()
            .find(|(k, _)| k == headers::ACK)
            .map(|(_, v)| v.clone());
        let ack = match requested {
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!(destination = %destination, ack = %value, "unknown ack mode, treating as auto");
                AckMode::Auto
            }),
            None => {
                let mode = AckMode::default();
                headers.push((headers::ACK.to_string(), mode.as_str().to_string()));
                mode
            }
        };

        let subscription = Subscription {
            destination: destination.clone(),
            handler: context.handler.clone(),
            ack,
            error_destination: context.options.error_destination.clone(),
        };
        let (token, frame) = self.session.subscribe_frame(&destination, headers, context);
        debug!(%token, %ack, "subscribed");
        self.subscriptions.insert(token.clone(), subscription);
        if self.state() == ConnectionState::Connected {
            self.transmit(frame).await;
        }
        token
    }

    async fn unsubscribe(&mut self, token: &Token) {
        match self.session.unsubscribe_frame(token) {
            Ok(frame) => {
                self.subscriptions.remove(token);
                if matches!(
                    self.state(),
                    ConnectionState::Connected | ConnectionState::Disconnecting
                ) {
                    self.transmit(frame).await;
                }
            }
            Err(err) => warn!(error = %err, "ignoring unsubscribe"),
        }
    }

    async fn on_frame(&mut self, frame: Frame) {
        debug!(
            command = %frame.command,
            body = %body_preview(&frame.body, BODY_PREVIEW),
            "received frame"
        );
        let command = match frame.kind() {
            Ok(command) => command,
            Err(err) => return self.fail(err).await,
        };
        match command {
            Command::Connected => self.on_connected(frame).await,
            Command::Message => self.on_message(frame).await,
            Command::Error => self.on_error(frame).await,
            Command::Receipt => {
                info!(
                    receipt = frame.get_header(headers::RECEIPT_ID).unwrap_or_default(),
                    "received RECEIPT"
                );
            }
            other => {
                self.fail(StompError::Frame(format!(
                    "unexpected {} frame from broker",
                    other
                )))
                .await
            }
        }
    }

    async fn on_connected(&mut self, frame: Frame) {
        if self.connect_reply.is_none() {
            return self
                .fail(StompError::Protocol("CONNECTED received while not connecting".into()))
                .await;
        }
        self.connect_deadline = None;
        self.set_state(ConnectionState::Connected);
        info!(
            session = frame.get_header(headers::SESSION).unwrap_or_default(),
            version = frame.get_header("version").unwrap_or_default(),
            "connected"
        );

        for record in self.session.replay(ReplayMode::Keep) {
            debug!(destination = %record.destination, "replaying subscription");
            self.subscribe(record.destination, record.headers, record.context)
                .await;
            if self.closed {
                // the connect outcome is settled when the close is handled
                return;
            }
        }
        if let Some(reply) = self.connect_reply.take() {
            let _ = reply.send(Ok(()));
        }
    }

    async fn on_message(&mut self, frame: Frame) {
        if !matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Disconnecting
        ) {
            return self
                .fail(StompError::Protocol("MESSAGE received before CONNECTED".into()))
                .await;
        }
        let Some(message_id) = frame.get_header(headers::MESSAGE_ID).map(str::to_string) else {
            return self
                .fail(StompError::Frame("MESSAGE frame without message-id header".into()))
                .await;
        };
        let token = match self.session.token(&frame) {
            Ok(token) => token,
            Err(err) => return self.fail(err).await,
        };
        let Some(subscription) = self.subscriptions.get(&token).cloned() else {
            warn!(%token, message_id = %message_id, "no handler for message, dropping it");
            return;
        };
        if self.disconnecting {
            debug!(message_id = %message_id, "disconnecting, ignoring message");
            return;
        }
        if !self.active.insert(message_id.clone()) {
            return self
                .fail(StompError::Protocol(format!(
                    "duplicate message received [message-id={}]",
                    message_id
                )))
                .await;
        }
        let Some(conn) = self.connection() else {
            debug!(message_id = %message_id, "no connection handles left, ignoring message");
            self.active.remove(&message_id);
            return;
        };

        debug!(message_id = %message_id, destination = %subscription.destination, "calling message handler");
        let handler = subscription.handler.clone();
        let message = frame.clone();
        let run = async move { handler.handle(conn, message).await };
        self.handlers.push(
            async move {
                let result = match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => Err("message handler panicked".into()),
                };
                Completion {
                    message: frame,
                    message_id,
                    subscription,
                    result,
                }
            }
            .boxed(),
        );
    }

    async fn on_handler_done(&mut self, done: Completion) {
        let Completion {
            message,
            message_id,
            subscription,
            result,
        } = done;
        match result {
            Ok(()) => {
                debug!(message_id = %message_id, "message handled");
                if subscription.ack.requires_ack() {
                    self.ack(&message).await;
                }
            }
            Err(err) => {
                error!(
                    message_id = %message_id,
                    destination = %subscription.destination,
                    error = %err,
                    "message handler failed"
                );
                let forwarded = match &subscription.error_destination {
                    Some(destination) => {
                        self.forward(destination, &message).await;
                        self.ack(&message).await;
                        true
                    }
                    None => false,
                };
                if !forwarded || self.always_disconnect {
                    self.disconnect(Some(StompError::handler(err))).await;
                }
            }
        }

        self.active.remove(&message_id);
        if self.awaiting_drain && self.active.is_empty() {
            self.finish_disconnect().await;
        }
    }

    async fn ack(&mut self, message: &Frame) {
        match self.session.ack_frame(message) {
            Ok(frame) => self.transmit(frame).await,
            Err(err) => self.fail(err).await,
        }
    }

    async fn forward(&mut self, destination: &str, message: &Frame) {
        debug!(destination, "forwarding failed message");
        let (headers, body) = clone_for_forwarding(message, true);
        let frame = self.session.send_frame(destination, body, headers);
        self.transmit(frame).await;
    }

    async fn on_error(&mut self, frame: Frame) {
        let text = match frame.get_header(headers::MESSAGE) {
            Some(m) => m.to_string(),
            None => String::from_utf8_lossy(&frame.body).into_owned(),
        };
        info!(
            error_message = %text,
            body = %body_preview(&frame.body, BODY_PREVIEW),
            "received ERROR frame"
        );

        if self.connect_reply.is_some() {
            self.connect_error = Some(StompError::Protocol(format!(
                "STOMP error message received while trying to connect: {}",
                text
            )));
            self.close_transport().await;
        } else if is_unsupported_ack_error(&frame) {
            debug!("broker rejected an ACK it did not expect, ignoring");
        } else {
            self.disconnect(Some(StompError::Protocol(format!(
                "STOMP error message received: {}",
                text
            ))))
            .await;
        }
    }

    async fn on_connect_timeout(&mut self) {
        self.connect_deadline = None;
        error!(timeout = ?self.connect_timeout, "CONNECTED not received in time");
        self.connect_error = Some(StompError::ConnectTimeout(self.connect_timeout));
        self.close_transport().await;
    }

    /// Graceful disconnect: drain handlers, then DISCONNECT and close.
    async fn disconnect(&mut self, cause: Option<StompError>) {
        if let Some(cause) = cause {
            self.disconnect_cause.get_or_insert(cause);
        }
        if self.disconnecting {
            return;
        }
        self.disconnecting = true;

        if self.state() != ConnectionState::Connected {
            if self.connect_reply.is_some() {
                let err = self.disconnect_cause.clone().unwrap_or_else(|| {
                    StompError::Connection("disconnected before CONNECTED".into())
                });
                self.connect_error.get_or_insert(err);
            }
            self.close_transport().await;
            return;
        }

        self.set_state(ConnectionState::Disconnecting);
        if self.active.is_empty() {
            self.finish_disconnect().await;
        } else {
            debug!(active = self.active.len(), "waiting for message handlers");
            self.awaiting_drain = true;
        }
    }

    async fn finish_disconnect(&mut self) {
        self.awaiting_drain = false;
        let frame = self.session.disconnect_frame();
        self.transmit(frame).await;
        if self.disconnect_cause.is_none() {
            self.session.replay(ReplayMode::Forget);
            self.subscriptions.clear();
        }
        self.close_transport().await;
    }

    /// Fatal error: record it and close without draining or DISCONNECT.
    async fn fail(&mut self, err: StompError) {
        error!(error = %err, "closing connection");
        if self.connect_reply.is_some() {
            self.connect_error.get_or_insert(err);
        } else {
            self.disconnecting = true;
            self.disconnect_cause.get_or_insert(err);
        }
        self.close_transport().await;
    }

    async fn transmit(&mut self, frame: Frame) {
        if self.closed {
            return;
        }
        debug!(
            command = %frame.command,
            body = %body_preview(&frame.body, BODY_PREVIEW),
            "sending frame"
        );
        if let Err(err) = self.framed.send(StompItem::Frame(frame)).await {
            self.fail(err).await;
        }
    }

    async fn close_transport(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = SinkExt::<StompItem>::close(&mut self.framed).await {
            debug!(error = %err, "error while closing transport");
        }
    }

    fn on_transport_closed(&mut self) {
        self.connect_deadline = None;

        let connect_reply = self.connect_reply.take();
        let connect_failure = connect_reply.as_ref().map(|_| {
            self.connect_error.take().unwrap_or_else(|| {
                error!("connection lost while waiting for CONNECTED");
                StompError::unexpected_loss()
            })
        });

        let outcome = if self.disconnecting {
            match self.disconnect_cause.take() {
                Some(cause) => Err(cause),
                None => Ok(()),
            }
        } else if let Some(err) = &connect_failure {
            Err(err.clone())
        } else {
            warn!("connection lost unexpectedly");
            Err(StompError::unexpected_loss())
        };

        self.set_state(if connect_failure.is_some() {
            ConnectionState::Failed
        } else {
            ConnectionState::Disconnected
        });
        if !self.handlers.is_empty() {
            warn!(count = self.handlers.len(), "dropping unfinished message handlers");
        }
        self.handlers = FuturesUnordered::new();
        self.outcome_tx.send_replace(Some(outcome));
        if let (Some(reply), Some(err)) = (connect_reply, connect_failure) {
            let _ = reply.send(Err(err));
        }
    }
}
