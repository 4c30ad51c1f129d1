use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info_span};

use crate::config::StompConfig;
use crate::connection::{Connection, ConnectionOptions};
use crate::error::StompError;
use crate::failover::{Broker, FailoverUri, Scheme};
use crate::session::Session;

/// Opens connections to the single broker named by a [`StompConfig`].
///
/// Failover URIs are parsed, but only a single plain `tcp` broker is
/// accepted; anything else is a [`StompError::Config`] error reported
/// before any I/O.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    config: StompConfig,
    connect_timeout: Option<Duration>,
    options: ConnectionOptions,
}

impl ConnectionFactory {
    pub fn new(config: StompConfig) -> Self {
        Self {
            config,
            connect_timeout: None,
            options: ConnectionOptions::default(),
        }
    }

    /// Fail `connect` when CONNECTED does not arrive within `timeout`.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &StompConfig {
        &self.config
    }

    /// The broker this factory connects to.
    pub fn broker(&self) -> Result<Broker, StompError> {
        let parsed = FailoverUri::parse(&self.config.uri)?;
        let [broker] = parsed.brokers.as_slice() else {
            return Err(StompError::Config(format!(
                "failover URI is not supported [{}]",
                self.config.uri
            )));
        };
        if broker.scheme == Scheme::Ssl {
            return Err(StompError::Config(format!(
                "ssl brokers are not supported [{}]",
                broker
            )));
        }
        Ok(broker.clone())
    }

    /// Connect with a fresh session built from the configuration.
    pub async fn get_connection(&self) -> Result<Connection, StompError> {
        self.get_connection_with_session(self.config.session()).await
    }

    /// Connect with `session`, replaying its subscriptions once connected.
    ///
    /// If the handshake fails the session is lost with the connection; use
    /// [`ConnectionFactory::open_connection`] and [`Connection::take_session`]
    /// to keep it.
    pub async fn get_connection_with_session(
        &self,
        session: Session,
    ) -> Result<Connection, StompError> {
        let conn = self.open_connection(session).await?;
        self.handshake(&conn).await
    }

    /// Open TCP to the broker and start a connection without sending CONNECT.
    pub async fn open_connection(&self, session: Session) -> Result<Connection, StompError> {
        let broker = self.broker()?;
        debug!(%broker, "opening transport");
        let stream = TcpStream::connect(broker.address()).await?;
        stream.set_nodelay(true)?;
        Ok(self.open(stream, session, &broker))
    }

    /// Connect over an already open transport.
    pub async fn get_connection_over<T>(
        &self,
        transport: T,
        session: Session,
    ) -> Result<Connection, StompError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let broker = self.broker()?;
        let conn = self.open(transport, session, &broker);
        self.handshake(&conn).await
    }

    fn open<T>(&self, transport: T, session: Session, broker: &Broker) -> Connection
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut options = self.options.clone();
        if options.span.is_none() {
            options.span = Some(info_span!("stomp", broker = %broker));
        }
        Connection::open(transport, session, options)
    }

    async fn handshake(&self, conn: &Connection) -> Result<Connection, StompError> {
        conn.connect(
            self.config.login.as_deref().unwrap_or_default(),
            self.config.passcode.as_deref().unwrap_or_default(),
            self.connect_timeout,
        )
        .await
    }
}
