//! Asynchronous STOMP client built around per-subscription message handlers.
//!
//! A [`Connection`] runs one tokio task that owns the transport and a
//! [`Session`]. Messages are passed to the handler registered for their
//! subscription; successful handling is ACKed, failures are forwarded to an
//! error destination or end the connection. A graceful disconnect waits for
//! running handlers first. The session outlives the connection and replays
//! its subscriptions on the next one.
//!
//! ```no_run
//! use stomp_session::{
//!     Connection, ConnectionFactory, Frame, HandlerError, StompConfig, SubscribeOptions,
//! };
//!
//! # async fn run() -> Result<(), stomp_session::StompError> {
//! let factory = ConnectionFactory::new(
//!     StompConfig::new("tcp://localhost:61613").login("guest").passcode("guest"),
//! );
//! let conn = factory.get_connection().await?;
//! conn.subscribe(
//!     "/queue/orders",
//!     |_conn: Connection, msg: Frame| async move {
//!         println!("{}", String::from_utf8_lossy(&msg.body));
//!         Ok::<(), HandlerError>(())
//!     },
//!     SubscribeOptions::new(),
//! )
//! .await?;
//! conn.disconnected().await
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod failover;
pub mod frame;
pub mod parser;
pub mod session;
pub mod subscription;

pub use codec::{StompCodec, StompItem};
pub use config::StompConfig;
pub use connection::{Connection, ConnectionOptions, ConnectionState, is_unsupported_ack_error};
pub use error::{HandlerError, StompError};
pub use factory::ConnectionFactory;
pub use failover::{Broker, FailoverOptions, FailoverUri, Scheme};
pub use frame::{Command, Frame, clone_for_forwarding};
pub use session::{ReplayMode, Session, SubscriptionRecord, Token};
pub use subscription::{AckMode, MessageHandler, SubscribeOptions, SubscriptionContext};
