//! Connection behaviour against an in-memory broker.
//!
//! The client side runs over one end of a `tokio::io::duplex` pipe; the test
//! plays the broker on the other end through a `Framed` codec.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use stomp_session::codec::{StompCodec, StompItem};
use stomp_session::{
    AckMode, Connection, ConnectionOptions, ConnectionState, Frame, HandlerError,
    MessageHandler, Session, StompError, SubscribeOptions,
};
use tokio::io::{DuplexStream, duplex};
use tokio::sync::{Semaphore, mpsc};
use tokio::time::timeout;
use tokio_util::codec::Framed;

type Broker = Framed<DuplexStream, StompCodec>;

fn pair_with(session: Session, options: ConnectionOptions) -> (Connection, Broker) {
    let (client, server) = duplex(64 * 1024);
    (
        Connection::open(client, session, options),
        Framed::new(server, StompCodec::new()),
    )
}

fn pair() -> (Connection, Broker) {
    pair_with(Session::new(), ConnectionOptions::default())
}

async fn next_frame(broker: &mut Broker) -> Frame {
    loop {
        match timeout(Duration::from_secs(5), broker.next()).await {
            Ok(Some(Ok(StompItem::Frame(frame)))) => return frame,
            Ok(Some(Ok(StompItem::Heartbeat))) => continue,
            other => panic!("expected a frame, got {:?}", other),
        }
    }
}

async fn expect(broker: &mut Broker, command: &str) -> Frame {
    let frame = next_frame(broker).await;
    assert_eq!(frame.command, command, "unexpected frame:\n{}", frame);
    frame
}

/// The client closed its side without writing anything else.
async fn expect_closed(broker: &mut Broker) {
    loop {
        match timeout(Duration::from_secs(5), broker.next()).await {
            Ok(None) => return,
            Ok(Some(Ok(StompItem::Heartbeat))) => continue,
            other => panic!("expected the client to close, got {:?}", other),
        }
    }
}

async fn expect_silence(broker: &mut Broker) {
    if let Ok(item) = timeout(Duration::from_millis(100), broker.next()).await {
        panic!("expected no traffic, got {:?}", item);
    }
}

async fn push(broker: &mut Broker, frame: Frame) {
    broker.send(StompItem::Frame(frame)).await.unwrap();
}

fn connected() -> Frame {
    Frame::new("CONNECTED")
        .header("version", "1.2")
        .header("session", "session-1")
}

fn message(subscription: &str, destination: &str, id: &str, body: &str) -> Frame {
    Frame::new("MESSAGE")
        .header("subscription", subscription)
        .header("destination", destination)
        .header("message-id", id)
        .set_body(body.as_bytes().to_vec())
}

async fn connect(conn: &Connection, broker: &mut Broker) -> Frame {
    let (result, frame) = tokio::join!(conn.connect("guest", "guest", None), async {
        let frame = expect(broker, "CONNECT").await;
        push(broker, connected()).await;
        frame
    });
    result.unwrap();
    frame
}

async fn wait_for_state(conn: &Connection, state: ConnectionState) {
    timeout(Duration::from_secs(5), async {
        while conn.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("connection never reached {:?}", state));
}

/// Reports each message id on `started`, then waits for a permit on `gate`.
async fn gated(
    gate: Arc<Semaphore>,
    started: mpsc::UnboundedSender<String>,
    msg: Frame,
    fail: bool,
) -> Result<(), HandlerError> {
    let _ = started.send(msg.get_header("message-id").unwrap_or_default().to_string());
    gate.acquire().await?.forget();
    if fail {
        return Err("handler refused the message".into());
    }
    Ok(())
}

fn gated_handler(
    gate: &Arc<Semaphore>,
    fail: bool,
) -> (impl MessageHandler, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let gate = gate.clone();
    let handler = move |_conn: Connection, msg: Frame| gated(gate.clone(), tx.clone(), msg, fail);
    (handler, rx)
}

async fn subscribe(
    conn: &Connection,
    broker: &mut Broker,
    destination: &str,
    handler: impl MessageHandler,
    options: SubscribeOptions,
) -> Frame {
    conn.subscribe(destination, handler, options).await.unwrap();
    expect(broker, "SUBSCRIBE").await
}

#[tokio::test]
async fn connect_sends_credentials_and_replays_nothing_on_fresh_session() {
    let (conn, mut broker) = pair();
    assert_eq!(conn.state(), ConnectionState::Idle);
    let frame = connect(&conn, &mut broker).await;
    assert_eq!(frame.get_header("login"), Some("guest"));
    assert_eq!(frame.get_header("passcode"), Some("guest"));
    assert_eq!(frame.get_header("accept-version"), Some("1.0,1.1,1.2"));
    assert_eq!(conn.state(), ConnectionState::Connected);
    expect_silence(&mut broker).await;
}

#[tokio::test]
async fn second_connect_is_refused() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    match conn.connect("guest", "guest", None).await {
        Err(StompError::InvalidState(_)) => {}
        other => panic!("expected InvalidState, got {:?}", other),
    }
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn subscribe_defaults_to_client_ack() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    let gate = Arc::new(Semaphore::new(0));
    let (handler, _started) = gated_handler(&gate, false);
    let frame = subscribe(&conn, &mut broker, "/queue/a", handler, SubscribeOptions::new()).await;
    assert_eq!(frame.get_header("destination"), Some("/queue/a"));
    assert_eq!(frame.get_header("id"), Some("1"));
    assert_eq!(frame.get_header("ack"), Some("client"));
}

#[tokio::test]
async fn subscribe_before_connect_is_sent_after_connected() {
    let (conn, mut broker) = pair();
    let gate = Arc::new(Semaphore::new(0));
    let (handler, _started) = gated_handler(&gate, false);
    conn.subscribe("/queue/early", handler, SubscribeOptions::new())
        .await
        .unwrap();
    expect_silence(&mut broker).await;

    connect(&conn, &mut broker).await;
    let frame = expect(&mut broker, "SUBSCRIBE").await;
    assert_eq!(frame.get_header("destination"), Some("/queue/early"));
}

#[tokio::test]
async fn disconnect_waits_for_running_handlers() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    let gate = Arc::new(Semaphore::new(0));
    let (handler, mut started) = gated_handler(&gate, false);
    subscribe(&conn, &mut broker, "/queue/a", handler, SubscribeOptions::new()).await;

    push(&mut broker, message("1", "/queue/a", "m-1", "one")).await;
    assert_eq!(started.recv().await.as_deref(), Some("m-1"));

    let closing = conn.clone();
    let disconnect = tokio::spawn(async move { closing.disconnect(None).await });
    wait_for_state(&conn, ConnectionState::Disconnecting).await;

    // nothing is written while the handler runs, and new messages are ignored
    push(&mut broker, message("1", "/queue/a", "m-2", "two")).await;
    expect_silence(&mut broker).await;
    assert!(started.try_recv().is_err());

    gate.add_permits(1);
    let ack = expect(&mut broker, "ACK").await;
    assert_eq!(ack.get_header("id"), Some("m-1"));
    assert_eq!(ack.get_header("message-id"), Some("m-1"));
    assert_eq!(ack.get_header("subscription"), Some("1"));
    expect(&mut broker, "DISCONNECT").await;
    expect_closed(&mut broker).await;

    disconnect.await.unwrap().unwrap();
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    let session = conn.take_session().await.unwrap();
    assert!(session.is_empty(), "clean disconnect forgets subscriptions");
}

#[tokio::test]
async fn only_client_ack_modes_are_acked() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<String>();
    let handler = move |_conn: Connection, msg: Frame| {
        let done_tx = done_tx.clone();
        async move {
            let _ = done_tx.send(msg.get_header("destination").unwrap_or_default().to_string());
            Ok::<(), HandlerError>(())
        }
    };
    subscribe(
        &conn,
        &mut broker,
        "/queue/auto",
        handler.clone(),
        SubscribeOptions::new().ack(AckMode::Auto),
    )
    .await;
    subscribe(
        &conn,
        &mut broker,
        "/queue/individual",
        handler,
        SubscribeOptions::new().ack(AckMode::ClientIndividual),
    )
    .await;

    push(&mut broker, message("1", "/queue/auto", "m-1", "a")).await;
    push(
        &mut broker,
        message("2", "/queue/individual", "m-2", "b").header("ack", "ack-77"),
    )
    .await;
    let mut seen = vec![done_rx.recv().await.unwrap(), done_rx.recv().await.unwrap()];
    seen.sort();
    assert_eq!(seen, vec!["/queue/auto", "/queue/individual"]);

    let ack = expect(&mut broker, "ACK").await;
    assert_eq!(ack.get_header("id"), Some("ack-77"));
    assert_eq!(ack.get_header("message-id"), Some("m-2"));

    conn.disconnect(None).await.unwrap();
    expect(&mut broker, "DISCONNECT").await;
    expect_closed(&mut broker).await;
}

#[tokio::test]
async fn duplicate_message_id_closes_without_disconnect() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    let gate = Arc::new(Semaphore::new(0));
    let (handler, mut started) = gated_handler(&gate, false);
    subscribe(&conn, &mut broker, "/queue/a", handler, SubscribeOptions::new()).await;

    push(&mut broker, message("1", "/queue/a", "m-1", "x")).await;
    assert_eq!(started.recv().await.as_deref(), Some("m-1"));
    push(&mut broker, message("1", "/queue/a", "m-1", "x")).await;

    expect_closed(&mut broker).await;
    match conn.disconnected().await {
        Err(StompError::Protocol(msg)) => assert!(msg.contains("duplicate"), "{}", msg),
        other => panic!("expected protocol error, got {:?}", other),
    }
    assert!(started.try_recv().is_err());
    let session = conn.take_session().await.unwrap();
    assert_eq!(session.len(), 1, "failed connection keeps subscriptions");
}

#[tokio::test]
async fn handler_failure_disconnects_and_keeps_subscriptions() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    let gate = Arc::new(Semaphore::new(1));
    let (handler, _started) = gated_handler(&gate, true);
    subscribe(&conn, &mut broker, "/queue/a", handler, SubscribeOptions::new()).await;

    push(&mut broker, message("1", "/queue/a", "m-1", "x")).await;
    expect(&mut broker, "DISCONNECT").await;
    expect_closed(&mut broker).await;

    match conn.disconnected().await {
        Err(StompError::Handler(err)) => assert!(err.to_string().contains("refused")),
        other => panic!("expected handler error, got {:?}", other),
    }
    assert_eq!(conn.take_session().await.unwrap().len(), 1);
}

#[tokio::test]
async fn handler_panic_counts_as_failure() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    let handler = |_conn: Connection, msg: Frame| async move {
        if msg.body.is_empty() {
            panic!("empty body");
        }
        Ok::<(), HandlerError>(())
    };
    subscribe(&conn, &mut broker, "/queue/a", handler, SubscribeOptions::new()).await;

    push(&mut broker, message("1", "/queue/a", "m-1", "")).await;
    expect(&mut broker, "DISCONNECT").await;
    assert!(matches!(
        conn.disconnected().await,
        Err(StompError::Handler(_))
    ));
}

#[tokio::test]
async fn error_destination_receives_failed_messages() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    let gate = Arc::new(Semaphore::new(1));
    let (handler, _started) = gated_handler(&gate, true);
    subscribe(
        &conn,
        &mut broker,
        "/queue/in",
        handler,
        SubscribeOptions::new().error_destination("/queue/dlq"),
    )
    .await;

    push(
        &mut broker,
        message("1", "/queue/in", "m-1", "payload").header("trace", "t-1"),
    )
    .await;

    let forwarded = expect(&mut broker, "SEND").await;
    assert_eq!(forwarded.get_header("destination"), Some("/queue/dlq"));
    assert_eq!(forwarded.get_header("persistent"), Some("true"));
    assert_eq!(forwarded.get_header("trace"), Some("t-1"));
    assert_eq!(forwarded.get_header("message-id"), None);
    assert_eq!(forwarded.get_header("subscription"), None);
    assert_eq!(forwarded.body, b"payload".to_vec());

    let ack = expect(&mut broker, "ACK").await;
    assert_eq!(ack.get_header("message-id"), Some("m-1"));

    // the connection carries on
    conn.send("/queue/other", "still here", Vec::new()).await.unwrap();
    let sent = expect(&mut broker, "SEND").await;
    assert_eq!(sent.get_header("destination"), Some("/queue/other"));
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn always_disconnect_overrides_error_destination() {
    let options = ConnectionOptions::new().always_disconnect_on_handler_error(true);
    let (conn, mut broker) = pair_with(Session::new(), options);
    connect(&conn, &mut broker).await;
    let gate = Arc::new(Semaphore::new(1));
    let (handler, _started) = gated_handler(&gate, true);
    subscribe(
        &conn,
        &mut broker,
        "/queue/in",
        handler,
        SubscribeOptions::new().error_destination("/queue/dlq"),
    )
    .await;

    push(&mut broker, message("1", "/queue/in", "m-1", "payload")).await;
    expect(&mut broker, "SEND").await;
    expect(&mut broker, "ACK").await;
    expect(&mut broker, "DISCONNECT").await;
    expect_closed(&mut broker).await;
    assert!(matches!(
        conn.disconnected().await,
        Err(StompError::Handler(_))
    ));
}

#[tokio::test]
async fn handler_can_use_its_connection() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    let handler = |conn: Connection, msg: Frame| async move {
        conn.send("/queue/replies", msg.body.clone(), Vec::new())
            .await
            .map_err(HandlerError::from)
    };
    subscribe(&conn, &mut broker, "/queue/requests", handler, SubscribeOptions::new()).await;

    push(&mut broker, message("1", "/queue/requests", "m-1", "ping")).await;
    let reply = expect(&mut broker, "SEND").await;
    assert_eq!(reply.get_header("destination"), Some("/queue/replies"));
    assert_eq!(reply.body, b"ping".to_vec());
    expect(&mut broker, "ACK").await;
}

#[tokio::test]
async fn unsubscribe_known_and_unknown_tokens() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    let gate = Arc::new(Semaphore::new(0));
    let (handler, mut started) = gated_handler(&gate, false);
    let token = conn
        .subscribe("/queue/a", handler, SubscribeOptions::new())
        .await
        .unwrap();
    expect(&mut broker, "SUBSCRIBE").await;

    conn.unsubscribe(&token).await.unwrap();
    let unsub = expect(&mut broker, "UNSUBSCRIBE").await;
    assert_eq!(unsub.get_header("id"), Some("1"));
    assert_eq!(unsub.get_header("destination"), Some("/queue/a"));

    // a second unsubscribe is only logged
    conn.unsubscribe(&token).await.unwrap();
    // late messages for the cancelled subscription are dropped
    push(&mut broker, message("1", "/queue/a", "m-1", "late")).await;
    conn.send("/queue/b", "after", Vec::new()).await.unwrap();
    expect(&mut broker, "SEND").await;
    assert!(started.try_recv().is_err());
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn error_frame_during_connect_fails_connect() {
    let (conn, mut broker) = pair();
    let (result, ()) = tokio::join!(conn.connect("guest", "wrong", None), async {
        expect(&mut broker, "CONNECT").await;
        push(
            &mut broker,
            Frame::new("ERROR")
                .header("message", "Bad credentials")
                .set_body(b"Access refused for user 'guest'".to_vec()),
        )
        .await;
    });
    match result {
        Err(StompError::Protocol(msg)) => {
            assert!(msg.contains("while trying to connect"), "{}", msg);
            assert!(msg.contains("Bad credentials"), "{}", msg);
        }
        other => panic!("expected protocol error, got {:?}", other),
    }
    assert_eq!(conn.state(), ConnectionState::Failed);
    expect_closed(&mut broker).await;
}

#[tokio::test]
async fn error_frame_while_connected_disconnects_with_cause() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    let gate = Arc::new(Semaphore::new(0));
    let (handler, _started) = gated_handler(&gate, false);
    subscribe(&conn, &mut broker, "/queue/a", handler, SubscribeOptions::new()).await;

    push(&mut broker, Frame::new("ERROR").header("message", "queue deleted")).await;
    expect(&mut broker, "DISCONNECT").await;
    expect_closed(&mut broker).await;
    match conn.disconnected().await {
        Err(StompError::Protocol(msg)) => assert!(msg.contains("queue deleted"), "{}", msg),
        other => panic!("expected protocol error, got {:?}", other),
    }
    assert_eq!(conn.take_session().await.unwrap().len(), 1);
}

#[tokio::test]
async fn oversized_content_length_is_fatal_and_keeps_session() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    let gate = Arc::new(Semaphore::new(0));
    let (handler, mut started) = gated_handler(&gate, false);
    subscribe(&conn, &mut broker, "/queue/a", handler, SubscribeOptions::new()).await;

    push(
        &mut broker,
        message("1", "/queue/a", "m-1", "abc").header("content-length", usize::MAX.to_string()),
    )
    .await;
    expect_closed(&mut broker).await;
    match conn.disconnected().await {
        Err(StompError::Frame(msg)) => assert!(msg.contains("out of range"), "{}", msg),
        other => panic!("expected frame error, got {:?}", other),
    }
    assert!(started.try_recv().is_err());
    assert_eq!(conn.take_session().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unexpected_ack_error_is_ignored() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    push(
        &mut broker,
        Frame::new("ERROR").header("message", "Unexpected ACK received for message-id [m-9]"),
    )
    .await;
    conn.send("/queue/a", "alive", Vec::new()).await.unwrap();
    expect(&mut broker, "SEND").await;
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn receipts_are_only_logged() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    push(&mut broker, Frame::new("RECEIPT").header("receipt-id", "r-1")).await;
    conn.send("/queue/a", "alive", Vec::new()).await.unwrap();
    expect(&mut broker, "SEND").await;
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn unknown_command_is_fatal() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    push(&mut broker, Frame::new("NACK").header("id", "1")).await;
    expect_closed(&mut broker).await;
    assert!(matches!(
        conn.disconnected().await,
        Err(StompError::Frame(_))
    ));
}

#[tokio::test]
async fn message_without_id_is_fatal() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    push(
        &mut broker,
        Frame::new("MESSAGE")
            .header("subscription", "1")
            .header("destination", "/queue/a"),
    )
    .await;
    expect_closed(&mut broker).await;
    match conn.disconnected().await {
        Err(StompError::Frame(msg)) => assert!(msg.contains("message-id"), "{}", msg),
        other => panic!("expected frame error, got {:?}", other),
    }
}

#[tokio::test]
async fn connected_twice_is_fatal() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    push(&mut broker, connected()).await;
    expect_closed(&mut broker).await;
    assert!(matches!(
        conn.disconnected().await,
        Err(StompError::Protocol(_))
    ));
}

#[tokio::test]
async fn broker_going_away_is_unexpected_loss() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    let gate = Arc::new(Semaphore::new(0));
    let (handler, _started) = gated_handler(&gate, false);
    subscribe(&conn, &mut broker, "/queue/a", handler, SubscribeOptions::new()).await;
    drop(broker);

    match conn.disconnected().await {
        Err(StompError::Connection(msg)) => assert_eq!(msg, "unexpected connection loss"),
        other => panic!("expected connection error, got {:?}", other),
    }
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.take_session().await.unwrap().len(), 1);

    // the task is gone; requests fail instead of hanging
    assert!(matches!(
        conn.send("/queue/a", "x", Vec::new()).await,
        Err(StompError::Connection(_))
    ));
}

#[tokio::test]
async fn dropping_every_handle_disconnects() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    drop(conn);
    expect(&mut broker, "DISCONNECT").await;
    expect_closed(&mut broker).await;
}

#[tokio::test]
async fn disconnect_is_idempotent_and_keeps_a_late_cause() {
    let (conn, mut broker) = pair();
    connect(&conn, &mut broker).await;
    let gate = Arc::new(Semaphore::new(0));
    let (handler, mut started) = gated_handler(&gate, false);
    subscribe(&conn, &mut broker, "/queue/a", handler, SubscribeOptions::new()).await;
    push(&mut broker, message("1", "/queue/a", "m-1", "x")).await;
    started.recv().await.unwrap();

    let first = conn.clone();
    let first = tokio::spawn(async move { first.disconnect(None).await });
    wait_for_state(&conn, ConnectionState::Disconnecting).await;
    let second = conn.clone();
    let second = tokio::spawn(async move {
        second
            .disconnect(Some(StompError::Protocol("shutting down".into())))
            .await
    });
    expect_silence(&mut broker).await;

    gate.add_permits(1);
    expect(&mut broker, "ACK").await;
    expect(&mut broker, "DISCONNECT").await;
    expect_closed(&mut broker).await;

    // the cause given while draining is the outcome for every caller
    for outcome in [first.await.unwrap(), second.await.unwrap()] {
        match outcome {
            Err(StompError::Protocol(msg)) => assert_eq!(msg, "shutting down"),
            other => panic!("expected the first recorded cause, got {:?}", other),
        }
    }
    assert_eq!(conn.take_session().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_beats_late_connected() {
    let (conn, mut broker) = pair();
    let (result, ()) = tokio::join!(
        conn.connect("guest", "guest", Some(Duration::from_secs(1))),
        async {
            expect(&mut broker, "CONNECT").await;
            tokio::time::sleep(Duration::from_secs(2)).await;
            let _ = broker.send(StompItem::Frame(connected())).await;
        }
    );
    match result {
        Err(StompError::ConnectTimeout(after)) => assert_eq!(after, Duration::from_secs(1)),
        other => panic!("expected connect timeout, got {:?}", other),
    }
    assert_eq!(conn.state(), ConnectionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn connected_in_time_cancels_the_timeout() {
    let (conn, mut broker) = pair();
    let (result, ()) = tokio::join!(
        conn.connect("guest", "guest", Some(Duration::from_secs(1))),
        async {
            expect(&mut broker, "CONNECT").await;
            push(&mut broker, connected()).await;
        }
    );
    result.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(conn.state(), ConnectionState::Connected);

    conn.disconnect(None).await.unwrap();
    expect(&mut broker, "DISCONNECT").await;
}
