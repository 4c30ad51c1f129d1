//! Consume a queue with an error destination and reconnect after failures,
//! carrying the session's subscriptions over to each new connection.

use std::time::Duration;
use stomp_session::{
    AckMode, Connection, ConnectionFactory, Frame, HandlerError, StompConfig, StompError,
    SubscribeOptions,
};

async fn handle(conn: Connection, msg: Frame) -> Result<(), HandlerError> {
    let body = std::str::from_utf8(&msg.body)?;
    let n: u64 = body.trim().parse()?;
    println!("order {} received", n);
    conn.send("/queue/orders.accepted", body.to_owned(), Vec::new())
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), StompError> {
    let factory = ConnectionFactory::new(
        StompConfig::new("failover:(tcp://127.0.0.1:61613)?maxReconnectAttempts=5")
            .login("guest")
            .passcode("guest"),
    )
    .connect_timeout(Duration::from_secs(5));

    let mut conn = factory.get_connection().await?;
    conn.subscribe(
        "/queue/orders",
        handle,
        SubscribeOptions::new()
            .ack(AckMode::ClientIndividual)
            .error_destination("/queue/orders.failed"),
    )
    .await?;

    for attempt in 0u32..5 {
        match conn.disconnected().await {
            Ok(()) => return Ok(()),
            Err(err) => eprintln!("connection ended: {}", err),
        }
        let Some(session) = conn.take_session().await else {
            break;
        };
        tokio::time::sleep(Duration::from_millis(100 << attempt)).await;
        // subscriptions recorded in the session are sent again on CONNECTED
        conn = factory.get_connection_with_session(session).await?;
    }
    Ok(())
}
