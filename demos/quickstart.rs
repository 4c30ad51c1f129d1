use std::time::Duration;
use stomp_session::{
    Connection, ConnectionFactory, Frame, HandlerError, StompConfig, SubscribeOptions,
};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // This demo expects a STOMP broker on localhost:61613 (e.g. ActiveMQ or
    // RabbitMQ with the stomp plugin).
    let factory = ConnectionFactory::new(
        StompConfig::new("tcp://127.0.0.1:61613")
            .login("guest")
            .passcode("guest"),
    )
    .connect_timeout(Duration::from_secs(5));
    let conn = factory.get_connection().await?;

    let (seen_tx, mut seen_rx) = mpsc::channel::<String>(1);
    conn.subscribe(
        "/queue/test",
        move |_conn: Connection, msg: Frame| {
            let seen_tx = seen_tx.clone();
            async move {
                let text = String::from_utf8_lossy(&msg.body).into_owned();
                let _ = seen_tx.send(text).await;
                Ok::<(), HandlerError>(())
            }
        },
        SubscribeOptions::new(),
    )
    .await?;

    conn.send("/queue/test", "hello from stomp-session", Vec::new())
        .await?;

    // Wait for the message to come back, but don't block forever
    match tokio::time::timeout(Duration::from_secs(5), seen_rx.recv()).await {
        Ok(Some(text)) => println!("received: {}", text),
        Ok(None) => println!("handler gone, no message received"),
        Err(_) => println!("timed out waiting for a message"),
    }

    // The handler has finished, so its ACK goes out before DISCONNECT
    conn.disconnect(None).await?;
    Ok(())
}
