use std::io::Write;
use stomp_session::{
    AckMode, Connection, Frame, HandlerError, MessageHandler, StompError, SubscribeOptions,
};

use super::state::SharedState;

/// Result of executing a command
pub enum CommandResult {
    /// Command executed successfully
    Ok,
    /// Command requests exit
    Quit,
    /// Error executing command
    Error(String),
}

/// Settings applied to every subscription made from the command line
#[derive(Debug, Clone)]
pub struct SubscribeDefaults {
    pub ack: AckMode,
    pub error_destination: Option<String>,
}

impl SubscribeDefaults {
    fn options(&self) -> SubscribeOptions {
        let options = SubscribeOptions::new().ack(self.ack);
        match &self.error_destination {
            Some(dest) => options.error_destination(dest.clone()),
            None => options,
        }
    }
}

/// Handler that prints text messages and records them in `state`.
///
/// Bodies that are not UTF-8 are rejected so the connection's failure
/// policy applies to them.
pub fn printer(state: SharedState) -> impl MessageHandler {
    move |_conn: Connection, frame: Frame| {
        let state = state.clone();
        async move {
            let dest = frame.get_header("destination").unwrap_or("?").to_string();
            let body = match String::from_utf8(frame.body.clone()) {
                Ok(text) => text,
                Err(_) => {
                    state.lock().await.record_rejected();
                    println!("\n[{}] rejected binary message ({} bytes)", dest, frame.body.len());
                    return Err::<(), HandlerError>("message body is not UTF-8 text".into());
                }
            };
            state
                .lock()
                .await
                .record_message(&dest, body.clone(), frame.headers.clone());

            println!("\n[{}] MESSAGE received:", dest);
            for (k, v) in &frame.headers {
                println!("  {}: {}", k, v);
            }
            if !body.is_empty() {
                println!("  Body: {}", body);
            }
            print!("> ");
            let _ = std::io::stdout().flush();
            Ok(())
        }
    }
}

/// Subscribe to `dest` with the printing handler
pub async fn subscribe_destination(
    conn: &Connection,
    dest: &str,
    defaults: &SubscribeDefaults,
    state: SharedState,
) -> Result<(), StompError> {
    let token = conn
        .subscribe(dest, printer(state.clone()), defaults.options())
        .await?;
    state.lock().await.register_subscription(dest, token);
    println!("Subscribed to: {}", dest);
    Ok(())
}

/// Parse and execute a command
pub async fn execute_command(
    line: &str,
    conn: &Connection,
    state: SharedState,
    defaults: &SubscribeDefaults,
) -> CommandResult {
    let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
    if parts.is_empty() || parts[0].is_empty() {
        return CommandResult::Ok;
    }

    match parts[0] {
        "quit" | "exit" | "q" => CommandResult::Quit,

        "send" => {
            if parts.len() < 3 {
                return CommandResult::Error("Usage: send <destination> <message>".to_string());
            }
            let headers = vec![("content-type".to_string(), "text/plain".to_string())];
            match conn.send(parts[1], parts[2], headers).await {
                Ok(()) => CommandResult::Ok,
                Err(e) => CommandResult::Error(format!("Send error: {}", e)),
            }
        }

        "sub" | "subscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: sub <destination>".to_string());
            }
            match subscribe_destination(conn, parts[1], defaults, state).await {
                Ok(()) => CommandResult::Ok,
                Err(e) => CommandResult::Error(format!("Failed to subscribe to '{}': {}", parts[1], e)),
            }
        }

        "unsub" | "unsubscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: unsub <destination>".to_string());
            }
            let Some(token) = state.lock().await.unregister_subscription(parts[1]) else {
                return CommandResult::Error(format!("Not subscribed to '{}'", parts[1]));
            };
            match conn.unsubscribe(&token).await {
                Ok(()) => {
                    println!("Unsubscribed from: {}", parts[1]);
                    CommandResult::Ok
                }
                Err(e) => CommandResult::Error(format!("Unsubscribe error: {}", e)),
            }
        }

        "summary" => {
            let state = state.lock().await;
            if parts.len() >= 2 {
                let filename = parts[1];
                match std::fs::File::create(filename) {
                    Ok(mut file) => {
                        if let Err(e) = writeln!(file, "{}", state.generate_summary_with_options(true, 80)) {
                            return CommandResult::Error(format!("Failed to write summary: {}", e));
                        }
                        println!("Summary written to {}", filename);
                    }
                    Err(e) => {
                        return CommandResult::Error(format!("Failed to create file: {}", e));
                    }
                }
            } else {
                println!("{}", state.generate_summary());
            }
            CommandResult::Ok
        }

        "clear" => {
            state.lock().await.clear_messages();
            CommandResult::Ok
        }

        "help" | "?" => {
            print_help();
            CommandResult::Ok
        }

        _ => CommandResult::Error(format!("Unknown command: {}. Type 'help' for commands.", parts[0])),
    }
}

/// Print help text
pub fn print_help() {
    println!("Commands:");
    println!("  send <destination> <message>  - Send a message");
    println!("  sub <destination>             - Subscribe to a destination");
    println!("  unsub <destination>           - Cancel a subscription");
    println!("  summary [file]                - Print session summary (or save report to file)");
    println!("  clear                         - Clear message history");
    println!("  quit                          - Disconnect and exit");
}
