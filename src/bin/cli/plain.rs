use std::io::{self, BufRead, Write};
use std::time::Duration;
use stomp_session::{ConnectionFactory, StompConfig, StompError};
use tokio::sync::mpsc;

use super::args::Cli;
use super::commands::{CommandResult, SubscribeDefaults, execute_command, print_help, subscribe_destination};
use super::exit_codes;
use super::state::new_shared_state;

/// Run the interactive CLI
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    let config = StompConfig::new(cli.uri.as_str())
        .login(cli.login.as_str())
        .passcode(cli.passcode.as_str());
    let mut factory = ConnectionFactory::new(config);
    if let Some(ms) = cli.timeout_ms {
        factory = factory.connect_timeout(Duration::from_millis(ms));
    }
    let broker = factory
        .broker()
        .map_err(|e| format_connection_error(&e, &cli.uri, true))?;

    println!("Connecting to {}...", broker);
    let conn = factory
        .get_connection()
        .await
        .map_err(|e| format_connection_error(&e, &cli.uri, true))?;
    println!("Connected.");

    let state = new_shared_state(broker.to_string(), cli.login.clone());
    let defaults = SubscribeDefaults {
        ack: cli.ack,
        error_destination: cli.error_destination.clone(),
    };
    for dest in &cli.subscribe {
        subscribe_destination(&conn, dest, &defaults, state.clone())
            .await
            .map_err(|e| format_connection_error(&e, &cli.uri, false))?;
    }

    // Channel to receive user commands from stdin reader
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(16);

    // Spawn blocking stdin reader
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if cmd_tx.blocking_send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!();
    print_help();
    println!();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        tokio::select! {
            line = cmd_rx.recv() => {
                // end of input behaves like quit
                let Some(line) = line else { break };
                match execute_command(&line, &conn, state.clone(), &defaults).await {
                    CommandResult::Ok => {}
                    CommandResult::Quit => break,
                    CommandResult::Error(msg) => eprintln!("{}", msg),
                }
            }
            outcome = conn.disconnected() => {
                println!();
                if cli.summary {
                    println!("{}", state.lock().await.generate_summary());
                }
                return outcome.map_err(|e| format_connection_error(&e, &cli.uri, false));
            }
        }
    }

    println!("Disconnecting...");
    let outcome = conn.disconnect(None).await;
    if cli.summary {
        println!("{}", state.lock().await.generate_summary());
    }
    outcome.map_err(|e| format_connection_error(&e, &cli.uri, false))
}

/// Map an error to a user-facing message and exit code.
///
/// Protocol errors while `connecting` mean the broker refused the session,
/// which is almost always a credentials problem.
pub fn format_connection_error(err: &StompError, uri: &str, connecting: bool) -> (String, u8) {
    match err {
        StompError::Io(io_err) => {
            let message = match io_err.kind() {
                io::ErrorKind::ConnectionRefused => format!("Connection refused: {}", uri),
                io::ErrorKind::TimedOut => format!("Connection timed out: {}", uri),
                _ => format!("Connection failed: {}", io_err),
            };
            (message, exit_codes::NETWORK_ERROR)
        }
        StompError::ConnectTimeout(after) => (
            format!("No CONNECTED from {} within {:?}", uri, after),
            exit_codes::NETWORK_ERROR,
        ),
        StompError::Connection(msg) => (format!("Connection lost: {}", msg), exit_codes::NETWORK_ERROR),
        StompError::Protocol(msg) if connecting => (
            format!("Connection rejected by broker: {}", msg),
            exit_codes::AUTH_ERROR,
        ),
        StompError::Config(msg) => (format!("Configuration error: {}", msg), exit_codes::CONFIG_ERROR),
        other => (format!("Protocol error: {}", other), exit_codes::PROTOCOL_ERROR),
    }
}
