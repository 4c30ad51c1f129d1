use clap::Parser;
use stomp_session::AckMode;

fn parse_ack(s: &str) -> Result<AckMode, String> {
    s.parse::<AckMode>().map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(name = "stomp")]
#[command(version)]
#[command(about = "Interactive STOMP client CLI")]
pub struct Cli {
    /// Broker URI (tcp://host:port or a single-broker failover URI)
    #[arg(short, long, default_value = "tcp://127.0.0.1:61613")]
    pub uri: String,

    /// Login username
    #[arg(short, long, default_value = "guest")]
    pub login: String,

    /// Passcode
    #[arg(short, long, default_value = "guest")]
    pub passcode: String,

    /// Destinations to subscribe to (can be specified multiple times)
    #[arg(short, long)]
    pub subscribe: Vec<String>,

    /// Ack mode for subscriptions (auto, client, client-individual)
    #[arg(long, default_value = "client", value_parser = parse_ack)]
    pub ack: AckMode,

    /// Forward messages that fail to display here instead of disconnecting
    #[arg(long)]
    pub error_destination: Option<String>,

    /// Give up when CONNECTED does not arrive within this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Log frames and state changes to stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Show session summary on exit
    #[arg(long)]
    pub summary: bool,
}
