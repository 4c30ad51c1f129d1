use chrono::{DateTime, Local};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use stomp_session::Token;
use tokio::sync::Mutex;

/// Maximum number of messages kept for the report
pub const MAX_MESSAGES: usize = 1000;

/// Statistics for a single subscription destination
#[derive(Debug, Clone, Default)]
pub struct SubStats {
    /// Number of messages received on this destination
    pub message_count: u64,
    /// Token of the live subscription, if any
    pub token: Option<Token>,
}

/// A received message as shown in the history
#[derive(Debug, Clone)]
pub struct DisplayMessage {
    pub timestamp: DateTime<Local>,
    pub destination: String,
    /// Message body as string (or description for binary)
    pub body: String,
    pub headers: Vec<(String, String)>,
}

/// State shared between the command loop and message handlers
pub struct AppState {
    pub start_time: DateTime<Local>,
    pub broker: String,
    pub user: String,
    /// destination -> stats
    pub subscriptions: HashMap<String, SubStats>,
    /// Messages (ring buffer)
    pub messages: VecDeque<DisplayMessage>,
    /// Messages the display handler refused
    pub rejected_count: u64,
}

impl AppState {
    pub fn new(broker: String, user: String) -> Self {
        Self {
            start_time: Local::now(),
            broker,
            user,
            subscriptions: HashMap::new(),
            messages: VecDeque::with_capacity(MAX_MESSAGES),
            rejected_count: 0,
        }
    }

    /// Record a received message
    pub fn record_message(&mut self, destination: &str, body: String, headers: Vec<(String, String)>) {
        let stats = self.subscriptions.entry(destination.to_string()).or_default();
        stats.message_count += 1;

        self.messages.push_back(DisplayMessage {
            timestamp: Local::now(),
            destination: destination.to_string(),
            body,
            headers,
        });
        while self.messages.len() > MAX_MESSAGES {
            self.messages.pop_front();
        }
    }

    pub fn record_rejected(&mut self) {
        self.rejected_count += 1;
    }

    /// Remember the token of a new subscription
    pub fn register_subscription(&mut self, destination: &str, token: Token) {
        self.subscriptions.entry(destination.to_string()).or_default().token = Some(token);
    }

    /// Forget the live subscription on `destination`, keeping its counters
    pub fn unregister_subscription(&mut self, destination: &str) -> Option<Token> {
        self.subscriptions.get_mut(destination)?.token.take()
    }

    pub fn total_message_count(&self) -> u64 {
        self.subscriptions.values().map(|s| s.message_count).sum()
    }

    /// Clear message history
    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    pub fn generate_summary(&self) -> String {
        self.generate_summary_with_options(false, 80)
    }

    /// Session report, optionally with the message history
    pub fn generate_summary_with_options(&self, include_messages: bool, max_width: usize) -> String {
        let end_time = Local::now();
        let total_secs = end_time.signed_duration_since(self.start_time).num_seconds();
        let mins = total_secs / 60;
        let secs = total_secs % 60;

        let rule = "═".repeat(max_width);
        let mut lines = vec![
            rule.clone(),
            "  STOMP Session Report".to_string(),
            rule.clone(),
            format!("  Broker:     {}", self.broker),
            format!("  User:       {}", self.user),
            format!("  Started:    {}", self.start_time.format("%Y-%m-%d %H:%M:%S")),
            format!("  Ended:      {}", end_time.format("%Y-%m-%d %H:%M:%S")),
            format!("  Duration:   {}m {}s", mins, secs),
            String::new(),
            "  Subscriptions:".to_string(),
        ];

        // busiest destinations first
        let mut subs: Vec<_> = self.subscriptions.iter().collect();
        subs.sort_by(|a, b| b.1.message_count.cmp(&a.1.message_count).then(a.0.cmp(b.0)));

        let width = subs
            .iter()
            .map(|(d, _)| d.chars().count())
            .max()
            .unwrap_or(20)
            .clamp(5, 40);
        for (dest, stats) in &subs {
            let marker = if stats.token.is_some() { ' ' } else { '-' };
            lines.push(format!(
                "   {}{:width$} {:>6}",
                marker,
                truncate_str(dest, width),
                stats.message_count,
                width = width
            ));
        }
        lines.push(format!("    {:─>width$}", "", width = width + 7));
        lines.push(format!("    {:width$} {:>6}", "Total", self.total_message_count(), width = width));
        lines.push(String::new());
        lines.push(format!("  Rejected messages: {}", self.rejected_count));

        if include_messages && !self.messages.is_empty() {
            lines.push(String::new());
            lines.push("  Message History".to_string());
            for msg in &self.messages {
                let prefix = format!("  {} [{}] ", msg.timestamp.format("%H:%M:%S"), msg.destination);
                let body_width = max_width.saturating_sub(prefix.chars().count());
                lines.push(format!("{}{}", prefix, truncate_str(&msg.body, body_width)));
            }
        }

        lines.push(rule);
        lines.join("\n")
    }
}

/// Truncate to `max_len` characters, marking the cut with "..."
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        ".".repeat(max_len)
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}

/// Thread-safe shared state
pub type SharedState = Arc<Mutex<AppState>>;

pub fn new_shared_state(broker: String, user: String) -> SharedState {
    Arc::new(Mutex::new(AppState::new(broker, user)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded() {
        let mut s = AppState::new("tcp://localhost:61613".into(), "guest".into());
        for i in 0..(MAX_MESSAGES + 5) {
            s.record_message("/queue/a", i.to_string(), Vec::new());
        }
        assert_eq!(s.messages.len(), MAX_MESSAGES);
        assert_eq!(s.total_message_count(), (MAX_MESSAGES + 5) as u64);
        assert_eq!(s.messages.front().map(|m| m.body.as_str()), Some("5"));
    }

    #[test]
    fn unregister_keeps_counts() {
        let mut s = AppState::new("b".into(), "u".into());
        let token = Token {
            destination: "/queue/a".into(),
            id: "1".into(),
        };
        s.register_subscription("/queue/a", token.clone());
        s.record_message("/queue/a", "x".into(), Vec::new());
        assert_eq!(s.unregister_subscription("/queue/a"), Some(token));
        assert_eq!(s.unregister_subscription("/queue/a"), None);
        assert_eq!(s.total_message_count(), 1);
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_str("héllo wörld", 8), "héllo...");
        assert_eq!(truncate_str("abc", 3), "abc");
    }
}
