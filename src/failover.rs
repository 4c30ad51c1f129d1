//! Broker URIs in the `failover:` notation used by ActiveMQ clients.
//!
//! ```text
//! failover:(tcp://primary:61613,tcp://backup:61613)?randomize=false,maxReconnectAttempts=3
//! failover:tcp://primary:61613,tcp://backup:61613
//! tcp://localhost:61613
//! ```
//!
//! Only parsing lives here; retrying brokers is left to the caller.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::StompError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Ssl,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::Ssl => "ssl",
        }
    }
}

/// One broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Broker {
    /// `host:port`, bracketing IPv6 literals, suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.address())
    }
}

impl FromStr for Broker {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| StompError::Config(format!("invalid broker uri '{}'", s)))?;
        let scheme = match scheme {
            "tcp" => Scheme::Tcp,
            "ssl" => Scheme::Ssl,
            other => {
                return Err(StompError::Config(format!(
                    "unsupported scheme '{}' in broker uri '{}'",
                    other, s
                )));
            }
        };
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| StompError::Config(format!("missing port in broker uri '{}'", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(StompError::Config(format!("missing host in broker uri '{}'", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| StompError::Config(format!("invalid port '{}' in broker uri '{}'", port, s)))?;
        Ok(Broker {
            scheme,
            host: host.to_string(),
            port,
        })
    }
}

/// Reconnect policy carried by the URI's query.
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverOptions {
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub use_exponential_back_off: bool,
    pub back_off_multiplier: f64,
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Overrides `max_reconnect_attempts` before the first successful
    /// connection; `None` retries forever, `Some(0)` defers to
    /// `max_reconnect_attempts`.
    pub startup_max_reconnect_attempts: Option<u32>,
    pub reconnect_delay_jitter: Duration,
    pub randomize: bool,
    pub priority_backup: bool,
}

impl Default for FailoverOptions {
    fn default() -> Self {
        Self {
            initial_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(30_000),
            use_exponential_back_off: true,
            back_off_multiplier: 2.0,
            max_reconnect_attempts: None,
            startup_max_reconnect_attempts: Some(0),
            reconnect_delay_jitter: Duration::ZERO,
            randomize: true,
            priority_backup: false,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, StompError> {
    value
        .parse()
        .map_err(|_| StompError::Config(format!("invalid value '{}' for option {}", value, key)))
}

/// Negative counts mean "no limit".
fn parse_attempts(key: &str, value: &str) -> Result<Option<u32>, StompError> {
    let n: i64 = parse_value(key, value)?;
    if n < 0 {
        return Ok(None);
    }
    u32::try_from(n)
        .map(Some)
        .map_err(|_| StompError::Config(format!("value '{}' for option {} is too large", value, key)))
}

impl FailoverOptions {
    fn set(&mut self, key: &str, value: &str) -> Result<(), StompError> {
        match key {
            "initialReconnectDelay" => {
                self.initial_reconnect_delay = Duration::from_millis(parse_value(key, value)?)
            }
            "maxReconnectDelay" => {
                self.max_reconnect_delay = Duration::from_millis(parse_value(key, value)?)
            }
            "useExponentialBackOff" => self.use_exponential_back_off = parse_value(key, value)?,
            "backOffMultiplier" => {
                let m: f64 = parse_value(key, value)?;
                if !m.is_finite() || m < 1.0 {
                    return Err(StompError::Config(format!(
                        "backOffMultiplier must be at least 1, got {}",
                        value
                    )));
                }
                self.back_off_multiplier = m;
            }
            "maxReconnectAttempts" => self.max_reconnect_attempts = parse_attempts(key, value)?,
            "startupMaxReconnectAttempts" => {
                self.startup_max_reconnect_attempts = parse_attempts(key, value)?
            }
            "reconnectDelayJitter" => {
                self.reconnect_delay_jitter = Duration::from_millis(parse_value(key, value)?)
            }
            "randomize" => self.randomize = parse_value(key, value)?,
            "priorityBackup" => self.priority_backup = parse_value(key, value)?,
            other => {
                return Err(StompError::Config(format!("unknown failover option '{}'", other)));
            }
        }
        Ok(())
    }

    /// Delay before reconnect attempt `attempt` (0 based), without jitter.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        if !self.use_exponential_back_off {
            return self.initial_reconnect_delay.min(self.max_reconnect_delay);
        }
        let factor = self.back_off_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.initial_reconnect_delay.as_millis() as f64 * factor;
        let max = self.max_reconnect_delay.as_millis() as f64;
        Duration::from_millis(millis.min(max) as u64)
    }
}

/// A parsed failover URI.
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverUri {
    pub uri: String,
    pub brokers: Vec<Broker>,
    pub options: FailoverOptions,
}

impl FailoverUri {
    pub fn parse(uri: &str) -> Result<Self, StompError> {
        let trimmed = uri.trim();
        let (list, query) = match trimmed.strip_prefix("failover:") {
            Some(rest) => {
                if let Some(inner) = rest.strip_prefix('(') {
                    let (list, tail) = inner.split_once(')').ok_or_else(|| {
                        StompError::Config(format!("unbalanced parenthesis in '{}'", uri))
                    })?;
                    let query = match tail {
                        "" => None,
                        t => Some(t.strip_prefix('?').ok_or_else(|| {
                            StompError::Config(format!("unexpected '{}' after broker list", t))
                        })?),
                    };
                    (list, query)
                } else {
                    match rest.split_once('?') {
                        Some((list, query)) => (list, Some(query)),
                        None => (rest, None),
                    }
                }
            }
            None => (trimmed, None),
        };

        let brokers = list
            .split(',')
            .filter(|b| !b.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Broker>, _>>()?;
        if brokers.is_empty() {
            return Err(StompError::Config(format!("no broker in uri '{}'", uri)));
        }

        let mut options = FailoverOptions::default();
        if let Some(query) = query {
            for pair in query.split(['&', ',']).filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    StompError::Config(format!("failover option '{}' has no value", pair))
                })?;
                options.set(key.trim(), value.trim())?;
            }
        }

        Ok(FailoverUri {
            uri: uri.to_string(),
            brokers,
            options,
        })
    }
}

impl FromStr for FailoverUri {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FailoverUri::parse(s)
    }
}
