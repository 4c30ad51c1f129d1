use crate::frame::headers;
use crate::session::Session;

/// Everything needed to reach a broker and build the CONNECT frame.
///
/// `host` and `accept_version` fall back to `/` and `1.0,1.1,1.2` when
/// unset. Credentials that are unset are left out of CONNECT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StompConfig {
    /// Broker URI, e.g. `tcp://localhost:61613`.
    pub uri: String,
    pub login: Option<String>,
    pub passcode: Option<String>,
    /// Virtual host sent in the `host` header.
    pub host: Option<String>,
    pub accept_version: Option<String>,
    /// `client-id` header, used by some brokers for durable subscriptions.
    pub client_id: Option<String>,
    /// Extra CONNECT headers, appended after the standard ones.
    pub headers: Vec<(String, String)>,
}

impl StompConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn passcode(mut self, passcode: impl Into<String>) -> Self {
        self.passcode = Some(passcode.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn accept_version(mut self, version: impl Into<String>) -> Self {
        self.accept_version = Some(version.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// CONNECT headers other than credentials and `heart-beat`.
    pub fn connect_headers(&self) -> Vec<(String, String)> {
        let mut out = vec![
            (
                headers::ACCEPT_VERSION.to_string(),
                self.accept_version
                    .clone()
                    .unwrap_or_else(|| "1.0,1.1,1.2".to_string()),
            ),
            (
                headers::HOST.to_string(),
                self.host.clone().unwrap_or_else(|| "/".to_string()),
            ),
        ];
        if let Some(id) = &self.client_id {
            out.push((headers::CLIENT_ID.to_string(), id.clone()));
        }
        out.extend(self.headers.iter().cloned());
        out
    }

    /// A fresh session that connects with this configuration.
    pub fn session(&self) -> Session {
        Session::with_connect_headers(self.connect_headers())
    }
}
