use std::fmt;
use std::time::Duration;

use rosapi_transport::TcpTransport;
use rosapi_word::WordConfig;
use serde::{Deserialize, Serialize};

/// Connection and session settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Device host name or address.
    pub host: String,
    /// API service port.
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Login password. Redacted in debug output and never logged.
    pub password: String,
    /// Connect and login timeout. `None` blocks indefinitely.
    pub timeout: Option<Duration>,
    /// Share one connection per host, port and user within a session context.
    pub persistent: bool,
    /// Receive argument values as streams.
    pub streaming_responses: bool,
    /// Word-layer settings (charsets, word ceiling).
    pub word: WordConfig,
}

impl SessionConfig {
    /// Settings for `host` with the default port and timeout.
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Key identifying a persistent connection: `host:port/username`.
    pub fn connection_key(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.username)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: TcpTransport::DEFAULT_PORT,
            username: "admin".to_string(),
            password: String::new(),
            timeout: Some(Duration::from_secs(10)),
            persistent: false,
            streaming_responses: false,
            word: WordConfig::default(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field(
                "password",
                &format_args!("<redacted:{} bytes>", self.password.len()),
            )
            .field("timeout", &self.timeout)
            .field("persistent", &self.persistent)
            .field("streaming_responses", &self.streaming_responses)
            .field("word", &self.word)
            .finish()
    }
}
