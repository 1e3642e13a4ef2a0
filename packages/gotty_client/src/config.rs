use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ClientError;

// =============================================================================
// File config (figment-deserialized from defaults / gotty.toml / env vars)
// =============================================================================
//
//   gotty.toml:      url = "http://localhost:8222"
//                    username = "admin"
//                    command_timeout_secs = 5.0
//
//   env var:         GOTTY_URL=http://localhost:8222  GOTTY_PASSWORD=secret

/// Tunables as they appear in a config file or the environment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: f64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_command_timeout_secs() -> f64 {
    10.0
}
fn default_poll_interval_ms() -> u64 {
    100
}

/// Build a figment that layers: defaults → config file → `GOTTY_*` env vars.
pub fn load_config(config_file: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("GOTTY_"))
}

/// Extract the layered [`FileConfig`].
pub fn read_file_config(config_file: Option<&Path>) -> Result<FileConfig, ClientError> {
    Ok(load_config(config_file).extract()?)
}

// =============================================================================
// Runtime config
// =============================================================================

/// Session configuration. Fixed once the client is built.
#[derive(Clone)]
pub struct ClientConfig {
    /// Web UI URL, e.g. `http://localhost:8222`
    pub url: String,
    pub username: String,
    pub password: String,
    /// Upper bound on opening the websocket itself. Never longer than
    /// `open_wait` in effect, see [`ClientConfig::channel_timeout`].
    pub connect_timeout: Duration,
    /// How long `connect()` waits for the session to come up, preflight
    /// excluded
    pub open_wait: Duration,
    /// Default wait for `execute()` when the caller passes none
    pub command_timeout: Duration,
    /// How often `execute()` checks for new output
    pub poll_interval: Duration,
    /// Upper bound on the HTTP preflight request
    pub preflight_timeout: Duration,
    /// How long `close()` waits for the receive loop to exit
    pub close_grace: Duration,
}

impl ClientConfig {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            connect_timeout: Duration::from_secs(default_connect_timeout_secs()),
            open_wait: Duration::from_secs(10),
            command_timeout: Duration::from_secs_f64(default_command_timeout_secs()),
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            preflight_timeout: Duration::from_secs(5),
            close_grace: Duration::from_secs(5),
        }
    }

    pub fn from_file(fc: &FileConfig) -> Result<Self, ClientError> {
        let command_timeout = Duration::try_from_secs_f64(fc.command_timeout_secs)
            .map_err(|e| ClientError::InvalidSetting(format!("command_timeout_secs: {e}")))?;
        Ok(Self {
            connect_timeout: Duration::from_secs(fc.connect_timeout_secs),
            command_timeout,
            poll_interval: Duration::from_millis(fc.poll_interval_ms.max(1)),
            ..Self::new(&fc.url, &fc.username, &fc.password)
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_open_wait(mut self, wait: Duration) -> Self {
        self.open_wait = wait;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Limit applied to the websocket open. `connect()` gives up after
    /// `open_wait`, so a longer `connect_timeout` could never fire.
    pub fn channel_timeout(&self) -> Duration {
        self.connect_timeout.min(self.open_wait)
    }

    /// `user:pass`, as carried in the handshake.
    pub fn auth_token(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("open_wait", &self.open_wait)
            .field("command_timeout", &self.command_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("preflight_timeout", &self.preflight_timeout)
            .field("close_grace", &self.close_grace)
            .finish()
    }
}

/// URLs derived from the web UI URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// `scheme://host[:port]`
    pub base_url: String,
    /// `ws(s)://host[:port]/ws`
    pub ws_url: String,
}

impl Endpoint {
    pub fn parse(webui_url: &str) -> Result<Self, ClientError> {
        let url = Url::parse(webui_url)
            .map_err(|e| ClientError::InvalidEndpoint(format!("{webui_url}: {e}")))?;
        let ws_scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(ClientError::InvalidEndpoint(format!(
                    "unsupported scheme '{other}' in {webui_url}"
                )));
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| ClientError::InvalidEndpoint(format!("no host in {webui_url}")))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(Self {
            base_url: format!("{}://{}", url.scheme(), authority),
            ws_url: format!("{ws_scheme}://{authority}/ws"),
        })
    }
}
