use std::time::Duration;

use tokio_tungstenite::tungstenite;

use crate::protocol::DecodeError;

/// Everything that can go wrong between the caller and the gotty server.
///
/// Public client operations never panic on these; they surface as `Err`,
/// `false`, or a failed [`ServerResponse`](crate::ServerResponse).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("web UI is unreachable")]
    Unavailable,

    #[error("web UI not accessible: HTTP {0}")]
    PreflightStatus(u16),

    #[error("preflight request failed: {0}")]
    Preflight(#[source] reqwest::Error),

    #[error("websocket error: {0}")]
    Channel(#[source] tungstenite::Error),

    #[error("timed out opening websocket after {0:?}")]
    ConnectTimeout(Duration),

    #[error("session did not open within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("connection closed before the session opened")]
    ConnectionClosed,

    #[error("not connected to websocket")]
    NotConnected,

    #[error("failed to hand frame to the connection worker")]
    Send,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl ClientError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Preflight(err)
        }
    }

    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::Channel(err)
        }
    }
}

impl From<figment::Error> for ClientError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}
