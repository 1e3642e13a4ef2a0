use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::connection::ConnectionManager;
use crate::session::SessionState;

/// Outcome of [`CommandExecutor::execute`].
///
/// `status_code` borrows HTTP conventions: 0 for a local failure, 200 for
/// success (including fire-and-forget sends), 408 when no output arrived in
/// time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResponse {
    pub success: bool,
    pub data: Option<Vec<String>>,
    pub message: String,
    pub status_code: u16,
}

impl ServerResponse {
    pub fn not_connected() -> Self {
        Self::failure("Not connected to WebSocket", 0)
    }

    pub fn send_failed() -> Self {
        Self::failure("Failed to send command", 0)
    }

    pub fn sent() -> Self {
        Self {
            success: true,
            data: None,
            message: "Command sent (no response requested)".to_string(),
            status_code: 200,
        }
    }

    pub fn executed(output: Vec<String>) -> Self {
        Self {
            success: true,
            data: Some(output),
            message: "Command executed successfully".to_string(),
            status_code: 200,
        }
    }

    pub fn timed_out() -> Self {
        Self::failure("Command timed out", 408)
    }

    fn failure(message: &str, status_code: u16) -> Self {
        Self {
            success: false,
            data: None,
            message: message.to_string(),
            status_code,
        }
    }
}

/// Pairs a sent command with the output that follows it.
///
/// The protocol has no end-of-output marker, so "the response" is whatever
/// output arrives first after the command was sent. The executor polls the
/// session at a fixed interval until that happens or the timeout runs out.
pub struct CommandExecutor {
    connection: Arc<ConnectionManager>,
    session: SessionState,
    poll_interval: Duration,
}

impl CommandExecutor {
    pub fn new(
        connection: Arc<ConnectionManager>,
        session: SessionState,
        poll_interval: Duration,
    ) -> Self {
        Self {
            connection,
            session,
            poll_interval,
        }
    }

    pub async fn execute(
        &self,
        command: &str,
        wait_for_response: bool,
        timeout: Duration,
    ) -> ServerResponse {
        if !self.connection.is_open() {
            return ServerResponse::not_connected();
        }

        let mark = self.session.total_appended().await;

        if let Err(e) = self.connection.send_input(command).await {
            error!("Failed to send command: {}", e);
            return ServerResponse::send_failed();
        }

        if !wait_for_response {
            return ServerResponse::sent();
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(output) = self.session.output_since(mark).await {
                debug!("Command {:?} produced {} chunk(s)", command, output.len());
                return ServerResponse::executed(output);
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }

        debug!("Command {:?} timed out after {:?}", command, timeout);
        ServerResponse::timed_out()
    }
}
