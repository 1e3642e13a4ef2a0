use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::error;

use crate::config::{ClientConfig, Endpoint};
use crate::connection::{ConnectionManager, ConnectionState, OutputEvent};
use crate::error::ClientError;
use crate::executor::{CommandExecutor, ServerResponse};
use crate::observers::CallbackDispatcher;
use crate::session::SessionState;

/// A single gotty terminal session.
///
/// ```no_run
/// use gotty_client::{ClientConfig, GottyClient};
///
/// # async fn demo() -> Result<(), gotty_client::ClientError> {
/// let client = GottyClient::new(ClientConfig::new("http://localhost:8222", "admin", "admin"))?;
/// client.connect().await?;
///
/// let response = client.execute("ls", true, None).await;
/// if response.success {
///     println!("{:?}", response.data);
/// }
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct GottyClient {
    config: Arc<ClientConfig>,
    endpoint: Endpoint,
    session: SessionState,
    observers: CallbackDispatcher,
    connection: Arc<ConnectionManager>,
    executor: CommandExecutor,
}

impl GottyClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let endpoint = Endpoint::parse(&config.url)?;
        let config = Arc::new(config);
        let session = SessionState::new();
        let observers = CallbackDispatcher::new();
        let connection = Arc::new(ConnectionManager::new(
            config.clone(),
            endpoint.clone(),
            session.clone(),
            observers.clone(),
        )?);
        let executor =
            CommandExecutor::new(connection.clone(), session.clone(), config.poll_interval);

        Ok(Self {
            config,
            endpoint,
            session,
            observers,
            connection,
            executor,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Check the web UI, open the websocket and send the handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.connection.connect().await
    }

    pub async fn close(&self) {
        self.connection.close().await
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_open()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Send a command line without waiting for output. Returns whether the
    /// frame was handed to the connection.
    pub async fn send(&self, command: &str) -> bool {
        match self.connection.send_input(command).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send command: {}", e);
                false
            }
        }
    }

    /// Send a command and, if asked, wait up to `timeout` (default: the
    /// configured command timeout) for output to follow.
    pub async fn execute(
        &self,
        command: &str,
        wait_for_response: bool,
        timeout: Option<Duration>,
    ) -> ServerResponse {
        let timeout = timeout.unwrap_or(self.config.command_timeout);
        self.executor
            .execute(command, wait_for_response, timeout)
            .await
    }

    /// Recorded output chunks, the most recent `last_n` if given.
    pub async fn get_output(&self, last_n: Option<usize>) -> Vec<String> {
        self.session.snapshot_output(last_n).await
    }

    /// Completed terminal lines, oldest first.
    pub async fn get_history(&self) -> Vec<String> {
        self.session.snapshot_history().await
    }

    pub async fn partial_line(&self) -> String {
        self.session.partial_line().await
    }

    pub async fn window_title(&self) -> Option<String> {
        self.connection.window_title().await
    }

    pub async fn register_output_observer<F>(&self, observer: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.observers.register_output_observer(observer).await
    }

    /// Observers called with every line the terminal completes.
    pub async fn register_command_observer<F>(&self, observer: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.observers.register_command_observer(observer).await
    }

    pub fn subscribe_output(&self) -> broadcast::Receiver<OutputEvent> {
        self.connection.subscribe_output()
    }
}
