//! Websocket lifecycle for one gotty session.
//!
//! A single worker task owns the socket. It opens the channel, sends the
//! handshake, then runs the receive loop. Callers never touch the socket:
//! outbound frames go through an mpsc queue that the worker drains.

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{
    AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL, USER_AGENT,
};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, Endpoint};
use crate::error::ClientError;
use crate::observers::CallbackDispatcher;
use crate::protocol::{self, Frame};
use crate::session::SessionState;

const USER_AGENT_VALUE: &str = concat!("gotty-client/", env!("CARGO_PKG_VERSION"));
const OUTBOUND_CAPACITY: usize = 64;
const OUTPUT_EVENT_CAPACITY: usize = 1024;
const SOCKET_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Lifecycle of the websocket channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Absent,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Decoded output as broadcast to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputEvent {
    pub data: String,
    pub timestamp_ms: i64,
}

/// Everything the receive loop mutates or notifies, shared with the caller side.
#[derive(Clone)]
struct Shared {
    session: SessionState,
    observers: CallbackDispatcher,
    output_tx: broadcast::Sender<OutputEvent>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    title: Arc<RwLock<Option<String>>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Connection state: {:?} -> {:?}", previous, state);
        }
    }
}

struct Worker {
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct ConnectionManager {
    config: Arc<ClientConfig>,
    endpoint: Endpoint,
    http: reqwest::Client,
    shared: Shared,
    worker: Mutex<Option<Worker>>,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<ClientConfig>,
        endpoint: Endpoint,
        session: SessionState,
        observers: CallbackDispatcher,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.preflight_timeout)
            .user_agent(USER_AGENT_VALUE)
            .build()
            .map_err(ClientError::from_reqwest)?;
        let (output_tx, _) = broadcast::channel(OUTPUT_EVENT_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Absent);

        Ok(Self {
            config,
            endpoint,
            http,
            shared: Shared {
                session,
                observers,
                output_tx,
                state_tx: Arc::new(state_tx),
                title: Arc::new(RwLock::new(None)),
            },
            worker: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe_output(&self) -> broadcast::Receiver<OutputEvent> {
        self.shared.output_tx.subscribe()
    }

    /// Latest title announced by the server, if any.
    pub async fn window_title(&self) -> Option<String> {
        self.shared.title.read().await.clone()
    }

    /// Run the preflight check, start the worker and wait for the session to
    /// open. One attempt; nothing is retried.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut worker = self.worker.lock().await;
        if let Some(existing) = worker.as_ref() {
            if !existing.handle.is_finished() && self.is_open() {
                debug!("connect() called on an open session");
                return Ok(());
            }
        }
        // Finished or never opened; make sure nothing is left running
        if let Some(stale) = worker.take() {
            stale.handle.abort();
        }

        self.shared.set_state(ConnectionState::Connecting);

        if let Err(e) = preflight(&self.http, &self.config).await {
            error!("Preflight check failed: {}", e);
            self.shared.set_state(ConnectionState::Closed);
            return Err(e);
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_worker(
            self.config.clone(),
            self.endpoint.clone(),
            self.shared.clone(),
            outbound_rx,
            ready_tx,
            cancel.clone(),
        ));
        *worker = Some(Worker {
            outbound: outbound_tx,
            cancel,
            handle,
        });

        match tokio::time::timeout(self.config.open_wait, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => {
                self.shared.set_state(ConnectionState::Closed);
                Err(ClientError::ConnectionClosed)
            }
            Err(_) => {
                warn!(
                    "Session not open after {:?}, giving up",
                    self.config.open_wait
                );
                if let Some(stale) = worker.take() {
                    stale.handle.abort();
                }
                self.shared.set_state(ConnectionState::Closed);
                Err(ClientError::HandshakeTimeout(self.config.open_wait))
            }
        }
    }

    /// Queue one raw frame for the worker to write.
    pub async fn send_frame(&self, frame: String) -> Result<(), ClientError> {
        if !self.is_open() {
            return Err(ClientError::NotConnected);
        }
        let outbound = match self.worker.lock().await.as_ref() {
            Some(worker) => worker.outbound.clone(),
            None => return Err(ClientError::NotConnected),
        };
        outbound.send(frame).await.map_err(|_| ClientError::Send)
    }

    /// Send one command line (`'1' + command + '\n'`).
    pub async fn send_input(&self, command: &str) -> Result<(), ClientError> {
        debug!("Sending command {:?}", command);
        self.send_frame(protocol::encode_input(command)).await
    }

    /// Stop the worker and close the socket. Safe to call at any time and
    /// any number of times.
    pub async fn close(&self) {
        let Some(mut worker) = self.worker.lock().await.take() else {
            if self.state() != ConnectionState::Absent {
                self.shared.set_state(ConnectionState::Closed);
            }
            return;
        };

        if self.is_open() {
            self.shared.set_state(ConnectionState::Closing);
        }
        worker.cancel.cancel();

        if tokio::time::timeout(self.config.close_grace, &mut worker.handle)
            .await
            .is_err()
        {
            warn!(
                "Connection worker did not stop within {:?}, aborting",
                self.config.close_grace
            );
            worker.handle.abort();
        }
        self.shared.set_state(ConnectionState::Closed);
        info!("WebSocket connection closed");
    }
}

/// HTTP GET against the web UI with basic auth; only a 200 lets the
/// connection proceed.
async fn preflight(http: &reqwest::Client, config: &ClientConfig) -> Result<(), ClientError> {
    let response = http
        .get(&config.url)
        .basic_auth(&config.username, Some(&config.password))
        .send()
        .await
        .map_err(ClientError::from_reqwest)?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(ClientError::PreflightStatus(status.as_u16()));
    }
    Ok(())
}

async fn open_channel(config: &ClientConfig, endpoint: &Endpoint) -> Result<WsStream, ClientError> {
    let mut request = endpoint
        .ws_url
        .as_str()
        .into_client_request()
        .map_err(ClientError::from_tungstenite)?;

    let authorization = protocol::basic_auth_header(&config.username, &config.password);
    let headers = request.headers_mut();
    headers.insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(protocol::SUBPROTOCOL),
    );
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&authorization)
            .map_err(|e| ClientError::InvalidSetting(format!("credentials: {e}")))?,
    );
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

    let limit = config.channel_timeout();
    let (stream, _response) = tokio::time::timeout(limit, tokio_tungstenite::connect_async(request))
        .await
        .map_err(|_| ClientError::ConnectTimeout(limit))?
        .map_err(ClientError::from_tungstenite)?;
    Ok(stream)
}

async fn run_worker(
    config: Arc<ClientConfig>,
    endpoint: Endpoint,
    shared: Shared,
    mut outbound: mpsc::Receiver<String>,
    ready: oneshot::Sender<Result<(), ClientError>>,
    cancel: CancellationToken,
) {
    info!("Connecting to WebSocket: {}", endpoint.ws_url);

    let stream = tokio::select! {
        result = open_channel(&config, &endpoint) => result,
        _ = cancel.cancelled() => Err(ClientError::ConnectionClosed),
    };
    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            error!("WebSocket error: {}", e);
            shared.set_state(ConnectionState::Closed);
            let _ = ready.send(Err(e));
            return;
        }
    };
    let (mut ws_write, mut ws_read) = stream.split();

    let handshake = protocol::encode_handshake(&config.auth_token(), "");
    debug!("Sending handshake");
    if let Err(e) = ws_write.send(Message::Text(handshake.into())).await {
        error!("Failed to send handshake: {}", e);
        shared.set_state(ConnectionState::Closed);
        let _ = ready.send(Err(ClientError::from_tungstenite(e)));
        return;
    }

    shared.set_state(ConnectionState::Open);
    info!("WebSocket connected successfully");
    let _ = ready.send(Ok(()));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Receive loop cancelled");
                break;
            }

            Some(frame) = outbound.recv() => {
                if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
                    warn!("Failed to send frame: {}", e);
                }
            }

            msg = ws_read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_message(&shared, text.as_str()).await {
                            error!("Dropping frame: {}", e);
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if let Err(e) = handle_message(&shared, &String::from_utf8_lossy(&bytes)).await {
                            error!("Dropping frame: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("Server closed the connection: {:?}", frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    shared.set_state(ConnectionState::Closing);
    match tokio::time::timeout(SOCKET_CLOSE_TIMEOUT, ws_write.close()).await {
        Ok(Err(e)) => debug!("Error while closing websocket: {}", e),
        Err(_) => debug!("Timed out closing websocket"),
        Ok(Ok(())) => {}
    }
    shared.set_state(ConnectionState::Closed);
}

/// Apply one inbound message. A frame that fails to decode is returned as
/// `ClientError::Decode` and leaves the session untouched.
async fn handle_message(shared: &Shared, raw: &str) -> Result<(), ClientError> {
    debug!("Raw message received: {:?}", raw);

    let frame = protocol::decode(raw)?;

    match frame {
        Frame::Empty => {}
        Frame::Output(data) => {
            debug!("Decoded output: {:?}", data);
            let completed = shared.session.apply_output(&data).await;

            shared.observers.dispatch_output(&data).await;
            for line in &completed {
                shared.observers.dispatch_command(line).await;
            }

            // Ignore send errors (no subscribers)
            let _ = shared.output_tx.send(OutputEvent {
                data,
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
            });
        }
        Frame::Pong => debug!("Received pong"),
        Frame::SetTitle(title) => {
            debug!("Window title: {}", title);
            *shared.title.write().await = Some(title);
        }
        Frame::SetPreferences(prefs) => debug!("Preferences: {}", prefs),
        Frame::SetReconnect(interval) => debug!("Reconnect: {}", interval),
        Frame::Unknown { tag, payload } => {
            debug!("Unknown message type {:?} ({} bytes)", tag, payload.len());
        }
    }
    Ok(())
}
