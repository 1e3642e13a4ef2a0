//! In-process stand-in for a gotty server.
//!
//! `GET /` checks basic auth like gotty's web UI. `GET /ws` upgrades with the
//! `webtty` sub-protocol, records the handshake, then echoes every input
//! frame back as an output frame. A few magic commands change behaviour:
//!
//! - `silent`  : no output at all
//! - `exit`    : server closes the socket
//! - `burst N` : N separate output frames, one line each
//! - `garbage` : an undecodable output frame followed by `after garbage\n`

#![allow(dead_code)]

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
    routing::get,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};

use gotty_client::protocol;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "s3cret";
pub const TITLE: &str = "bash@fake-gotty";

#[derive(Default)]
pub struct Recorded {
    pub handshakes: Mutex<Vec<String>>,
    pub inputs: Mutex<Vec<String>>,
    pub ws_auth_headers: Mutex<Vec<String>>,
    pub upgrades: AtomicUsize,
}

#[derive(Clone)]
struct ServerState {
    expected_auth: String,
    recorded: Arc<Recorded>,
}

pub struct FakeGotty {
    pub port: u16,
    pub recorded: Arc<Recorded>,
    _shutdown: oneshot::Sender<()>,
}

impl FakeGotty {
    pub async fn spawn() -> Self {
        Self::serve(true).await
    }

    /// Web UI only: the preflight passes but `/ws` is a 404.
    pub async fn spawn_without_websocket() -> Self {
        Self::serve(false).await
    }

    async fn serve(with_websocket: bool) -> Self {
        let recorded = Arc::new(Recorded::default());
        let state = ServerState {
            expected_auth: protocol::basic_auth_header(USERNAME, PASSWORD),
            recorded: recorded.clone(),
        };
        let mut app = Router::new().route("/", get(index));
        if with_websocket {
            app = app.route("/ws", get(upgrade));
        }
        let app = app.with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            port,
            recorded,
            _shutdown: tx,
        }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    pub fn upgrades(&self) -> usize {
        self.recorded.upgrades.load(Ordering::SeqCst)
    }
}

async fn index(State(state): State<ServerState>, headers: HeaderMap) -> impl IntoResponse {
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == state.expected_auth);
    if authorized {
        (StatusCode::OK, "<html>gotty</html>")
    } else {
        (StatusCode::UNAUTHORIZED, "unauthorized")
    }
}

async fn upgrade(
    State(state): State<ServerState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    state.recorded.upgrades.fetch_add(1, Ordering::SeqCst);
    if let Some(auth) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        state
            .recorded
            .ws_auth_headers
            .lock()
            .await
            .push(auth.to_string());
    }
    ws.protocols([protocol::SUBPROTOCOL])
        .on_upgrade(move |socket| session(socket, state.recorded))
}

async fn send_text(socket: &mut WebSocket, text: String) -> bool {
    socket.send(Message::Text(text.into())).await.is_ok()
}

async fn session(mut socket: WebSocket, recorded: Arc<Recorded>) {
    // First message is the handshake
    match socket.recv().await {
        Some(Ok(Message::Text(text))) => {
            recorded.handshakes.lock().await.push(text.as_str().to_string());
        }
        _ => return,
    }
    if !send_text(&mut socket, format!("3{TITLE}")).await {
        return;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let text = text.as_str().to_string();
        recorded.inputs.lock().await.push(text.clone());

        let Some(input) = text.strip_prefix('1') else {
            if text == "2" {
                send_text(&mut socket, "2".to_string()).await;
            }
            continue;
        };
        let command = input.trim_end_matches('\n');

        match command {
            "silent" => {}
            "exit" => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            "garbage" => {
                send_text(&mut socket, "1%%% not base64 %%%".to_string()).await;
                send_text(&mut socket, protocol::encode_output("after garbage\n")).await;
            }
            _ if command.starts_with("burst ") => {
                let count: usize = command["burst ".len()..].parse().unwrap_or(0);
                for i in 0..count {
                    send_text(&mut socket, protocol::encode_output(&format!("line {i}\n"))).await;
                }
            }
            _ => {
                send_text(&mut socket, protocol::encode_output(input)).await;
            }
        }
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}
