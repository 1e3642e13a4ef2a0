//! gotty client - drive a remote terminal served by gotty
//!
//! Speaks gotty's `webtty` websocket protocol: checks credentials against the
//! web UI, opens the websocket, sends command lines, and mirrors the terminal
//! output into a bounded log and a history of completed lines.
//!
//! The protocol has no request/response pairing, so [`GottyClient::execute`]
//! treats the first output that arrives after a command as its response.
//!
//! # Example
//!
//! ```no_run
//! use gotty_client::{ClientConfig, GottyClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gotty_client::ClientError> {
//!     let client = GottyClient::new(ClientConfig::new("http://localhost:8222", "admin", "admin"))?;
//!     client.register_output_observer(|chunk| print!("{chunk}")).await;
//!     client.connect().await?;
//!
//!     let response = client.execute("uname -a", true, None).await;
//!     println!("{} ({})", response.message, response.status_code);
//!     println!("history: {:?}", client.get_history().await);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
mod error;
pub mod executor;
pub mod observers;
pub mod protocol;
pub mod session;

pub use client::GottyClient;
pub use config::{ClientConfig, Endpoint, FileConfig, load_config, read_file_config};
pub use connection::{ConnectionState, OutputEvent};
pub use error::ClientError;
pub use executor::ServerResponse;
pub use session::{HISTORY_LIMIT, OUTPUT_LOG_LIMIT};
