//! [`DeviceSession`](eufy_mqtt::DeviceSession) backed by an eufy-security-ws
//! server
//!
//! The server holds the cloud session (credentials, push notifications,
//! P2P links). This crate only speaks its websocket API and keeps a local
//! cache of every station's and device's property metadata and values, so
//! the gateway's synchronous reads never hit the network.

use core::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite;

mod client;
mod messages;

pub use self::client::EufyWs;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("{command} failed: {code}")]
    Command { command: &'static str, code: String },
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("not connected to eufy-security-ws")]
    NotConnected,
}

impl From<Error> for eufy_mqtt::Error {
    fn from(e: Error) -> Self {
        eufy_mqtt::Error::Session(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EufyWsOptions {
    pub url: String,
    /// API schema to request, see the server's `maxSchemaVersion`
    pub schema_version: u32,
    pub request_timeout_ms: u64,
}

impl Default for EufyWsOptions {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3000".to_owned(),
            schema_version: 21,
            request_timeout_ms: 30_000,
        }
    }
}

impl EufyWsOptions {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
