pub mod manager;
pub mod mock;
pub mod ws;

use std::time::Duration;

use async_trait::async_trait;
use greenwatch_core::protocol::ProtocolError;
use serde::Serialize;
use tokio::sync::mpsc;

/// Something that happened on an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame, or a binary frame that was valid UTF-8.
    Text(String),
    /// The peer closed the connection.
    Closed,
    /// The connection failed.
    Failed(String),
}

/// An open connection to the push endpoint.
///
/// Dropping the link closes the underlying connection.
pub struct Link {
    pub events: mpsc::Receiver<LinkEvent>,
    pub outbound: mpsc::Sender<String>,
}

/// Trait for opening connections to the push endpoint.
///
/// Implementations spawn whatever background tasks they need and hand back
/// a `Link`. The connection manager owns reconnection, so `open` makes
/// exactly one attempt.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Error type for this transport implementation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Make one connection attempt.
    async fn open(&self) -> Result<Link, Self::Error>;

    /// Human readable endpoint, used in logs.
    fn endpoint(&self) -> &str;
}

/// Lifecycle phase of the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
    Errored,
    /// Waiting out the delay before retry number `attempt`.
    ReconnectWait { attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// Retries after the first failed attempt before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection manager has stopped")]
    Stopped,
    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] ProtocolError),
}
