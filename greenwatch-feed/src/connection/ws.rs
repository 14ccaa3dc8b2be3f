use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream, connect_async, connect_async_tls_with_config,
};
use tracing::{debug, warn};

use super::{Link, LinkEvent, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const LINK_BUFFER: usize = 256;

/// WebSocket transport for `ws://` and `wss://` push endpoints.
pub struct WsTransport {
    url: String,
    tls: Option<Arc<ClientConfig>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        // wss:// handshakes build their rustls config from the process default
        greenwatch_tls::install_crypto_provider();

        Self {
            url: url.into(),
            tls: None,
        }
    }

    /// Use a custom rustls config for `wss://` instead of the bundled web
    /// PKI roots.
    pub fn with_tls(mut self, config: ClientConfig) -> Self {
        self.tls = Some(Arc::new(config));
        self
    }
}

#[async_trait]
impl Transport for WsTransport {
    type Error = tungstenite::Error;

    async fn open(&self) -> Result<Link, Self::Error> {
        let (stream, response) = match &self.tls {
            Some(config) => {
                let connector = Connector::Rustls(Arc::clone(config));
                connect_async_tls_with_config(self.url.as_str(), None, false, Some(connector))
                    .await?
            }
            None => connect_async(self.url.as_str()).await?,
        };
        debug!(status = %response.status(), "WebSocket handshake complete");

        let (events_tx, events_rx) = mpsc::channel(LINK_BUFFER);
        let (outbound_tx, outbound_rx) = mpsc::channel(LINK_BUFFER);
        tokio::spawn(socket_loop(stream, events_tx, outbound_rx));

        Ok(Link {
            events: events_rx,
            outbound: outbound_tx,
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// Translate one websocket message into a link event. Control frames yield
/// `None`.
fn to_event(message: Message) -> Option<LinkEvent> {
    match message {
        Message::Text(text) => Some(LinkEvent::Text(text.as_str().to_owned())),
        Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(LinkEvent::Text(text)),
            Err(_) => {
                warn!(len = bytes.len(), "Dropping binary frame that is not UTF-8");
                None
            }
        },
        Message::Close(frame) => {
            debug!(?frame, "Close frame received");
            Some(LinkEvent::Closed)
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

async fn socket_loop(
    stream: WsStream,
    events: mpsc::Sender<LinkEvent>,
    mut outbound: mpsc::Receiver<String>,
) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            message = read.next() => {
                let event = match message {
                    Some(Ok(message)) => match to_event(message) {
                        Some(event) => event,
                        None => continue,
                    },
                    Some(Err(e)) => LinkEvent::Failed(e.to_string()),
                    None => LinkEvent::Closed,
                };

                let last = !matches!(event, LinkEvent::Text(_));
                if events.send(event).await.is_err() || last {
                    break;
                }
            }
            text = outbound.recv() => match text {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        let _ = events.send(LinkEvent::Failed(e.to_string())).await;
                        break;
                    }
                }
                None => {
                    // link dropped by the manager
                    let _ = write.close().await;
                    break;
                }
            },
        }
    }

    debug!("WebSocket loop finished");
}
