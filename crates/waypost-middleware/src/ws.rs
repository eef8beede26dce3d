//! JSON-over-WebSocket link to the robot firmware.
//!
//! One [`WsTransport`] wraps one client connection.  Text frames are decoded
//! into [`Inbound`] values as they arrive; control frames are handled by
//! `tungstenite` itself and never surface to callers.  Frames that do not
//! parse are logged and skipped so a single garbled notification cannot
//! derail a wait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use waypost_types::PatrolError;

use crate::discovery::EndpointProvider;
use crate::protocol::{Command, Inbound};
use crate::transport::{Connector, RobotTransport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open WebSocket connection to the robot.
pub struct WsTransport {
    stream: WsStream,
    url: String,
}

impl WsTransport {
    /// Connect to `url` (e.g. `ws://10.0.0.5:9001`).
    ///
    /// # Errors
    ///
    /// Returns [`PatrolError::Transport`] if the TCP connect or the WebSocket
    /// handshake fails.
    pub async fn connect(url: &str) -> Result<Self, PatrolError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| PatrolError::Transport(format!("connect {url}: {e}")))?;
        info!(url, "robot link established");
        Ok(Self {
            stream,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl RobotTransport for WsTransport {
    async fn send(&mut self, command: &Command) -> Result<(), PatrolError> {
        let json = command.to_json()?;
        debug!(cmd = command.name(), "send");
        self.stream
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| PatrolError::Transport(format!("send to {}: {e}", self.url)))
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<Inbound>, PatrolError> {
        let deadline = Instant::now() + timeout;
        loop {
            let Ok(frame) = tokio::time::timeout_at(deadline, self.stream.next()).await else {
                return Ok(None);
            };
            match frame {
                Some(Ok(Message::Text(text))) => match Inbound::decode(text.as_str()) {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) => warn!(url = %self.url, error = %e, "dropping undecodable frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(PatrolError::Transport(format!(
                        "{} closed the connection",
                        self.url
                    )));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(PatrolError::Transport(format!("recv from {}: {e}", self.url)));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), PatrolError> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(PatrolError::Transport(format!("close {}: {e}", self.url))),
        }
    }
}

/// Opens a [`WsTransport`] to whatever endpoint the provider reports.
#[derive(Clone)]
pub struct WsConnector {
    endpoints: Arc<dyn EndpointProvider>,
}

impl WsConnector {
    pub fn new(endpoints: Arc<dyn EndpointProvider>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn RobotTransport>, PatrolError> {
        let endpoint = self.endpoints.resolve().await?;
        let transport = WsTransport::connect(&endpoint.url()).await?;
        Ok(Box::new(transport))
    }
}
