use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use super::messages::{ClientMessage, ServerMessage};
use super::{
    LiveConfig, LiveConnection, LiveConnector, Outbound, RemoteEvent, EVENT_CAPACITY,
    OUTBOUND_CAPACITY,
};
use crate::error::{SessionError, SessionResult};

/// Public Gemini Live websocket endpoint
pub const GEMINI_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Gemini Live over a websocket
pub struct GeminiLiveConnector {
    endpoint: String,
    api_key: String,
    handshake_timeout: Duration,
}

impl GeminiLiveConnector {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }
}

/// Parse a websocket payload; `None` for frames that carry no JSON
fn parse_frame(message: &Message) -> Option<Result<ServerMessage, serde_json::Error>> {
    match message {
        Message::Text(text) => Some(serde_json::from_str(text.as_str())),
        Message::Binary(bytes) => Some(serde_json::from_slice(bytes)),
        _ => None,
    }
}

#[async_trait::async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, config: &LiveConfig) -> SessionResult<LiveConnection> {
        if self.api_key.is_empty() {
            return Err(SessionError::Connection("no API key configured".to_string()));
        }

        info!("Connecting to Gemini Live ({})", config.model);

        // Only the first install wins; later calls are no-ops
        let _ = tokio_rustls::rustls::crypto::aws_lc_rs::default_provider().install_default();

        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let (ws, _response) = timeout(self.handshake_timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| SessionError::Connection("websocket connect timed out".to_string()))?
            .map_err(|e| SessionError::Connection(format!("websocket connect failed: {}", e)))?;

        let (mut sink, mut stream) = ws.split();

        let setup = serde_json::to_string(&ClientMessage::setup(config))
            .map_err(|e| SessionError::Connection(format!("failed to encode setup: {}", e)))?;
        sink.send(Message::Text(setup.into()))
            .await
            .map_err(|e| SessionError::Connection(format!("failed to send setup: {}", e)))?;

        // Wait for setupComplete before streaming anything
        let handshake = async {
            while let Some(frame) = stream.next().await {
                let frame = frame
                    .map_err(|e| SessionError::Connection(format!("handshake failed: {}", e)))?;
                if let Message::Close(close) = &frame {
                    let reason = close
                        .as_ref()
                        .map(|c| format!("{} {}", c.code, c.reason.as_str()))
                        .unwrap_or_else(|| "no reason".to_string());
                    return Err(SessionError::Connection(format!(
                        "endpoint rejected setup: {}",
                        reason
                    )));
                }
                match parse_frame(&frame) {
                    Some(Ok(message)) if message.is_setup_complete() => return Ok(()),
                    Some(Ok(_)) | None => continue,
                    Some(Err(e)) => warn!("Ignoring unparseable handshake frame: {}", e),
                }
            }
            Err(SessionError::Connection(
                "endpoint closed during handshake".to_string(),
            ))
        };
        timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| SessionError::Connection("setup handshake timed out".to_string()))??;

        info!("Gemini Live session {} ready", config.session_id);

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel::<RemoteEvent>(EVENT_CAPACITY);

        // Writer: session → socket
        tokio::spawn(async move {
            while let Some(outbound) = outbound_rx.recv().await {
                match outbound {
                    Outbound::Audio(chunk) => {
                        let frame = match serde_json::to_string(&ClientMessage::audio(chunk)) {
                            Ok(json) => json,
                            Err(e) => {
                                error!("Failed to encode audio frame: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(frame.into())).await {
                            warn!("Live socket send failed: {}", e);
                            break;
                        }
                    }
                    Outbound::Close => break,
                }
            }

            if let Err(e) = sink.close().await {
                debug!("Live socket close: {}", e);
            }
            debug!("Live writer task stopped");
        });

        // Reader: socket → session
        tokio::spawn(async move {
            let terminal = loop {
                let frame = match stream.next().await {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => break RemoteEvent::Error(format!("live socket error: {}", e)),
                    None => break RemoteEvent::Closed { reason: None },
                };

                if let Message::Close(close) = &frame {
                    break RemoteEvent::Closed {
                        reason: close.as_ref().map(|c| c.reason.as_str().to_string()),
                    };
                }

                let message = match parse_frame(&frame) {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        warn!("Ignoring unparseable live frame: {}", e);
                        continue;
                    }
                    None => continue,
                };

                for event in message.into_events() {
                    if events_tx.send(event).await.is_err() {
                        debug!("Live event receiver gone");
                        return;
                    }
                }
            };

            let _ = events_tx.send(terminal).await;
            debug!("Live reader task stopped");
        });

        Ok(LiveConnection::new(outbound_tx, events_rx))
    }

    fn name(&self) -> &str {
        "gemini-live"
    }
}
