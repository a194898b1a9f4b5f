use std::time::Duration;

use async_nats::Client;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::messages::{AudioFrameMessage, RelayEvent, RelaySetup, RelaySetupReply, RelaySubjects};
use crate::error::{SessionError, SessionResult};
use crate::live::{
    LiveConfig, LiveConnection, LiveConnector, Outbound, RemoteEvent, EVENT_CAPACITY,
    OUTBOUND_CAPACITY,
};

/// Live sessions brokered by a relay service over NATS
///
/// The relay holds the model credentials. Setup is a request/reply on
/// `live.<session>.setup`; audio goes out on `live.<session>.audio.in` and
/// events come back on `live.<session>.events`.
pub struct NatsRelayConnector {
    url: String,
    handshake_timeout: Duration,
}

impl NatsRelayConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handshake_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    async fn handshake(
        &self,
        client: &Client,
        subjects: &RelaySubjects,
        config: &LiveConfig,
    ) -> SessionResult<()> {
        let payload = serde_json::to_vec(&RelaySetup::from(config))
            .map_err(|e| SessionError::Connection(format!("failed to encode setup: {}", e)))?;

        let reply = timeout(
            self.handshake_timeout,
            client.request(subjects.setup.clone(), payload.into()),
        )
        .await
        .map_err(|_| SessionError::Connection("relay setup timed out".to_string()))?
        .map_err(|e| SessionError::Connection(format!("relay setup failed: {}", e)))?;

        let reply: RelaySetupReply = serde_json::from_slice(&reply.payload)
            .map_err(|e| SessionError::Connection(format!("invalid relay setup reply: {}", e)))?;

        if !reply.accepted {
            return Err(SessionError::Connection(format!(
                "relay rejected session: {}",
                reply.error.unwrap_or_else(|| "no reason given".to_string())
            )));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl LiveConnector for NatsRelayConnector {
    async fn connect(&self, config: &LiveConfig) -> SessionResult<LiveConnection> {
        info!("Connecting to NATS relay at {}", self.url);

        let client = timeout(self.handshake_timeout, async_nats::connect(self.url.as_str()))
            .await
            .map_err(|_| SessionError::Connection("NATS connect timed out".to_string()))?
            .map_err(|e| SessionError::Connection(format!("failed to connect to NATS: {}", e)))?;

        let subjects = RelaySubjects::for_session(&config.session_id);

        // Subscribe before setup so no early event is missed
        let mut subscriber = client
            .subscribe(subjects.events.clone())
            .await
            .map_err(|e| SessionError::Connection(format!("failed to subscribe: {}", e)))?;

        self.handshake(&client, &subjects, config).await?;

        info!("Relay accepted session {}", config.session_id);

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel::<RemoteEvent>(EVENT_CAPACITY);

        // Publisher: session → relay
        let session_id = config.session_id.clone();
        let publisher = client.clone();
        let audio_subject = subjects.audio_in.clone();
        let close_subject = subjects.close.clone();
        tokio::spawn(async move {
            let mut sequence: u32 = 0;

            while let Some(outbound) = outbound_rx.recv().await {
                let chunk = match outbound {
                    Outbound::Audio(chunk) => chunk,
                    Outbound::Close => break,
                };

                let message = AudioFrameMessage {
                    session_id: session_id.clone(),
                    sequence,
                    pcm: chunk.data,
                    mime_type: chunk.mime_type,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    final_frame: false,
                };
                sequence = sequence.wrapping_add(1);

                let payload = match serde_json::to_vec(&message) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Failed to encode audio frame: {}", e);
                        continue;
                    }
                };

                if let Err(e) = publisher.publish(audio_subject.clone(), payload.into()).await {
                    warn!("Failed to publish audio frame {}: {}", sequence, e);
                }
            }

            if let Err(e) = publisher.publish(close_subject, Vec::<u8>::new().into()).await {
                warn!("Failed to publish session close: {}", e);
            }
            if let Err(e) = publisher.flush().await {
                debug!("NATS flush on close: {}", e);
            }
            debug!("Relay publisher stopped after {} frames", sequence);
        });

        // Subscriber: relay → session
        tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                let event = match serde_json::from_slice::<RelayEvent>(&msg.payload) {
                    Ok(event) => RemoteEvent::from(event),
                    Err(e) => {
                        warn!("Failed to parse relay event: {}", e);
                        continue;
                    }
                };

                let terminal = matches!(event, RemoteEvent::Closed { .. } | RemoteEvent::Error(_));
                if events_tx.send(event).await.is_err() || terminal {
                    debug!("Relay subscriber stopped");
                    return;
                }
            }

            let _ = events_tx
                .send(RemoteEvent::Error("relay subscription ended".to_string()))
                .await;
        });

        Ok(LiveConnection::new(outbound_tx, events_rx))
    }

    fn name(&self) -> &str {
        "nats-relay"
    }
}
