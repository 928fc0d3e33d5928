//! # Speech Model Session
//!
//! One persistent WebSocket to the realtime speech model per call.
//!
//! ## Task Layout:
//! ```text
//!                 ┌─────────────────┐  unbounded mpsc  ┌─────────────┐
//! append/commit ─▶│ RealtimeSession │ ───────────────▶ │ writer task │──▶ socket sink
//!                 └─────────────────┘                  └─────────────┘
//! socket stream ──▶ reader task ──▶ unbounded mpsc ──▶ ServerEvents (actor stream)
//! ```
//!
//! Callers never await network I/O: sends are queued on the writer's channel and
//! silently dropped once the socket is gone. When the remote closes (or errors)
//! the reader exits, the event stream ends, and the call bridge tears the call
//! down.

use crate::audio::PcmBuffer;
use crate::config::AppConfig;
use crate::realtime::protocol::{ClientEvent, ResponseOptions, ServerEvent, SessionConfig};

use anyhow::{Context as _, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Decoded inbound events. Ends when the speech model connection closes.
pub type ServerEvents = UnboundedReceiverStream<ServerEvent>;

/// Handle to an open speech model connection.
pub struct RealtimeSession {
    tx: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    input_sample_rate: u32,
    voice: String,
    text_only: bool,
}

impl RealtimeSession {
    /// Open the connection and send the session configuration.
    ///
    /// ## Returns:
    /// The session handle plus the stream of decoded inbound events. The
    /// configuration is the first message queued, so it precedes any audio.
    pub async fn connect(config: &AppConfig) -> Result<(Self, ServerEvents)> {
        let endpoint = config.realtime_endpoint()?;
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .context("Invalid realtime endpoint")?;

        if let Some(key) = &config.realtime.api_key {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", key))
                .context("Realtime API key is not a valid header value")?;
            request.headers_mut().insert(AUTHORIZATION, bearer);
        }
        request
            .headers_mut()
            .insert("openai-beta", HeaderValue::from_static("realtime=v1"));

        let timeout = config.realtime_connect_timeout();
        let (socket, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| anyhow::anyhow!("Realtime handshake timed out after {:?}", timeout))?
            .with_context(|| format!("Failed to connect to {}", config.realtime.url))?;
        info!("Realtime session connected: {}", config.realtime.url);

        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<ServerEvent>();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    warn!("Realtime send failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = ServerEvent::parse(&text) {
                            if events_tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        info!("Realtime session closed by remote: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Realtime connection error: {}", e);
                        break;
                    }
                }
            }
        });

        let session = Self {
            tx,
            reader,
            input_sample_rate: config.realtime.input_sample_rate,
            voice: config.realtime.voice.clone(),
            text_only: config.tts.enabled,
        };

        session.send(&ClientEvent::SessionUpdate {
            session: SessionConfig::new(
                &config.realtime.instructions,
                &config.realtime.voice,
                session.text_only,
            ),
        });

        Ok((session, UnboundedReceiverStream::new(events_rx)))
    }

    /// Whether the connection can still carry outbound messages.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Append caller audio, converted to the session input rate.
    pub fn append(&self, pcm: &PcmBuffer) -> bool {
        let wide = pcm.resampled(self.input_sample_rate);
        self.send(&ClientEvent::append(&wide.to_le_bytes()))
    }

    pub fn commit(&self) -> bool {
        self.send(&ClientEvent::InputAudioCommit)
    }

    /// Ask the model to generate a response for the committed audio.
    pub fn request_response(&self) -> bool {
        let options = if self.text_only {
            ResponseOptions {
                modalities: Some(vec!["text".to_string()]),
                voice: None,
            }
        } else {
            ResponseOptions {
                modalities: Some(vec!["audio".to_string(), "text".to_string()]),
                voice: Some(self.voice.clone()),
            }
        };

        self.send(&ClientEvent::ResponseCreate {
            response: Some(options),
        })
    }

    /// Send a close frame. Further sends are dropped.
    pub fn close(&self) {
        if self.is_open() {
            let _ = self.tx.send(Message::Close(None));
        }
    }

    /// Queue one action; returns false if it was dropped.
    fn send(&self, event: &ClientEvent) -> bool {
        if !self.is_open() {
            debug!("Realtime session closed, dropping outbound message");
            return false;
        }

        match event.to_json() {
            Ok(json) => self.tx.send(Message::Text(json)).is_ok(),
            Err(e) => {
                warn!("Failed to serialize realtime message: {}", e);
                false
            }
        }
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
