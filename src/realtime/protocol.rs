//! Wire messages for the realtime speech model.
//!
//! Outbound actions are serialized from [`ClientEvent`]; inbound messages are
//! decoded into [`ServerEvent`] by their `type` discriminant. Event names that
//! changed between API revisions are accepted under both spellings.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session configuration sent once the connection opens.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionConfig {
    pub instructions: String,
    pub voice: String,
    pub modalities: Vec<String>,
    pub input_audio_format: String,
    pub output_audio_format: String,
    /// Always `null`: turns are detected locally by the silence debounce
    pub turn_detection: Option<Value>,
}

impl SessionConfig {
    /// Build a session configuration for either response path.
    ///
    /// With `text_only` set the model is asked for text alone and the audio is
    /// produced by the TTS engine instead.
    pub fn new(instructions: &str, voice: &str, text_only: bool) -> Self {
        let modalities = if text_only {
            vec!["text".to_string()]
        } else {
            vec!["audio".to_string(), "text".to_string()]
        };

        Self {
            instructions: instructions.to_string(),
            voice: voice.to_string(),
            modalities,
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: None,
        }
    }
}

/// Options attached to a `response.create`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ResponseOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// Messages sent to the speech model.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// `audio` is base64 little-endian PCM16 at the session input rate
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseOptions>,
    },
}

impl ClientEvent {
    /// Build an append action from little-endian PCM16 bytes.
    pub fn append(pcm_le: &[u8]) -> Self {
        ClientEvent::InputAudioAppend {
            audio: B64.encode(pcm_le),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Messages received from the speech model.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Base64 PCM16 at the session output rate
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta { delta: String },

    #[serde(
        rename = "response.audio_transcript.delta",
        alias = "response.output_audio_transcript.delta",
        alias = "response.text.delta",
        alias = "response.output_text.delta"
    )]
    TextDelta { delta: String },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<Value>,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<Value>,
    },

    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Decode one inbound text message. Malformed messages yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!("Dropping malformed realtime message: {}", e);
                None
            }
        }
    }

    /// Human-readable message of an `error` event.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ServerEvent::Error { error } => Some(
                error
                    .as_ref()
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown realtime error")
                    .to_string(),
            ),
            _ => None,
        }
    }
}
