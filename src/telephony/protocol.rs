//! Media stream messages exchanged with the telephony provider.
//!
//! Inbound messages are discriminated by their `event` field. Only `start`,
//! `media`, `mark` and `stop` matter to the bridge; `connected`, `dtmf` and
//! anything newer fall into [`TwilioInbound::Other`].

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Messages received on the telephony media stream.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TwilioInbound {
    Start {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        #[serde(default)]
        start: StartMetadata,
    },
    Media {
        media: MediaPayload,
    },
    Mark {
        #[serde(default)]
        mark: Option<MarkPayload>,
    },
    Stop {},
    #[serde(other)]
    Other,
}

/// Call metadata carried by `start`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StartMetadata {
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    pub account_sid: Option<String>,
    pub from: Option<String>,
    pub custom_parameters: HashMap<String, String>,
    pub media_format: Option<Value>,
}

/// One inbound chunk of caller audio.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MediaPayload {
    /// Base64 μ-law at 8 kHz
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MarkPayload {
    pub name: String,
}

impl TwilioInbound {
    /// Decode one inbound text message. Malformed messages yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::debug!("Dropping malformed telephony message: {}", e);
                None
            }
        }
    }
}

impl StartMetadata {
    /// Session identifier of a `start`, preferring the top-level field.
    ///
    /// Empty identifiers count as missing.
    pub fn resolve_stream_sid(&self, top_level: Option<&str>) -> Option<String> {
        top_level
            .or(self.stream_sid.as_deref())
            .map(str::trim)
            .filter(|sid| !sid.is_empty())
            .map(str::to_string)
    }
}

impl MediaPayload {
    /// Decode the base64 payload into μ-law bytes.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        B64.decode(&self.payload)
    }
}

/// Messages sent back on the media stream.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TwilioOutbound {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboundMedia {
    pub payload: String,
}

impl TwilioOutbound {
    /// One frame of μ-law audio for the caller.
    pub fn media(stream_sid: &str, mulaw: &[u8]) -> Self {
        TwilioOutbound::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: B64.encode(mulaw),
            },
        }
    }

    pub fn mark(stream_sid: &str, name: &str) -> Self {
        TwilioOutbound::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkPayload {
                name: name.to_string(),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
