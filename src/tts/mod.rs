//! # Streaming Text-to-Speech Module
//!
//! Optional response path: the speech model answers in text, and the text of each
//! completed turn is synthesized here and streamed back to the caller.
//!
//! ## Request Shape:
//! `POST {url}?output_format={format}` with JSON `{"text": ..., "model_id": ...}`
//! and the API key in a configurable header (`xi-api-key` by default).
//!
//! ## Response Encodings:
//! - **μ-law** (declared by `Content-Type`): chunks are forwarded untouched
//! - **anything else**: treated as little-endian PCM16 at the configured fallback
//!   rate, then resampled to 8 kHz and μ-law encoded chunk by chunk
//!
//! There is no retry. A failed synthesis ends the turn silently.

pub mod normalizer;

pub use normalizer::PcmNormalizer;

use crate::config::TtsConfig;

use anyhow::{Context as _, Result};
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Lazy, finite sequence of μ-law chunks for one utterance.
pub type AudioStream = BoxStream<'static, Result<Vec<u8>, reqwest::Error>>;

/// Encoding of a synthesis response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsEncoding {
    Mulaw,
    Pcm16 { sample_rate: u32 },
}

impl TtsEncoding {
    /// Detect the body encoding from the declared content type.
    pub fn from_content_type(content_type: Option<&str>, fallback_rate: u32) -> Self {
        let declared = content_type.unwrap_or_default().to_ascii_lowercase();
        let is_mulaw = declared.contains("audio/basic")
            || declared.contains("mulaw")
            || declared.contains("ulaw")
            || declared.contains("g711");

        if is_mulaw {
            TtsEncoding::Mulaw
        } else {
            TtsEncoding::Pcm16 {
                sample_rate: fallback_rate,
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_id: Option<&'a str>,
}

/// HTTP client for the streaming TTS engine.
#[derive(Clone)]
pub struct TtsClient {
    http: reqwest::Client,
    config: TtsConfig,
}

impl TtsClient {
    /// Build the client.
    ///
    /// The request timeout covers the whole synthesis including the streamed
    /// body, so an engine that stalls mid-stream still ends the turn.
    pub fn new(config: TtsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create TTS HTTP client")?;

        Ok(Self { http, config })
    }

    /// Start synthesizing `text`.
    ///
    /// Resolves once response headers arrive; the audio itself is pulled lazily
    /// from the returned stream. Errors cover connection failures and non-success
    /// statuses.
    pub async fn synthesize(&self, text: &str) -> Result<AudioStream> {
        let mut request = self
            .http
            .post(&self.config.url)
            .query(&[("output_format", self.config.output_format.as_str())])
            .json(&SynthesisRequest {
                text,
                model_id: self.config.model_id.as_deref(),
            });

        if let Some(key) = &self.config.api_key {
            request = request.header(self.config.api_key_header.as_str(), key.as_str());
        }

        let response = request
            .send()
            .await
            .context("TTS request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("TTS engine returned {}", status);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let encoding =
            TtsEncoding::from_content_type(content_type.as_deref(), self.config.pcm_fallback_rate);
        info!(
            "Synthesizing {} chars ({:?}, content type {:?})",
            text.len(),
            encoding,
            content_type
        );

        let bytes = response.bytes_stream();
        let stream = match encoding {
            TtsEncoding::Mulaw => bytes.map(|chunk| chunk.map(|b| b.to_vec())).boxed(),
            TtsEncoding::Pcm16 { sample_rate } => {
                debug!("Transcoding PCM16 @ {} Hz to μ-law", sample_rate);
                let mut normalizer = PcmNormalizer::new(sample_rate);
                bytes
                    .map(move |chunk| chunk.map(|b| normalizer.push(&b)))
                    .boxed()
            }
        };

        Ok(stream)
    }
}
