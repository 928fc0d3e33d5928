//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with `APP__` prefix, `__` between nesting levels)
//! - Conventional deployment variables (`HOST`, `PORT`, `OPENAI_API_KEY`, ...)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Conventional variables (`PORT=3000`, `OPENAI_API_KEY=sk-...`)
//! 2. Prefixed environment variables (`APP__TURN__DEBOUNCE_MS=250`)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Why `__` instead of `_`:
//! Most keys here are snake_case (`debounce_ms`, `api_key`), so a single underscore
//! can't tell nesting apart from the key name itself.

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - `server`: where the HTTP/WebSocket listener binds
/// - `realtime`: the cloud speech model connection
/// - `telephony`: the media-stream leg and the call-control webhook
/// - `turn`: turn-taking timing
/// - `tts`: optional text-to-speech engine
/// - `performance`: capacity limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub realtime: RealtimeConfig,
    pub telephony: TelephonyConfig,
    pub turn: TurnConfig,
    pub tts: TtsConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Realtime speech model connection settings.
///
/// ## Fields:
/// - `url`: WebSocket endpoint; the model is appended as `?model=...`
/// - `api_key`: bearer token (usually supplied via `OPENAI_API_KEY`)
/// - `instructions`: behavioral instructions sent in the session configuration
/// - `input_sample_rate`: PCM rate of caller audio appended to the model
/// - `output_sample_rate`: PCM rate of the model's audio deltas
/// - `connect_timeout_secs`: limit on the WebSocket handshake; a stalled
///   handshake ends the call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub instructions: String,
    pub voice: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub connect_timeout_secs: u64,
}

/// Telephony leg settings.
///
/// ## Fields:
/// - `stream_path`: route the media stream WebSocket is served on
/// - `public_ws_url`: externally reachable URL handed to the provider in TwiML;
///   when unset it is derived from the webhook request's Host header
/// - `greeting`: spoken by the provider before the stream connects
/// - `keepalive_interval_secs`: period of the keepalive `mark` on the stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    pub stream_path: String,
    pub public_ws_url: Option<String>,
    pub greeting: String,
    pub keepalive_interval_secs: u64,
}

/// Turn-taking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Silence after the last caller chunk before the turn is committed
    pub debounce_ms: u64,
}

/// Optional streaming text-to-speech engine.
///
/// When enabled the speech model is asked for text only, and the accumulated
/// response text is synthesized here at the end of each turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub enabled: bool,
    pub url: String,
    pub api_key: Option<String>,
    pub api_key_header: String,
    pub model_id: Option<String>,
    /// Requested output encoding, sent as the `output_format` query parameter
    pub output_format: String,
    /// Sample rate assumed when the response isn't declared as μ-law
    pub pcm_fallback_rate: u32,
    pub connect_timeout_secs: u64,
    /// Upper bound on one synthesis, body included
    pub request_timeout_secs: u64,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Calls beyond this limit are refused at WebSocket upgrade time
    pub max_concurrent_calls: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            realtime: RealtimeConfig {
                url: "wss://api.openai.com/v1/realtime".to_string(),
                model: "gpt-4o-realtime-preview".to_string(),
                api_key: None,
                instructions: "You are a warm, concise receptionist. Greet quickly, respond in short natural sentences, and pause to listen.".to_string(),
                voice: "alloy".to_string(),
                input_sample_rate: 16_000,
                output_sample_rate: 24_000,
                connect_timeout_secs: 10,
            },
            telephony: TelephonyConfig {
                stream_path: "/twilio-stream".to_string(),
                public_ws_url: None,
                greeting: "Connecting you now.".to_string(),
                keepalive_interval_secs: 10,
            },
            turn: TurnConfig { debounce_ms: 200 },
            tts: TtsConfig {
                enabled: false,
                url: String::new(),
                api_key: None,
                api_key_header: "xi-api-key".to_string(),
                model_id: None,
                output_format: "ulaw_8000".to_string(),
                pcm_fallback_rate: 16_000,
                connect_timeout_secs: 5,
                request_timeout_secs: 30,
            },
            performance: PerformanceConfig {
                max_concurrent_calls: 50,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP__TTS__ENABLED=true`: Switch to the TTS response path
    /// - `PORT=3000`: Special case for deployment platforms
    /// - `OPENAI_API_KEY=...`: Speech model credential
    /// - `WS_PUBLIC_URL=wss://example.com/twilio-stream`: Stream URL for TwiML
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__"),
            );

        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("OPENAI_API_KEY", "realtime.api_key"),
            ("WS_PUBLIC_URL", "telephony.public_ws_url"),
            ("TTS_API_KEY", "tts.api_key"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.realtime.input_sample_rate == 0 || self.realtime.output_sample_rate == 0 {
            return Err(anyhow::anyhow!("Realtime sample rates must be greater than 0"));
        }

        if !self.realtime.url.starts_with("ws://") && !self.realtime.url.starts_with("wss://") {
            return Err(anyhow::anyhow!(
                "Realtime url must be a ws:// or wss:// endpoint, got '{}'",
                self.realtime.url
            ));
        }

        if !self.telephony.stream_path.starts_with('/') {
            return Err(anyhow::anyhow!("Telephony stream path must start with '/'"));
        }

        if self.telephony.keepalive_interval_secs == 0 {
            return Err(anyhow::anyhow!("Keepalive interval must be greater than 0"));
        }

        if self.turn.debounce_ms == 0 {
            return Err(anyhow::anyhow!("Turn debounce must be greater than 0"));
        }

        if self.tts.enabled && self.tts.url.is_empty() {
            return Err(anyhow::anyhow!("TTS is enabled but no TTS url is configured"));
        }

        if self.tts.pcm_fallback_rate == 0 {
            return Err(anyhow::anyhow!("TTS PCM fallback rate must be greater than 0"));
        }

        if self.realtime.connect_timeout_secs == 0
            || self.tts.connect_timeout_secs == 0
            || self.tts.request_timeout_secs == 0
        {
            return Err(anyhow::anyhow!("Timeouts must be greater than 0"));
        }

        if self.performance.max_concurrent_calls == 0 {
            return Err(anyhow::anyhow!("Max concurrent calls must be greater than 0"));
        }

        Ok(())
    }

    /// Full WebSocket URL of the speech model, model included.
    ///
    /// Parsing normalizes a bare `ws://host:port` to `ws://host:port/`, which the
    /// handshake needs as a request target.
    pub fn realtime_endpoint(&self) -> Result<String> {
        let mut url = reqwest::Url::parse(&self.realtime.url)
            .with_context(|| format!("Invalid realtime url '{}'", self.realtime.url))?;
        url.query_pairs_mut().append_pair("model", &self.realtime.model);
        Ok(url.into())
    }

    pub fn realtime_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.realtime.connect_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.turn.debounce_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.telephony.keepalive_interval_secs)
    }
}
