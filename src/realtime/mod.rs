//! # Realtime Speech Model Module
//!
//! Everything that talks to the cloud speech-to-speech model, plus the turn-taking
//! logic that decides when to talk to it.
//!
//! ## Key Components:
//! - **Protocol**: typed outbound actions and inbound events
//! - **Session**: one WebSocket connection per call with a non-blocking writer
//! - **Turn**: silence-debounced commit / response-request state machine
//!
//! ## Why Local Turn Detection:
//! The model's server-side voice activity detection is switched off
//! (`turn_detection: null`). Narrowband phone audio makes it unreliable, so the
//! bridge commits the input buffer itself after a short silence instead.

pub mod protocol;   // Wire messages
pub mod session;    // Connection handle and reader/writer tasks
pub mod turn;       // Turn orchestration state machine

pub use protocol::ServerEvent;
pub use session::RealtimeSession;
pub use turn::{DebounceTicket, PlaybackTicket, TurnAction, TurnOrchestrator};
