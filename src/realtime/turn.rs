//! # Turn Orchestration
//!
//! Phone audio arrives as an endless stream of 20 ms chunks with no end-of-utterance
//! marker. The orchestrator turns that stream into discrete turns: every caller
//! chunk re-arms a silence debounce, and when the debounce finally expires the
//! buffered audio is committed and (at most once per turn) a response is requested.
//!
//! ## State Transitions:
//! ```text
//! Idle ──audio──▶ Accumulating ──debounce──▶ Committed ──request──▶ AwaitingResponse
//!   ▲                  ▲ (any state, on audio)                           │
//!   │                  │                                         delta   ▼
//!   └──────────────── completion ◀──────────────────────────────── Responding
//! ```
//!
//! The orchestrator is pure: it never touches a socket or a timer. It hands back
//! [`TurnAction`]s and [`DebounceTicket`]s and the call bridge carries them out.

use std::time::Duration;

/// Where the current turn stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No buffered caller audio, no timer running
    Idle,
    /// Caller audio arriving; the debounce is armed
    Accumulating,
    /// Buffer committed, but the assistant is still speaking so no request was made
    Committed,
    /// Generation requested, waiting for the first response event
    AwaitingResponse,
    /// Assistant audio or text is arriving (or synthesized audio is playing)
    Responding,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Accumulating => "accumulating",
            TurnState::Committed => "committed",
            TurnState::AwaitingResponse => "awaiting_response",
            TurnState::Responding => "responding",
        }
    }
}

/// Side effects the bridge must perform on the orchestrator's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    /// Send `input_audio_buffer.commit`
    Commit,
    /// Send `response.create`
    RequestResponse,
    /// Synthesize the accumulated response text through the TTS engine
    Synthesize { text: String, playback: PlaybackTicket },
}

/// Identifies one arming of the debounce timer.
///
/// Only the most recently issued ticket is live; expiring an older one is a no-op,
/// so a timer that slipped past cancellation can never produce a second commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceTicket {
    generation: u64,
    pub delay: Duration,
}

/// Identifies one synthesized playback.
///
/// A newer synthesis supersedes an older one; audio or completion reported for a
/// superseded playback must not touch the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackTicket(u64);

/// Per-call turn-taking state machine.
#[derive(Debug)]
pub struct TurnOrchestrator {
    state: TurnState,
    /// A generation request is outstanding for this turn
    requested: bool,
    /// Assistant output is still streaming to the caller
    ai_speaking: bool,
    /// Response text is kept for the TTS path
    accumulate_text: bool,
    response_text: String,
    debounce: Duration,
    generation: u64,
    armed: Option<u64>,
    playbacks: u64,
    playing: Option<u64>,
}

impl TurnOrchestrator {
    pub fn new(debounce: Duration, accumulate_text: bool) -> Self {
        Self {
            state: TurnState::Idle,
            requested: false,
            ai_speaking: false,
            accumulate_text,
            response_text: String::new(),
            debounce,
            generation: 0,
            armed: None,
            playbacks: 0,
            playing: None,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }

    pub fn is_ai_speaking(&self) -> bool {
        self.ai_speaking
    }

    pub fn response_text(&self) -> &str {
        &self.response_text
    }

    /// A caller audio chunk arrived. Re-arms the debounce in every state.
    pub fn on_caller_audio(&mut self) -> DebounceTicket {
        self.generation += 1;
        self.armed = Some(self.generation);
        self.state = TurnState::Accumulating;

        DebounceTicket {
            generation: self.generation,
            delay: self.debounce,
        }
    }

    /// The debounce armed with `ticket` expired.
    ///
    /// ## Behavior:
    /// - Superseded tickets do nothing
    /// - With the speech model connection down, the turn is dropped back to `Idle`
    /// - Otherwise the buffer is committed, and a response is requested only if the
    ///   assistant isn't speaking and no request is outstanding
    pub fn on_debounce_elapsed(&mut self, ticket: DebounceTicket, connected: bool) -> Vec<TurnAction> {
        if self.armed != Some(ticket.generation) {
            return Vec::new();
        }
        self.armed = None;

        if !connected {
            self.state = if self.ai_speaking {
                TurnState::Responding
            } else {
                TurnState::Idle
            };
            return Vec::new();
        }

        let mut actions = vec![TurnAction::Commit];
        self.state = TurnState::Committed;

        if !self.ai_speaking && !self.requested {
            actions.push(TurnAction::RequestResponse);
            self.requested = true;
            self.state = TurnState::AwaitingResponse;
        } else if !self.ai_speaking {
            self.state = TurnState::AwaitingResponse;
        }

        actions
    }

    /// An assistant audio delta arrived.
    pub fn on_response_audio(&mut self) {
        self.mark_responding();
    }

    /// An assistant transcript/text delta arrived.
    pub fn on_response_text(&mut self, delta: &str) {
        self.mark_responding();
        if self.accumulate_text {
            self.response_text.push_str(delta);
        }
    }

    /// The speech model reported the response complete.
    ///
    /// On the TTS path with text accumulated, the text is handed back for synthesis
    /// and the turn stays `Responding` until [`on_playback_finished`] is called.
    ///
    /// [`on_playback_finished`]: TurnOrchestrator::on_playback_finished
    pub fn on_response_done(&mut self) -> Option<TurnAction> {
        self.requested = false;
        let text = std::mem::take(&mut self.response_text);

        if self.accumulate_text && !text.trim().is_empty() {
            self.ai_speaking = true;
            if self.state != TurnState::Accumulating {
                self.state = TurnState::Responding;
            }
            self.playbacks += 1;
            self.playing = Some(self.playbacks);
            return Some(TurnAction::Synthesize {
                text,
                playback: PlaybackTicket(self.playbacks),
            });
        }

        self.ai_speaking = false;
        self.settle();
        None
    }

    /// Whether `playback` is the synthesis currently allowed to play.
    pub fn is_current_playback(&self, playback: PlaybackTicket) -> bool {
        self.playing == Some(playback.0)
    }

    /// Synthesized audio finished streaming (or synthesis failed).
    ///
    /// Returns false, changing nothing, when `playback` was superseded.
    pub fn on_playback_finished(&mut self, playback: PlaybackTicket) -> bool {
        if !self.is_current_playback(playback) {
            return false;
        }
        self.playing = None;
        self.ai_speaking = false;
        self.settle();
        true
    }

    fn mark_responding(&mut self) {
        self.ai_speaking = true;
        if self.state != TurnState::Accumulating {
            self.state = TurnState::Responding;
        }
    }

    /// Return to `Idle` unless the caller is mid-utterance with the debounce armed.
    fn settle(&mut self) {
        self.state = if self.armed.is_some() {
            TurnState::Accumulating
        } else {
            TurnState::Idle
        };
    }
}
