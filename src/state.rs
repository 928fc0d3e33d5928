//! # Application State Management
//!
//! Shared state handed to every HTTP handler and every call bridge. Calls never
//! share session data with each other; the only process-wide mutable state is the
//! configuration snapshot and the call counters kept here.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: every handler and call actor holds a cheap clone of the same state
//! - **RwLock**: many readers (health checks) or one writer (a call starting/ending)
//! - **T**: the protected data
//!
//! ### Lock Poisoning
//! A panic while a lock is held "poisons" it. The counters here are plain integers
//! that can't be left half-updated, so a poisoned lock is recovered with
//! `into_inner()` instead of propagating the panic to every later request.

use crate::config::AppConfig;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state shared across handlers and calls.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration, read once per call at connection time
    pub config: Arc<RwLock<AppConfig>>,

    /// Call counters, updated by every bridge
    pub metrics: Arc<RwLock<CallMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all calls since startup.
///
/// ## Why these metrics matter:
/// - **active_calls**: current load, checked against the concurrency limit
/// - **frames_sent / frames_dropped**: whether callers actually hear the assistant
/// - **responses_requested**: turns that reached the speech model
/// - **tts_failures**: synthesis requests that ended a turn silently
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallMetrics {
    pub total_calls: u64,
    pub active_calls: usize,
    pub rejected_calls: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub responses_requested: u64,
    pub tts_failures: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(CallMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately so a long call never blocks readers.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Reserve a slot for a new call.
    ///
    /// ## Returns:
    /// `false` (and counts a rejection) when `max_calls` calls are already active.
    /// The check and the increment happen under one write lock so two simultaneous
    /// upgrades can't both squeeze into the last slot.
    pub fn try_begin_call(&self, max_calls: usize) -> bool {
        let mut metrics = self.write_metrics();
        if metrics.active_calls >= max_calls {
            metrics.rejected_calls += 1;
            return false;
        }
        metrics.active_calls += 1;
        metrics.total_calls += 1;
        true
    }

    /// Release a slot reserved by [`try_begin_call`](AppState::try_begin_call).
    pub fn end_call(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_calls = metrics.active_calls.saturating_sub(1);
    }

    pub fn record_frames_sent(&self, frames: u64) {
        self.write_metrics().frames_sent += frames;
    }

    pub fn record_frames_dropped(&self, frames: u64) {
        self.write_metrics().frames_dropped += frames;
    }

    pub fn record_response_requested(&self) {
        self.write_metrics().responses_requested += 1;
    }

    pub fn record_tts_failure(&self) {
        self.write_metrics().tts_failures += 1;
    }

    /// Consistent copy of the counters for the health endpoints.
    pub fn get_metrics_snapshot(&self) -> CallMetrics {
        self.read_metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, CallMetrics> {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, CallMetrics> {
        self.metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
