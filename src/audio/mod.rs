//! # Audio Transcoding Module
//!
//! Stateless building blocks that move call audio between the telephony leg and the
//! speech model. Nothing in here owns session data; the call bridge invokes these
//! functions by reference for every chunk it forwards.
//!
//! ## Key Components:
//! - **Codec**: μ-law ⇄ 16-bit linear PCM companding
//! - **Resampler**: linear-interpolation rate conversion (8/16/24 kHz)
//! - **Frames**: wire-format table and fixed-duration frame chunking
//! - **Buffer**: rate-tagged PCM and μ-law buffers tying the pieces together
//!
//! ## Audio Formats in Play:
//! - **Telephony leg**: 8 kHz, 8-bit μ-law, 20 ms frames (160 bytes)
//! - **Speech model input**: 16-bit little-endian PCM, 16 kHz by default
//! - **Speech model output**: 16-bit little-endian PCM, 24 kHz

pub mod buffer;     // Rate-tagged PCM / μ-law buffers
pub mod codec;      // μ-law companding
pub mod frames;     // Wire format table and frame chunking
pub mod resample;   // Linear-interpolation resampler

pub use buffer::{MulawBuffer, PcmBuffer};
pub use frames::{chunk_frames, TELEPHONY};
