//! # Wire Formats and Frame Chunking
//!
//! The telephony leg expects outbound audio in frames of a fixed wall-clock
//! duration. Frame sizes are derived from the [`WireFormat`] table here and nowhere
//! else, so a different carrier format only needs a new table entry.

use std::slice::Chunks;

/// Encoded audio format of one leg of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFormat {
    /// Samples per second
    pub sample_rate: u32,
    /// Encoded bytes per sample (1 for μ-law, 2 for PCM16)
    pub bytes_per_sample: usize,
    /// Playback duration of one outbound frame
    pub frame_ms: u32,
}

/// Telephony media stream: 8 kHz μ-law in 20 ms frames.
pub const TELEPHONY: WireFormat = WireFormat {
    sample_rate: 8_000,
    bytes_per_sample: 1,
    frame_ms: 20,
};

impl WireFormat {
    /// Number of encoded bytes in one frame.
    pub const fn frame_bytes(&self) -> usize {
        self.sample_rate as usize * self.frame_ms as usize / 1000 * self.bytes_per_sample
    }
}

/// Split an encoded buffer into frames of `frame_bytes` bytes.
///
/// Every frame is exactly `frame_bytes` long except possibly the last one. The
/// iterator is lazy and borrows the input, so no audio is copied until a frame is
/// actually sent.
pub fn chunk_frames(buf: &[u8], frame_bytes: usize) -> Chunks<'_, u8> {
    buf.chunks(frame_bytes.max(1))
}
