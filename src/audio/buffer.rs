//! # Audio Buffers
//!
//! Rate-tagged audio buffers passed between the legs of a call. Buffers are
//! immutable once built: every conversion (decode, resample, encode) produces a new
//! buffer instead of mutating in place.
//!
//! ## Representations:
//! - **PcmBuffer**: signed 16-bit linear samples plus their sample rate
//! - **MulawBuffer**: 8-bit μ-law bytes, always at the telephony rate
//!
//! ## Wire Byte Order:
//! Both the speech model and raw-PCM TTS responses use little-endian PCM16, so
//! the byte conversions here are little-endian only.

use crate::audio::{codec, resample::resample, TELEPHONY};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Linear PCM samples tagged with their sample rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBuffer {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl PcmBuffer {
    /// Wrap already-decoded samples.
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Parse little-endian PCM16 bytes.
    ///
    /// ## Odd Lengths:
    /// A trailing odd byte cannot form a sample and is ignored here. Streaming
    /// callers that must keep it carry it forward themselves (see the TTS
    /// normalizer).
    pub fn from_le_bytes(data: &[u8], sample_rate: u32) -> Self {
        let mut cursor = Cursor::new(data);
        let mut samples = Vec::with_capacity(data.len() / 2);

        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            samples.push(sample);
        }

        Self { samples, sample_rate }
    }

    /// Serialize to little-endian PCM16 bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    /// Convert to another sample rate. Returns a clone when the rate already matches.
    pub fn resampled(&self, sample_rate: u32) -> PcmBuffer {
        PcmBuffer {
            samples: resample(&self.samples, self.sample_rate, sample_rate).into_owned(),
            sample_rate,
        }
    }

    /// Resample to the telephony rate and μ-law encode.
    pub fn to_telephony(&self) -> MulawBuffer {
        let narrow = resample(&self.samples, self.sample_rate, TELEPHONY.sample_rate);
        MulawBuffer::new(codec::encode_all(&narrow))
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// μ-law encoded telephony audio (8 kHz, one byte per sample).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulawBuffer {
    bytes: Vec<u8>,
}

impl MulawBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Decode to linear PCM at the telephony rate.
    pub fn decode(&self) -> PcmBuffer {
        PcmBuffer::new(codec::decode_all(&self.bytes), TELEPHONY.sample_rate)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_le_bytes_round_trip() {
        let pcm = PcmBuffer::new(vec![0, 1, -1, i16::MAX, i16::MIN], 16000);
        let bytes = pcm.to_le_bytes();
        assert_eq!(bytes.len(), 10);
        assert_eq!(PcmBuffer::from_le_bytes(&bytes, 16000), pcm);
    }

    #[test]
    fn test_odd_trailing_byte_is_ignored() {
        let pcm = PcmBuffer::from_le_bytes(&[0x01, 0x00, 0x7F], 8000);
        assert_eq!(pcm.samples(), &[1]);
    }

    #[test]
    fn test_telephony_silence_decodes_near_zero() {
        let silence = MulawBuffer::new(vec![0xFF; 160]);
        let pcm = silence.decode();
        assert_eq!(pcm.len(), 160);
        assert_eq!(pcm.sample_rate(), 8000);
        assert!(pcm.samples().iter().all(|s| s.abs() <= 8));

        let again = pcm.to_telephony();
        assert_eq!(again.as_bytes(), silence.as_bytes());
    }

    #[test]
    fn test_speech_model_output_narrows_to_telephony() {
        // 20 ms at 24 kHz becomes one 160-byte telephony frame
        let pcm = PcmBuffer::new(vec![0; 480], 24000);
        let mulaw = pcm.to_telephony();
        assert_eq!(mulaw.len(), 160);
    }

    #[test]
    fn test_resampled_widens_for_speech_model() {
        let pcm = MulawBuffer::new(vec![0xFF; 160]).decode().resampled(16000);
        assert_eq!(pcm.sample_rate(), 16000);
        assert_eq!(pcm.len(), 320);
    }
}
