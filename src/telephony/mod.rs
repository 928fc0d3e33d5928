//! # Telephony Module
//!
//! The carrier side of a call: the media stream protocol spoken over the
//! WebSocket the provider opens, and the helpers that turn speech-model audio into
//! outbound frames addressed to the right stream.
//!
//! ## Media Stream Lifecycle:
//! 1. **connected**: provider handshake (ignored)
//! 2. **start**: carries the `streamSid` every outbound message must be addressed to
//! 3. **media**: base64 μ-law chunks of caller audio, roughly every 20 ms
//! 4. **mark**: echoes of marks we sent, once the provider has played up to them
//! 5. **stop**: the call ended

pub mod protocol;

pub use protocol::{MediaPayload, StartMetadata, TwilioInbound, TwilioOutbound};

use crate::audio::{chunk_frames, TELEPHONY};

/// Split μ-law audio into 20 ms frames addressed to `stream_sid`.
///
/// Returns serialized messages ready for the socket.
pub fn media_frames(stream_sid: &str, mulaw: &[u8]) -> Vec<String> {
    chunk_frames(mulaw, TELEPHONY.frame_bytes())
        .filter_map(|frame| TwilioOutbound::media(stream_sid, frame).to_json().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_media_frames_are_addressed_and_sized() {
        let frames = media_frames("MZ1", &vec![0xFFu8; 400]);
        assert_eq!(frames.len(), 3);

        let payload_lens: Vec<usize> = frames
            .iter()
            .map(|json| {
                let value: Value = serde_json::from_str(json).unwrap();
                assert_eq!(value["streamSid"], "MZ1");
                use base64::Engine as _;
                base64::engine::general_purpose::STANDARD
                    .decode(value["media"]["payload"].as_str().unwrap())
                    .unwrap()
                    .len()
            })
            .collect();
        assert_eq!(payload_lens, vec![160, 160, 80]);
    }

    #[test]
    fn test_empty_audio_sends_nothing() {
        assert!(media_frames("MZ1", &[]).is_empty());
    }
}
