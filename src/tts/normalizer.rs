//! Streaming PCM16 to telephony μ-law conversion.

use crate::audio::{codec, PcmBuffer, TELEPHONY};

/// Converts arbitrary network reads of little-endian PCM16 into μ-law.
///
/// Network reads don't respect sample boundaries, so a read with an odd length
/// leaves half a sample behind. That byte is carried into the next read instead of
/// being dropped or misaligning everything after it.
///
/// Rate conversion is continuous across reads: the last input sample and the
/// interpolation phase survive from one read to the next, so chunking the body
/// differently yields the same output.
#[derive(Debug)]
pub struct PcmNormalizer {
    sample_rate: u32,
    carry: Option<u8>,
    /// Last input sample of the previous read
    previous: Option<i16>,
    /// Next output position in input samples, scaled by the telephony rate
    phase: u64,
}

impl PcmNormalizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            carry: None,
            previous: None,
            phase: 0,
        }
    }

    /// Convert one network read. Returns an empty vec when the read didn't
    /// complete enough input for another output sample.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(chunk.len() + 1);
        if let Some(byte) = self.carry.take() {
            data.push(byte);
        }
        data.extend_from_slice(chunk);

        if data.len() % 2 == 1 {
            self.carry = data.pop();
        }
        if data.is_empty() {
            return Vec::new();
        }

        let pcm = PcmBuffer::from_le_bytes(&data, self.sample_rate);
        if self.sample_rate == TELEPHONY.sample_rate || self.sample_rate == 0 {
            return pcm.to_telephony().into_bytes();
        }
        self.resample_encode(pcm.samples())
    }

    fn resample_encode(&mut self, samples: &[i16]) -> Vec<u8> {
        let mut window = Vec::with_capacity(samples.len() + 1);
        window.extend(self.previous);
        window.extend_from_slice(samples);

        let in_rate = self.sample_rate as u64;
        let out_rate = TELEPHONY.sample_rate as u64;
        // positions between the last sample and the next read's first one wait
        let last = (window.len() - 1) as u64;

        let mut out = Vec::with_capacity((samples.len() as u64 * out_rate / in_rate) as usize + 1);
        while self.phase <= last * out_rate {
            let i0 = (self.phase / out_rate) as usize;
            let rem = self.phase % out_rate;
            let right = if rem == 0 { window[i0] } else { window[i0 + 1] };
            let frac = rem as f64 / out_rate as f64;
            let value = window[i0] as f64 * (1.0 - frac) + right as f64 * frac;
            out.push(codec::encode(
                value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16,
            ));
            self.phase += in_rate;
        }

        self.phase -= last * out_rate;
        self.previous = window.last().copied();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize) -> Vec<u8> {
        (0..len)
            .flat_map(|i| (((i % 200) as i16 - 100) * 150).to_le_bytes())
            .collect()
    }

    #[test]
    fn test_odd_read_carries_one_byte() {
        let mut normalizer = PcmNormalizer::new(16000);
        // 1000 whole samples plus half of the next one
        let out = normalizer.push(&vec![0u8; 2001]);
        assert_eq!(out.len(), 500);

        // the carried byte completes a sample with the next read
        let out = normalizer.push(&[0u8; 3]);
        assert_eq!(out.len(), 1);

        // nothing left over: one more whole sample is enough for the next output
        let out = normalizer.push(&[0u8; 2]);
        assert_eq!(out, vec![0xFF]);
    }

    #[test]
    fn test_split_sample_is_reassembled() {
        let sample: i16 = 1000;
        let [lo, hi] = sample.to_le_bytes();

        let mut normalizer = PcmNormalizer::new(8000);
        assert!(normalizer.push(&[lo]).is_empty());
        let out = normalizer.push(&[hi]);

        let whole = PcmBuffer::new(vec![sample], 8000).to_telephony().into_bytes();
        assert_eq!(out, whole);
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        // 40 reads of 101 samples each
        let body = tone(4040);

        let mut whole = PcmNormalizer::new(16000);
        let expected = whole.push(&body);
        assert_eq!(expected.len(), 2020);

        let mut chunked = PcmNormalizer::new(16000);
        let out: Vec<u8> = body.chunks(202).flat_map(|read| chunked.push(read)).collect();
        assert_eq!(out, expected);

        // odd-sized reads go through the byte carry as well
        let mut odd = PcmNormalizer::new(16000);
        let out: Vec<u8> = body.chunks(333).flat_map(|read| odd.push(read)).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_model_rate_is_continuous() {
        // 24 kHz delivered 7 samples at a time keeps the 3:1 ratio
        let body = tone(2400);
        let mut normalizer = PcmNormalizer::new(24000);
        let out: Vec<u8> = body.chunks(14).flat_map(|read| normalizer.push(read)).collect();
        assert_eq!(out.len(), 800);
    }

    #[test]
    fn test_empty_read() {
        let mut normalizer = PcmNormalizer::new(16000);
        assert!(normalizer.push(&[]).is_empty());
        assert_eq!(normalizer.push(&[0, 0]), vec![0xFF]);
    }
}
