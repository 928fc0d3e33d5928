//! # Linear-Interpolation Resampler
//!
//! Converts PCM between the rates the pipeline uses (8 kHz telephony, 16 kHz
//! speech-model input, 24 kHz speech-model output). Linear interpolation is cheap
//! and good enough for narrowband voice; there is no anti-aliasing filter.

use std::borrow::Cow;

/// Resample `samples` from `in_rate` to `out_rate`.
///
/// ## Behavior:
/// - Equal rates borrow the input unchanged (no copy)
/// - Otherwise produces `floor(len * out_rate / in_rate)` samples
/// - Output `i` interpolates between `i0 = floor(p)` and `i1 = min(i0 + 1, len - 1)`
///   where `p = i * in_rate / out_rate`
pub fn resample(samples: &[i16], in_rate: u32, out_rate: u32) -> Cow<'_, [i16]> {
    if in_rate == out_rate || samples.is_empty() || in_rate == 0 || out_rate == 0 {
        return Cow::Borrowed(samples);
    }

    let out_len = (samples.len() as u64 * out_rate as u64 / in_rate as u64) as usize;
    let step = in_rate as f64 / out_rate as f64;
    let last = samples.len() - 1;

    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let position = i as f64 * step;
        let i0 = (position.floor() as usize).min(last);
        let i1 = (i0 + 1).min(last);
        let frac = position - i0 as f64;

        let value = samples[i0] as f64 * (1.0 - frac) + samples[i1] as f64 * frac;
        out.push(value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
    }

    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_rates_borrow() {
        let samples = vec![1i16, 2, 3];
        let out = resample(&samples, 8000, 8000);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, &samples[..]);
    }

    #[test]
    fn test_output_length() {
        let pairs = [(8000, 16000), (16000, 8000), (24000, 8000), (16000, 24000), (44100, 8000)];
        for len in [1usize, 2, 3, 159, 160, 480, 1001] {
            let samples = vec![100i16; len];
            for (in_rate, out_rate) in pairs {
                let out = resample(&samples, in_rate, out_rate);
                let expected = (len as u64 * out_rate as u64 / in_rate as u64) as usize;
                assert_eq!(out.len(), expected, "len {} {}->{}", len, in_rate, out_rate);
            }
        }
    }

    #[test]
    fn test_upsample_interpolates_midpoints() {
        let out = resample(&[0, 100, 200], 8000, 16000);
        assert_eq!(&*out, &[0, 50, 100, 150, 200, 200]);
    }

    #[test]
    fn test_downsample_picks_every_third() {
        let samples: Vec<i16> = (0..9).map(|i| i * 10).collect();
        let out = resample(&samples, 24000, 8000);
        assert_eq!(&*out, &[0, 30, 60]);
    }

    #[test]
    fn test_single_sample_boundary_clamps() {
        // i1 clamps to len - 1 instead of reading past the end
        let out = resample(&[1234], 8000, 24000);
        assert_eq!(&*out, &[1234, 1234, 1234]);
    }

    #[test]
    fn test_extreme_values_do_not_overflow() {
        let out = resample(&[i16::MAX, i16::MIN, i16::MAX], 8000, 16000);
        assert_eq!(out.len(), 6);
        assert_eq!(out[0], i16::MAX);
        assert_eq!(out[2], i16::MIN);
    }
}
