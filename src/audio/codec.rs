//! # μ-law Companding
//!
//! G.711 μ-law is the 8-bit logarithmic encoding used on 8 kHz telephony links.
//! Each byte stores a sign bit, a 3-bit exponent (segment) and a 4-bit mantissa,
//! all bit-complemented on the wire.
//!
//! ## Quantization:
//! Samples in exponent band `e` are quantized in steps of `1 << (e + 3)`, so quiet
//! samples keep fine resolution and loud samples lose low-order bits. A round trip
//! through `encode` then `decode` stays within one step of the original.

/// Bias added before companding so that the exponent search never sees zero.
const BIAS: i32 = 0x84;

/// Largest magnitude that still fits into 15 bits once the bias is added.
const CLIP: i32 = 32635;

/// Decode one μ-law byte into a 16-bit linear PCM sample.
pub fn decode(mu: u8) -> i16 {
    let mu = !mu;
    let negative = (mu & 0x80) != 0;
    let exponent = (mu >> 4) & 0x07;
    let mantissa = (mu & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if negative {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode one 16-bit linear PCM sample into a μ-law byte.
pub fn encode(sample: i16) -> u8 {
    let sample = sample as i32;
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let magnitude = sample.abs().min(CLIP) + BIAS;

    // Highest set bit above the 3-bit guard region gives the segment.
    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (magnitude & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;

    !(sign | (exponent << 4) | mantissa)
}

/// Quantization step of the exponent band an encoded byte falls in.
pub fn quantization_step(mu: u8) -> i32 {
    let exponent = ((!mu) >> 4) & 0x07;
    1 << (exponent + 3)
}

/// Decode a μ-law byte slice element-wise.
pub fn decode_all(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&mu| decode(mu)).collect()
}

/// Encode a PCM sample slice element-wise.
pub fn encode_all(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_within_one_step() {
        for s in i16::MIN..=i16::MAX {
            let mu = encode(s);
            let back = decode(mu) as i32;
            let step = quantization_step(mu);
            assert!(
                (back - s as i32).abs() <= step,
                "sample {} decoded to {} (step {})",
                s,
                back,
                step
            );
        }
    }

    #[test]
    fn test_silence_byte_decodes_to_zero() {
        // 0xFF and 0x7F are positive and negative zero on the wire
        assert_eq!(decode(0xFF), 0);
        assert_eq!(decode(0x7F), 0);
        assert_eq!(encode(0), 0xFF);
    }

    #[test]
    fn test_extremes() {
        assert_eq!(decode(0x80), 32124);
        assert_eq!(decode(0x00), -32124);
        assert_eq!(encode(i16::MAX), 0x80);
        assert_eq!(encode(i16::MIN), 0x00);
    }

    #[test]
    fn test_decode_is_sign_symmetric() {
        for mu in 0u8..0x80 {
            assert_eq!(decode(mu), -decode(mu | 0x80));
        }
    }
}
