//! Stream-vbyte packing for 16-bit signal samples.
//!
//! POD5 uses a variant of the streamvbyte algorithm. Since signal values are
//! only 16-bit (i16) values, it only needs to consider if values fit into 1
//! data byte or 2 data bytes. This means that it only needs 1 bit to encode
//! the size, so every control byte covers up to 8 values instead of 4.
//!
//! Values are delta-coded against their predecessor (previous = 0 at the
//! start of a chunk) and zig-zag mapped before packing. Control bits are
//! LSB-first within each control byte; data bytes are little endian.

use crate::error::{Pod5Error, Result};

mod scalar;
#[cfg(target_arch = "x86_64")]
mod x64;

/// Number of control bytes for `count` values: one bit per value.
pub fn key_length(count: usize) -> usize {
    (count >> 3) + (((count & 7) + 7) >> 3)
}

/// Worst case size of the packed stream: every value takes two data bytes.
pub fn max_encoded_length(count: usize) -> usize {
    key_length(count) + 2 * count
}

/// Pack samples into a control stream followed by data bytes.
pub fn encode(uncompressed: &[i16]) -> Vec<u8> {
    #[cfg(target_arch = "x86_64")]
    if is_x86_feature_detected!("ssse3") {
        return unsafe { x64::encode(uncompressed) };
    }
    scalar::encode(uncompressed)
}

/// Unpack exactly `count` samples.
pub fn decode(compressed: &[u8], count: usize) -> Result<Vec<i16>> {
    let mut out = vec![0i16; count];
    decode_into(compressed, &mut out)?;
    Ok(out)
}

/// Unpack exactly `out.len()` samples into a caller-provided buffer.
pub fn decode_into(compressed: &[u8], out: &mut [i16]) -> Result<()> {
    let (ctrl, data) = split_data(compressed, out.len())?;

    #[cfg(target_arch = "x86_64")]
    if is_x86_feature_detected!("ssse3") && is_x86_feature_detected!("sse4.1") {
        unsafe { x64::decode_into(ctrl, data, out) };
        return Ok(());
    }
    scalar::decode_into(ctrl, data, out);
    Ok(())
}

/// Split a packed buffer into control and data sections, validating that both
/// agree with `count` so the decoders never over-read.
fn split_data(compressed: &[u8], count: usize) -> Result<(&[u8], &[u8])> {
    let key_len = key_length(count);
    if compressed.len() < key_len {
        return Err(Pod5Error::codec(format!(
            "Packed buffer too short: {} bytes cannot hold {} control bytes",
            compressed.len(),
            key_len
        )));
    }
    let (ctrl, data) = compressed.split_at(key_len);
    let expected_data = count + count_two_byte_values(ctrl, count);
    if data.len() != expected_data {
        return Err(Pod5Error::codec(format!(
            "Packed buffer size mismatch: {} data bytes present, {} expected for {} values",
            data.len(),
            expected_data,
            count
        )));
    }
    Ok((ctrl, data))
}

fn count_two_byte_values(ctrl: &[u8], count: usize) -> usize {
    let full_bytes = count / 8;
    let mut ones: usize = ctrl[..full_bytes]
        .iter()
        .map(|b| b.count_ones() as usize)
        .sum();
    let remainder = count % 8;
    if remainder > 0 {
        ones += (ctrl[full_bytes] & ((1u8 << remainder) - 1)).count_ones() as usize;
    }
    ones
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_key_length() {
        assert_eq!(key_length(0), 0);
        assert_eq!(key_length(5), 1);
        assert_eq!(key_length(8), 1);
        assert_eq!(key_length(9), 2);
        assert_eq!(key_length(17), 3);
    }

    #[test]
    fn test_known_packing() {
        let samples = 5;
        let answer = [10u16, 1234, 20, 2345, 30];
        // LSB-first control bits: values 1 and 3 take two bytes.
        let xs = [0b00001010u8, 10, 0xd2, 0x04, 20, 0x29, 0x09, 30];
        let (ctrl, data) = split_data(&xs, samples).unwrap();
        let decoded: Vec<u16> = scalar::unpack_values(ctrl, data, samples).collect();
        assert_eq!(decoded, answer);
    }

    #[test]
    fn test_roundtrip() {
        let nums = [10i16, 1234, 20, 2345, 30];
        assert_eq!(decode(&encode(&nums), nums.len()).unwrap(), nums);
    }

    #[test]
    fn test_roundtrip_empty_and_single() {
        assert_eq!(decode(&encode(&[]), 0).unwrap(), Vec::<i16>::new());
        assert_eq!(decode(&encode(&[-123]), 1).unwrap(), vec![-123]);
    }

    #[test]
    fn test_roundtrip_extremes() {
        let nums = [0i16, 1, -1, i16::MAX, i16::MIN, i16::MAX, 0];
        assert_eq!(decode(&encode(&nums), nums.len()).unwrap(), nums);
    }

    #[test]
    fn test_roundtrip_long_runs() {
        // Long constant runs keep every delta at zero, exercising the
        // all-one-byte fast path of the x64 decoder.
        let mut nums = vec![100i16; 1000];
        nums.extend(std::iter::repeat(-2000).take(1000));
        nums.extend((0..1000).map(|i| (i * 37 % 700) as i16 - 350));
        assert_eq!(decode(&encode(&nums), nums.len()).unwrap(), nums);
    }

    #[test]
    fn test_scalar_matches_dispatch() {
        let nums: Vec<i16> = (0..4097)
            .map(|i| ((i * 2654435761u64 as usize) % 65536) as u16 as i16)
            .collect();
        let encoded = encode(&nums);
        assert_eq!(encoded, scalar::encode(&nums));
        let mut out = vec![0i16; nums.len()];
        let (ctrl, data) = split_data(&encoded, nums.len()).unwrap();
        scalar::decode_into(ctrl, data, &mut out);
        assert_eq!(out, nums);
        assert_eq!(decode(&encoded, nums.len()).unwrap(), nums);
    }

    #[test]
    fn test_decode_rejects_truncated_buffers() {
        let nums = [10i16, 1234, 20, 2345, 30];
        let encoded = encode(&nums);
        assert!(decode(&encoded[..encoded.len() - 1], nums.len()).is_err());
        assert!(decode(&encoded, nums.len() + 1).is_err());
        assert!(decode(&[], 3).is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(nums in proptest::collection::vec(any::<i16>(), 0..2048)) {
            let encoded = encode(&nums);
            prop_assert!(encoded.len() <= max_encoded_length(nums.len()));
            prop_assert_eq!(decode(&encoded, nums.len()).unwrap(), nums);
        }

        #[test]
        fn prop_scalar_equals_simd(nums in proptest::collection::vec(any::<i16>(), 0..512)) {
            let encoded = encode(&nums);
            let scalar_encoded = scalar::encode(&nums);
            prop_assert_eq!(&encoded, &scalar_encoded);
            let (ctrl, data) = split_data(&encoded, nums.len()).unwrap();
            let mut out = vec![0i16; nums.len()];
            scalar::decode_into(ctrl, data, &mut out);
            prop_assert_eq!(&out, &nums);
            prop_assert_eq!(decode(&encoded, nums.len()).unwrap(), nums);
        }
    }
}
