//! The VBZ signal codec: stream-vbyte-16 packing wrapped in a zstd frame.

use crate::error::{Pod5Error, Result};
use crate::svb16;

const ZSTD_COMPRESSION_LEVEL: i32 = 1;

/// Upper bound on the size of `compress_signal` output for `sample_count`
/// samples.
pub fn max_compressed_signal_size(sample_count: usize) -> Result<usize> {
    let packed = sample_count
        .checked_mul(2)
        .and_then(|data| data.checked_add(svb16::key_length(sample_count)))
        .ok_or_else(|| {
            Pod5Error::codec(format!(
                "Sample count {sample_count} overflows the packed size bound"
            ))
        })?;
    Ok(zstd::zstd_safe::compress_bound(packed))
}

/// Compress samples into one VBZ cell.
pub fn compress_signal(samples: &[i16]) -> Result<Vec<u8>> {
    let packed = svb16::encode(samples);
    let compressed = zstd::bulk::compress(&packed, ZSTD_COMPRESSION_LEVEL)?;
    Ok(compressed)
}

/// Decompress one VBZ cell of `sample_count` samples.
pub fn decompress_signal(compressed: &[u8], sample_count: usize) -> Result<Vec<i16>> {
    let mut out = vec![0i16; sample_count];
    decompress_signal_into(compressed, &mut out)?;
    Ok(out)
}

/// Decompress one VBZ cell into a caller-provided buffer whose length is the
/// expected sample count.
pub fn decompress_signal_into(compressed: &[u8], out: &mut [i16]) -> Result<()> {
    let packed = zstd::bulk::decompress(compressed, svb16::max_encoded_length(out.len()))
        .map_err(|e| Pod5Error::codec(format!("Invalid zstd frame in signal cell: {e}")))?;
    svb16::decode_into(&packed, out)
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_roundtrip() -> eyre::Result<()> {
        let samples = [100i16, 200, -42, 0, i16::MAX, i16::MIN];
        let cell = compress_signal(&samples)?;
        assert!(cell.len() <= max_compressed_signal_size(samples.len())?);
        assert_eq!(decompress_signal(&cell, samples.len())?, samples);
        Ok(())
    }

    #[test]
    fn test_roundtrip_empty() -> eyre::Result<()> {
        let cell = compress_signal(&[])?;
        assert_eq!(decompress_signal(&cell, 0)?, Vec::<i16>::new());
        Ok(())
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(decompress_signal(b"not a zstd frame", 8).is_err());
        // Valid zstd frame over garbage svb16 content.
        let bogus = zstd::bulk::compress(b"xyz", 1).unwrap();
        assert!(decompress_signal(&bogus, 8).is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(samples in proptest::collection::vec(any::<i16>(), 0..4096)) {
            let cell = compress_signal(&samples).unwrap();
            prop_assert!(cell.len() <= max_compressed_signal_size(samples.len()).unwrap());
            prop_assert_eq!(decompress_signal(&cell, samples.len()).unwrap(), samples);
        }
    }
}
