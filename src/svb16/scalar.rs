//! Portable encode/decode paths.

use bitvec::{order::Lsb0, slice::Iter, view::BitView};
use itertools::Itertools;
use zigzag::ZigZag;

/// Iterator over the packed u16 values of a validated control/data pair.
pub(super) struct UnpackIter<'a> {
    count: usize,
    samples: usize,
    bits: Iter<'a, u8, Lsb0>,
    idx: usize,
    data: &'a [u8],
}

impl<'a> UnpackIter<'a> {
    fn new(ctrl: &'a [u8], data: &'a [u8], samples: usize) -> Self {
        Self {
            bits: ctrl.view_bits::<Lsb0>().iter(),
            idx: 0,
            data,
            count: 0,
            samples,
        }
    }
}

impl Iterator for UnpackIter<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<Self::Item> {
        if self.count == self.samples {
            return None;
        }
        let code = self.bits.next()?;
        let value = if *code {
            let tmp = u16::from_le_bytes(self.data[self.idx..self.idx + 2].try_into().unwrap());
            self.idx += 2;
            tmp
        } else {
            let tmp = self.data[self.idx] as u16;
            self.idx += 1;
            tmp
        };
        self.count += 1;
        Some(value)
    }
}

pub(super) fn unpack_values<'a>(
    ctrl: &'a [u8],
    data: &'a [u8],
    samples: usize,
) -> impl Iterator<Item = u16> + 'a {
    UnpackIter::new(ctrl, data, samples)
}

pub(super) fn decode_into(ctrl: &[u8], data: &[u8], out: &mut [i16]) {
    let samples = out.len();
    let mut prev = 0i16;
    for (slot, value) in out.iter_mut().zip(unpack_values(ctrl, data, samples)) {
        let delta: i16 = ZigZag::decode(value);
        prev = prev.wrapping_add(delta);
        *slot = prev;
    }
}

/// Decode values `[start, out.len())`, continuing from a known data offset
/// and previous sample. The x64 path uses this for its tail.
pub(super) fn decode_range(
    ctrl: &[u8],
    data: &[u8],
    out: &mut [i16],
    start: usize,
    data_idx: usize,
    mut prev: i16,
) {
    let bits = ctrl.view_bits::<Lsb0>();
    let mut idx = data_idx;
    for (slot, code) in out[start..].iter_mut().zip(bits[start..].iter().by_vals()) {
        let value = if code {
            let tmp = u16::from_le_bytes(data[idx..idx + 2].try_into().unwrap());
            idx += 2;
            tmp
        } else {
            let tmp = data[idx] as u16;
            idx += 1;
            tmp
        };
        let delta: i16 = ZigZag::decode(value);
        prev = prev.wrapping_add(delta);
        *slot = prev;
    }
}

struct Encoder<I> {
    ctrl_bytes: Vec<u8>,
    data_bytes: Vec<u8>,
    iter: I,
}

impl<I: Iterator<Item = u16>> Encoder<I> {
    fn new(iter: I) -> Self {
        Self {
            ctrl_bytes: Vec::new(),
            data_bytes: Vec::new(),
            iter,
        }
    }

    fn encode(mut self) -> Vec<u8> {
        for chunk in &self.iter.chunks(8) {
            let mut ctrl_byte = 0u8;
            let bits = ctrl_byte.view_bits_mut::<Lsb0>();
            for (x, mut code) in chunk.zip(bits.iter_mut()) {
                if x > (u8::MAX as u16) {
                    *code = true;
                    self.data_bytes.extend_from_slice(&x.to_le_bytes());
                } else {
                    self.data_bytes.push(x as u8);
                }
            }
            self.ctrl_bytes.push(ctrl_byte)
        }
        let mut compressed = self.ctrl_bytes;
        compressed.append(&mut self.data_bytes);
        compressed
    }
}

pub(super) fn encode(uncompressed: &[i16]) -> Vec<u8> {
    Encoder::new(zigzag_deltas(uncompressed)).encode()
}

/// Wrapping delta against the previous sample (initial previous = 0),
/// zig-zag mapped into u16.
fn zigzag_deltas(samples: &[i16]) -> impl Iterator<Item = u16> + '_ {
    samples.iter().copied().scan(0i16, |prev, x| {
        let delta = x.wrapping_sub(*prev);
        *prev = x;
        Some(ZigZag::encode(delta))
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_zigzag_deltas() {
        let deltas: Vec<u16> = zigzag_deltas(&[1, 1, 0, -2]).collect();
        // deltas 1, 0, -1, -2 zig-zag to 2, 0, 1, 3
        assert_eq!(deltas, [2, 0, 1, 3]);
    }

    #[test]
    fn test_wrapping_delta() {
        // i16::MIN - i16::MAX wraps; the decoder wraps the same way back.
        let nums = [i16::MAX, i16::MIN];
        let encoded = encode(&nums);
        let mut out = [0i16; 2];
        let (ctrl, data) = encoded.split_at(1);
        decode_into(ctrl, data, &mut out);
        assert_eq!(out, nums);
    }
}
