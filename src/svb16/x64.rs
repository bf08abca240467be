//! SSSE3 encode/decode paths.
//!
//! The decoder walks 32 values per iteration (four control bytes). Each
//! control byte selects a 16-byte shuffle mask that gathers its eight 1- or
//! 2-byte packed values into aligned u16 lanes; an in-lane prefix sum
//! (shift-left-and-add by 2, 4 and 8 bytes) plus a broadcast of the previous
//! sample restores the deltas. A 32-bit all-zero control chunk means 32
//! one-byte values in a row and takes u8 to u16 widening loads instead.
//!
//! Both shuffle tables are generated at compile time from the control-byte
//! bit patterns.

use core::arch::x86_64::*;

use super::{key_length, scalar};

/// For control byte `k`, gather mask from packed data bytes to u16 lanes.
/// Lane `i` reads one byte (high byte zeroed via 0x80) when bit `i` of `k`
/// is clear, two bytes otherwise.
const fn build_decode_shuffle() -> [[u8; 16]; 256] {
    let mut table = [[0x80u8; 16]; 256];
    let mut key = 0usize;
    while key < 256 {
        let mut src = 0u8;
        let mut lane = 0;
        while lane < 8 {
            table[key][lane * 2] = src;
            if (key >> lane) & 1 == 1 {
                table[key][lane * 2 + 1] = src + 1;
                src += 2;
            } else {
                src += 1;
            }
            lane += 1;
        }
        key += 1;
    }
    table
}

/// Inverse of the decode mask: scatter eight u16 lanes into packed bytes,
/// dropping the high byte of every lane whose bit is clear.
const fn build_encode_shuffle() -> [[u8; 16]; 256] {
    let mut table = [[0x80u8; 16]; 256];
    let mut key = 0usize;
    while key < 256 {
        let mut dst = 0usize;
        let mut lane = 0;
        while lane < 8 {
            table[key][dst] = (lane * 2) as u8;
            dst += 1;
            if (key >> lane) & 1 == 1 {
                table[key][dst] = (lane * 2 + 1) as u8;
                dst += 1;
            }
            lane += 1;
        }
        key += 1;
    }
    table
}

static DECODE_SHUFFLE: [[u8; 16]; 256] = build_decode_shuffle();
static ENCODE_SHUFFLE: [[u8; 16]; 256] = build_encode_shuffle();

#[target_feature(enable = "ssse3")]
unsafe fn undo_zigzag_16(buf: __m128i) -> __m128i {
    _mm_xor_si128(
        // N >> 1
        _mm_srli_epi16::<1>(buf),
        // 0xFFFF if N & 1 else 0x0000
        _mm_srai_epi16::<15>(_mm_slli_epi16::<15>(buf)),
    )
}

/// Undo zig-zag, restore deltas with an in-lane prefix sum, add the previous
/// sample, store eight samples at `out` and return the new previous sample.
#[target_feature(enable = "ssse3")]
unsafe fn write_deltas(vec: __m128i, prev: i16, out: *mut i16) -> i16 {
    let vec = undo_zigzag_16(vec);
    // vec == [A B C D E F G H] (16 bit values)
    let mut sum = _mm_add_epi16(vec, _mm_slli_si128::<2>(vec)); // [A AB BC .. GH]
    sum = _mm_add_epi16(sum, _mm_slli_si128::<4>(sum)); // [A AB ABC ABCD BCDE ..]
    sum = _mm_add_epi16(sum, _mm_slli_si128::<8>(sum)); // running sum of all lanes
    sum = _mm_add_epi16(sum, _mm_set1_epi16(prev));
    _mm_storeu_si128(out as *mut __m128i, sum);
    _mm_extract_epi16::<7>(sum) as u16 as i16
}

/// # Safety
///
/// Requires SSSE3 and SSE4.1. `ctrl` and `data` must already be validated
/// against `out.len()` (see `split_data`).
#[target_feature(enable = "ssse3", enable = "sse4.1")]
pub(super) unsafe fn decode_into(ctrl: &[u8], data: &[u8], out: &mut [i16]) {
    let count = out.len();
    let mut key_idx = 0usize;
    let mut data_idx = 0usize;
    let mut out_idx = 0usize;
    let mut prev: i16 = 0;

    loop {
        // Fast path: 4 zero control bytes mean 32 one-byte values.
        if count - out_idx >= 32
            && data_idx + 32 <= data.len()
            && u32::from_le_bytes(ctrl[key_idx..key_idx + 4].try_into().unwrap()) == 0
        {
            let mut group = 0;
            while group < 4 {
                let raw =
                    _mm_loadl_epi64(data.as_ptr().add(data_idx + group * 8) as *const __m128i);
                let vec = _mm_cvtepu8_epi16(raw);
                prev = write_deltas(vec, prev, out.as_mut_ptr().add(out_idx + group * 8));
                group += 1;
            }
            key_idx += 4;
            data_idx += 32;
            out_idx += 32;
            continue;
        }

        // One control byte per iteration; the unaligned 16-byte load may
        // cover bytes past this group, so keep a full vector of headroom.
        if count - out_idx < 8 || data_idx + 16 > data.len() {
            break;
        }
        let key = ctrl[key_idx];
        let raw = _mm_loadu_si128(data.as_ptr().add(data_idx) as *const __m128i);
        let shuffle = _mm_loadu_si128(DECODE_SHUFFLE[key as usize].as_ptr() as *const __m128i);
        let vec = _mm_shuffle_epi8(raw, shuffle);
        prev = write_deltas(vec, prev, out.as_mut_ptr().add(out_idx));
        key_idx += 1;
        data_idx += 8 + key.count_ones() as usize;
        out_idx += 8;
    }

    scalar::decode_range(ctrl, data, out, out_idx, data_idx, prev);
}

/// # Safety
///
/// Requires SSSE3.
#[target_feature(enable = "ssse3")]
pub(super) unsafe fn encode(uncompressed: &[i16]) -> Vec<u8> {
    let count = uncompressed.len();
    let key_len = key_length(count);
    // Two bytes per value worst case, plus one vector of store headroom.
    let mut out = vec![0u8; key_len + 2 * count + 16];
    let mut data_len = 0usize;
    {
        let (keys, data) = out.split_at_mut(key_len);
        let groups = count / 8;
        let mut prev_vec = _mm_setzero_si128();
        let zero = _mm_setzero_si128();
        for group in 0..groups {
            let cur =
                _mm_loadu_si128(uncompressed.as_ptr().add(group * 8) as *const __m128i);
            // [prev_last, v0 .. v6] for the lane-wise delta
            let shifted = _mm_alignr_epi8::<14>(cur, prev_vec);
            let delta = _mm_sub_epi16(cur, shifted);
            let zz = _mm_xor_si128(_mm_add_epi16(delta, delta), _mm_srai_epi16::<15>(delta));
            // Lane fits one byte when its high byte is zero.
            let one_byte = _mm_cmpeq_epi16(_mm_srli_epi16::<8>(zz), zero);
            let mask = _mm_movemask_epi8(_mm_packs_epi16(one_byte, zero)) as u32;
            let key = (!mask & 0xFF) as u8;
            keys[group] = key;
            let shuffle =
                _mm_loadu_si128(ENCODE_SHUFFLE[key as usize].as_ptr() as *const __m128i);
            let packed = _mm_shuffle_epi8(zz, shuffle);
            _mm_storeu_si128(data.as_mut_ptr().add(data_len) as *mut __m128i, packed);
            data_len += 8 + key.count_ones() as usize;
            prev_vec = cur;
        }

        // Scalar tail for the final partial group.
        let mut prev = if groups > 0 {
            uncompressed[groups * 8 - 1]
        } else {
            0
        };
        let mut key = 0u8;
        let mut shift = 0u8;
        for &sample in &uncompressed[groups * 8..] {
            let delta = sample.wrapping_sub(prev);
            prev = sample;
            let zz = ((delta as u16) << 1) ^ ((delta >> 15) as u16);
            if zz > u8::MAX as u16 {
                data[data_len..data_len + 2].copy_from_slice(&zz.to_le_bytes());
                data_len += 2;
                key |= 1 << shift;
            } else {
                data[data_len] = zz as u8;
                data_len += 1;
            }
            shift += 1;
        }
        if count % 8 != 0 {
            keys[groups] = key;
        }
    }
    out.truncate(key_len + data_len);
    out
}
