//! 6-bit character packing for text bodies
//!
//! Text on air uses a fixed 64-symbol uppercase alphabet so each character
//! fits in 6 bits. Characters are written MSB-first into a contiguous bit
//! stream; the final byte is zero-padded.
//!
//! ```text
//!  H=8     E=5     L=12    L=12    O=15
//! 001000  000101  001100  001100  001111 00
//! └──0x20──┘└──0x53──┘└──0x0C──┘└──0x3C──┘
//! ```
//!
//! Lowercase ASCII letters are folded to uppercase before lookup, so packing
//! is lossy with respect to case. Anything else outside the charset is
//! rejected rather than substituted.

use crate::error::{CodecError, Result};

/// The 64 symbols addressable by a 6-bit code, in code order
pub const CHARSET: &[u8; 64] = b" ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789.,!?-:;'\"@#$%&*()[]{}=+/<>_";

const SIXBIT_MASK: u16 = 0x3F;

/// Number of bytes needed to pack `char_count` characters
pub const fn packed_len(char_count: usize) -> usize {
    (char_count * 6).div_ceil(8)
}

/// Map a character to its 6-bit code, folding lowercase to uppercase
pub fn char_to_6bit(ch: char) -> Result<u8> {
    if !ch.is_ascii() {
        return Err(CodecError::InvalidChar { ch });
    }
    let upper = ch.to_ascii_uppercase() as u8;
    CHARSET
        .iter()
        .position(|&c| c == upper)
        .map(|p| p as u8)
        .ok_or(CodecError::InvalidChar { ch })
}

/// Map a 6-bit code back to its character
///
/// Returns `None` for values above 63.
pub fn sixbit_to_char(value: u8) -> Option<char> {
    CHARSET.get(value as usize).map(|&c| c as char)
}

/// Check that every character of `text` is representable
pub fn validate(text: &str) -> Result<()> {
    text.chars().try_for_each(|ch| char_to_6bit(ch).map(|_| ()))
}

/// Fold `text` to the form it takes after a pack/unpack round trip
pub fn normalize(text: &str) -> String {
    text.to_ascii_uppercase()
}

/// Pack `text` into `out`, returning the number of bytes written
///
/// The text is validated before anything is written, so on error `out` is
/// left untouched.
pub fn pack_into(text: &str, out: &mut [u8]) -> Result<usize> {
    validate(text)?;

    let needed = packed_len(text.chars().count());
    if out.len() < needed {
        return Err(CodecError::BufferTooSmall {
            needed,
            available: out.len(),
        });
    }

    let mut acc: u16 = 0;
    let mut bits: u32 = 0;
    let mut written = 0;

    for ch in text.chars() {
        let code = char_to_6bit(ch)?;
        acc = (acc << 6) | u16::from(code);
        bits += 6;
        while bits >= 8 {
            bits -= 8;
            out[written] = (acc >> bits) as u8;
            written += 1;
        }
        acc &= (1 << bits) - 1;
    }

    if bits > 0 {
        out[written] = (acc << (8 - bits)) as u8;
        written += 1;
    }

    Ok(written)
}

/// Pack `text` into a freshly allocated buffer
pub fn pack(text: &str) -> Result<Vec<u8>> {
    let mut out = vec![0u8; packed_len(text.chars().count())];
    let written = pack_into(text, &mut out)?;
    out.truncate(written);
    Ok(out)
}

/// Unpack `char_count` characters from `packed`
///
/// `char_count` is authoritative: only the first `packed_len(char_count)`
/// bytes are read, and shorter input is rejected.
pub fn unpack(packed: &[u8], char_count: usize) -> Result<String> {
    let needed = packed_len(char_count);
    if packed.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: packed.len(),
        });
    }

    let mut text = String::with_capacity(char_count);
    let mut acc: u16 = 0;
    let mut bits: u32 = 0;
    let mut idx = 0;

    for _ in 0..char_count {
        while bits < 6 {
            acc = (acc << 8) | u16::from(packed[idx]);
            idx += 1;
            bits += 8;
        }
        bits -= 6;
        let code = ((acc >> bits) & SIXBIT_MASK) as u8;
        acc &= (1 << bits) - 1;

        // every masked code is < 64
        let ch = sixbit_to_char(code).ok_or(CodecError::InvalidChar { ch: '\u{FFFD}' })?;
        text.push(ch);
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charset_size() {
        assert_eq!(CHARSET.len(), 64);
        let mut seen = std::collections::HashSet::new();
        assert!(CHARSET.iter().all(|c| seen.insert(*c)), "duplicate symbol");
    }

    #[test]
    fn test_code_roundtrip_all_values() {
        for value in 0u8..64 {
            let ch = sixbit_to_char(value).unwrap();
            assert_eq!(char_to_6bit(ch).unwrap(), value);
        }
        assert_eq!(sixbit_to_char(64), None);
    }

    #[test]
    fn test_lowercase_folds_to_uppercase() {
        for (lower, upper) in ('a'..='z').zip('A'..='Z') {
            assert_eq!(char_to_6bit(lower).unwrap(), char_to_6bit(upper).unwrap());
        }
    }

    #[test]
    fn test_known_packing() {
        assert_eq!(pack("HELLO").unwrap(), vec![0x20, 0x53, 0x0C, 0x3C]);
        assert_eq!(pack("SOS").unwrap(), vec![0x4C, 0xF4, 0xC0]);
        assert!(pack("").unwrap().is_empty());
    }

    #[test]
    fn test_packed_len() {
        assert_eq!(packed_len(0), 0);
        assert_eq!(packed_len(1), 1);
        assert_eq!(packed_len(4), 3);
        assert_eq!(packed_len(5), 4);
        assert_eq!(packed_len(16), 12);
        assert_eq!(packed_len(50), 38);
    }

    #[test]
    fn test_pack_unpack_all_symbols() {
        let text = std::str::from_utf8(CHARSET).unwrap();
        let packed = pack(text).unwrap();
        assert_eq!(packed.len(), 48);
        assert_eq!(unpack(&packed, 64).unwrap(), text);
    }

    #[test]
    fn test_pack_unpack_every_length() {
        let source = "AT CHECKPOINT 2, ALL GOOD. WEATHER CLEAR. MOVING.";
        for len in 0..=source.len() {
            let text = &source[..len];
            let packed = pack(text).unwrap();
            assert_eq!(packed.len(), packed_len(len));
            assert_eq!(unpack(&packed, len).unwrap(), text);
        }
    }

    #[test]
    fn test_unpack_returns_uppercase() {
        let packed = pack("Weather is getting bad").unwrap();
        assert_eq!(unpack(&packed, 22).unwrap(), "WEATHER IS GETTING BAD");
    }

    #[test]
    fn test_invalid_char_rejected() {
        assert_eq!(
            pack("Hello ~").unwrap_err(),
            CodecError::InvalidChar { ch: '~' }
        );
        assert!(matches!(
            pack("SOS 🆘"),
            Err(CodecError::InvalidChar { .. })
        ));
    }

    #[test]
    fn test_pack_into_leaves_buffer_untouched_on_error() {
        let mut out = [0xAAu8; 8];
        assert!(pack_into("AB|", &mut out).is_err());
        assert_eq!(out, [0xAA; 8]);
    }

    #[test]
    fn test_pack_into_buffer_too_small() {
        let mut out = [0u8; 3];
        assert_eq!(
            pack_into("HELLO", &mut out).unwrap_err(),
            CodecError::BufferTooSmall {
                needed: 4,
                available: 3
            }
        );
    }

    #[test]
    fn test_unpack_short_input_rejected() {
        let packed = pack("HELLO").unwrap();
        assert_eq!(
            unpack(&packed[..3], 5).unwrap_err(),
            CodecError::Truncated {
                needed: 4,
                available: 3
            }
        );
    }

    #[test]
    fn test_unpack_ignores_trailing_bytes() {
        let mut packed = pack("SOS").unwrap();
        packed.extend_from_slice(&[0xFF, 0xFF]);
        assert_eq!(unpack(&packed, 3).unwrap(), "SOS");
    }

    #[test]
    fn test_char_count_is_authoritative() {
        // 3 and 4 characters both pack into 3 bytes; the zero padding reads
        // back as a trailing space if the count is wrong
        let packed = pack("SOS").unwrap();
        assert_eq!(packed_len(3), packed_len(4));
        assert_eq!(unpack(&packed, 3).unwrap(), "SOS");
        assert_eq!(unpack(&packed, 4).unwrap(), "SOS ");
    }
}
