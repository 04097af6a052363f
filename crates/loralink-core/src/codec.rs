//! On-air wire codec
//!
//! # Frame layouts
//!
//! All multi-byte integers are little-endian. There is no version byte.
//!
//! Text (`type = 0x01`):
//!
//! ```text
//! ┌──────┬─────┬───────────┬───────────┬─────────────────┬─────────┬────────┬────────┐
//! │ 0x01 │ seq │ charCount │ packedLen │ packed text ... │ hasLoc  │ lat i32│ lon i32│
//! │  1   │  1  │     1     │     1     │    packedLen    │ 1 (0|1) │ 4 opt. │ 4 opt. │
//! └──────┴─────┴───────────┴───────────┴─────────────────┴─────────┴────────┴────────┘
//! ```
//!
//! Ack (`type = 0x02`): `[0x02, seq]`, exactly two bytes.
//!
//! `charCount` is stored explicitly because `packedLen` alone cannot tell a
//! trailing padding code from a trailing space; decoding trusts `charCount`
//! and reads only `packedLen` bytes of packed text.

use crate::charset::{self, packed_len};
use crate::error::{CodecError, Result};
use crate::location::Location;
use crate::message::{Message, MessageType, MAX_TEXT_LENGTH};

/// Bytes before the packed text of a text frame
pub const TEXT_HEADER_LEN: usize = 4;

/// Bytes of an encoded position
pub const LOCATION_LEN: usize = 8;

/// Length of an ack frame
pub const ACK_FRAME_LEN: usize = 2;

/// Largest frame the codec can produce (full text with position)
pub const MAX_FRAME_LEN: usize = TEXT_HEADER_LEN + packed_len(MAX_TEXT_LENGTH) + 1 + LOCATION_LEN;

/// Number of bytes `message` occupies on air
///
/// Fails for messages that cannot be encoded at all.
pub fn encoded_len(message: &Message) -> Result<usize> {
    message.validate()?;
    Ok(match message {
        Message::Text { body, location, .. } => {
            let loc_len = if location.is_some() { LOCATION_LEN } else { 0 };
            TEXT_HEADER_LEN + packed_len(body.chars().count()) + 1 + loc_len
        }
        Message::Ack { .. } => ACK_FRAME_LEN,
    })
}

/// Encode `message` into `buf`, returning the frame length
///
/// Nothing is written unless the whole frame fits and validates.
pub fn encode(message: &Message, buf: &mut [u8]) -> Result<usize> {
    let needed = encoded_len(message)?;
    if buf.len() < needed {
        return Err(CodecError::BufferTooSmall {
            needed,
            available: buf.len(),
        });
    }

    match message {
        Message::Text {
            seq,
            body,
            location,
        } => {
            let char_count = body.chars().count();
            let packed = charset::pack_into(body, &mut buf[TEXT_HEADER_LEN..])?;

            buf[0] = MessageType::Text as u8;
            buf[1] = *seq;
            buf[2] = char_count as u8;
            buf[3] = packed as u8;

            let mut offset = TEXT_HEADER_LEN + packed;
            match location {
                Some(loc) => {
                    buf[offset] = 1;
                    offset += 1;
                    buf[offset..offset + 4].copy_from_slice(&loc.lat_micro.to_le_bytes());
                    buf[offset + 4..offset + 8].copy_from_slice(&loc.lon_micro.to_le_bytes());
                    offset += LOCATION_LEN;
                }
                None => {
                    buf[offset] = 0;
                    offset += 1;
                }
            }
            debug_assert_eq!(offset, needed);
            Ok(offset)
        }
        Message::Ack { seq } => {
            buf[0] = MessageType::Ack as u8;
            buf[1] = *seq;
            Ok(ACK_FRAME_LEN)
        }
    }
}

/// Encode `message` into a freshly allocated frame
pub fn encode_to_vec(message: &Message) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; encoded_len(message)?];
    let len = encode(message, &mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

/// Decode one frame from `buf`
///
/// Bytes after the end of the frame are ignored.
pub fn decode(buf: &[u8]) -> Result<Message> {
    let Some(&type_byte) = buf.first() else {
        return Err(CodecError::Truncated {
            needed: 1,
            available: 0,
        });
    };

    match MessageType::try_from(type_byte)? {
        MessageType::Text => decode_text(buf),
        MessageType::Ack => {
            require(buf, ACK_FRAME_LEN)?;
            Ok(Message::Ack { seq: buf[1] })
        }
    }
}

fn decode_text(buf: &[u8]) -> Result<Message> {
    require(buf, TEXT_HEADER_LEN)?;

    let seq = buf[1];
    let char_count = buf[2] as usize;
    let packed = buf[3] as usize;

    if char_count > MAX_TEXT_LENGTH {
        return Err(CodecError::TooLong {
            len: char_count,
            max: MAX_TEXT_LENGTH,
        });
    }

    let flag_offset = TEXT_HEADER_LEN + packed;
    require(buf, flag_offset + 1)?;

    let body = charset::unpack(&buf[TEXT_HEADER_LEN..flag_offset], char_count)?;

    let location = if buf[flag_offset] != 0 {
        let start = flag_offset + 1;
        require(buf, start + LOCATION_LEN)?;
        Some(Location {
            lat_micro: read_i32_le(&buf[start..start + 4]),
            lon_micro: read_i32_le(&buf[start + 4..start + 8]),
        })
    } else {
        None
    };

    Ok(Message::Text {
        seq,
        body,
        location,
    })
}

fn require(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        Err(CodecError::Truncated {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

fn read_i32_le(bytes: &[u8]) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    i32::from_le_bytes(raw)
}

impl Message {
    /// Encode this message into a new frame
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        encode_to_vec(self)
    }

    /// Decode a message from a frame
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        decode(frame)
    }
}
