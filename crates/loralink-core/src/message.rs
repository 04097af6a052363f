//! Message types carried between the phone link and the radio link

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::charset;
use crate::error::{CodecError, Result};
use crate::location::Location;

/// Maximum text body length in characters
///
/// 50 characters pack into 38 bytes, keeping the largest frame at 51 bytes
/// (about 600 ms time-on-air at SF10/BW125).
pub const MAX_TEXT_LENGTH: usize = 50;

/// Wire type discriminator (first byte of every frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Text message, optionally with a position
    Text = 0x01,
    /// Acknowledgment of a text message
    Ack = 0x02,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(MessageType::Text),
            0x02 => Ok(MessageType::Ack),
            other => Err(CodecError::UnknownType(other)),
        }
    }
}

/// A message relayed by the bridge
///
/// The position travels inside the text frame rather than in a separate GPS
/// frame, so `0x02` is unambiguously an acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// Text body with an optional position
    Text {
        /// Sequence number, wraps mod 256
        seq: u8,
        /// Uppercase body of at most [`MAX_TEXT_LENGTH`] charset symbols
        body: String,
        /// Sender position, if attached
        location: Option<Location>,
    },
    /// Acknowledgment for the text message with the same `seq`
    Ack {
        /// Sequence number being acknowledged
        seq: u8,
    },
}

impl Message {
    /// Create a text message; the body is folded to uppercase
    pub fn text(seq: u8, body: impl AsRef<str>) -> Self {
        Message::Text {
            seq,
            body: charset::normalize(body.as_ref()),
            location: None,
        }
    }

    /// Create a text message carrying a position
    pub fn text_with_location(seq: u8, body: impl AsRef<str>, location: Location) -> Self {
        Message::Text {
            seq,
            body: charset::normalize(body.as_ref()),
            location: Some(location),
        }
    }

    /// Create an acknowledgment
    pub fn ack(seq: u8) -> Self {
        Message::Ack { seq }
    }

    /// Sequence number of this message
    pub fn seq(&self) -> u8 {
        match self {
            Message::Text { seq, .. } | Message::Ack { seq } => *seq,
        }
    }

    /// Wire type of this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Text { .. } => MessageType::Text,
            Message::Ack { .. } => MessageType::Ack,
        }
    }

    /// Whether the receiving hop must answer with an [`Message::Ack`]
    pub fn requires_ack(&self) -> bool {
        matches!(self, Message::Text { .. })
    }

    /// Check the body length and charset without encoding
    pub fn validate(&self) -> Result<()> {
        if let Message::Text { body, .. } = self {
            let len = body.chars().count();
            if len > MAX_TEXT_LENGTH {
                return Err(CodecError::TooLong {
                    len,
                    max: MAX_TEXT_LENGTH,
                });
            }
            charset::validate(body)?;
        }
        Ok(())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Text {
                seq,
                body,
                location: Some(loc),
            } => write!(f, "TXT #{}: {} [{}]", seq, body, loc),
            Message::Text { seq, body, .. } => write!(f, "TXT #{}: {}", seq, body),
            Message::Ack { seq } => write!(f, "ACK #{}", seq),
        }
    }
}
