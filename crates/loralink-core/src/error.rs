//! Error types for the wire codec
//!
//! Every failure of [`crate::codec::encode`] or [`crate::codec::decode`] is
//! reported through [`CodecError`]. Encoding never emits a partial frame: the
//! whole message is validated before the first byte is written.

use thiserror::Error;

/// Errors produced while encoding or decoding wire frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Text body longer than the on-air limit
    #[error("Text too long: {len} characters exceeds maximum of {max}")]
    TooLong {
        /// Number of characters in the body
        len: usize,
        /// Maximum number of characters allowed
        max: usize,
    },

    /// Character outside the 64-symbol charset
    #[error("Character {ch:?} is not in the 6-bit charset")]
    InvalidChar {
        /// The rejected character
        ch: char,
    },

    /// Output buffer cannot hold the encoded frame
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required for the frame
        needed: usize,
        /// Bytes available in the output buffer
        available: usize,
    },

    /// Input ended before the frame was complete
    #[error("Frame truncated: need {needed} bytes, got {available}")]
    Truncated {
        /// Bytes required to finish decoding
        needed: usize,
        /// Bytes actually present
        available: usize,
    },

    /// Leading type byte is not a known message type
    #[error("Unknown message type: 0x{0:02X}")]
    UnknownType(u8),
}

impl CodecError {
    /// Whether the error was caused by malformed input bytes rather than by
    /// the caller's message or buffer
    pub fn is_malformed_frame(&self) -> bool {
        matches!(
            self,
            CodecError::Truncated { .. } | CodecError::UnknownType(_)
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            CodecError::TooLong { .. } => "TOO_LONG",
            CodecError::InvalidChar { .. } => "INVALID_CHAR",
            CodecError::BufferTooSmall { .. } => "BUFFER_TOO_SMALL",
            CodecError::Truncated { .. } => "TRUNCATED",
            CodecError::UnknownType(_) => "UNKNOWN_TYPE",
        }
    }
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;
