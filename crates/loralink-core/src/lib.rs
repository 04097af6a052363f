//! LoraLink Core - Message model and wire codec for the LoRa text bridge
//!
//! This crate holds everything both ends of the long-range link must agree
//! on: the message model, the 6-bit text packing, and the frame layout sent
//! over the air. It has no runtime dependencies.
//!
//! # Modules
//!
//! - [`charset`] - 64-symbol alphabet and 6-bit packing
//! - [`message`] - Text and acknowledgment messages
//! - [`codec`] - Frame encoding and decoding
//! - [`location`] - Fixed-point positions in micro-degrees
//! - [`error`] - Codec error types
//!
//! # Example
//!
//! ```rust
//! use loralink_core::{codec, Message};
//!
//! let frame = codec::encode_to_vec(&Message::text(5, "hello")).unwrap();
//! assert_eq!(frame, [0x01, 0x05, 0x05, 0x04, 0x20, 0x53, 0x0C, 0x3C, 0x00]);
//!
//! let decoded = codec::decode(&frame).unwrap();
//! assert_eq!(decoded, Message::text(5, "HELLO"));
//! ```

pub mod charset;
pub mod codec;
pub mod error;
pub mod location;
pub mod message;

pub use codec::{decode, encode, encode_to_vec, MAX_FRAME_LEN};
pub use error::{CodecError, Result};
pub use location::Location;
pub use message::{Message, MessageType, MAX_TEXT_LENGTH};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.contains('.'), "VERSION should be semver format");
    }

    #[test]
    fn test_reexports() {
        let frame = encode_to_vec(&Message::ack(1)).unwrap();
        assert!(frame.len() <= MAX_FRAME_LEN);
        assert_eq!(decode(&frame).unwrap().message_type(), MessageType::Ack);
    }
}
