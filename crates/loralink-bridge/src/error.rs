//! Error types for bridge operations
//!
//! Each concern has its own error enum ([`LinkError`], [`BufferError`],
//! [`StateError`], plus [`CodecError`] from the core crate). [`BridgeError`]
//! aggregates them for callers that only need a single type. None of these
//! errors stop the bridge; the router logs them and keeps running.

use loralink_core::CodecError;
use thiserror::Error;

/// Failures reported by the short-range or long-range link collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Short-range link has no connected peer
    #[error("Short-range link not connected")]
    NotConnected,

    /// Radio transmission failed after all attempts
    #[error("Transmit failed after {attempts} attempt(s)")]
    TransmitFailed {
        /// Number of attempts made
        attempts: u8,
    },

    /// Write to the short-range link was rejected
    #[error("Short-range write error: {0}")]
    WriteError(String),

    /// Radio driver reported an error
    #[error("Radio error: {0}")]
    RadioError(String),
}

/// Failures of the store buffers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Store rejected the message because it is at capacity
    #[error("Store full ({capacity} messages)")]
    Full {
        /// Capacity of the store
        capacity: usize,
    },

    /// Nothing to take
    #[error("Store empty")]
    Empty,

    /// Message cannot be written to a store slot
    #[error("Message cannot be stored: {0}")]
    Unstorable(CodecError),
}

/// Failures of the sleep-surviving state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Retained image failed validation and was reinitialized empty
    #[error("Persistent store corrupt, reinitialized: {reason}")]
    CorruptPersistentStore {
        /// What failed validation
        reason: String,
    },
}

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Wire codec error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Link error
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Store buffer error
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Retained state error
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// The bridge task has stopped and no longer answers commands
    #[error("Channel closed")]
    ChannelClosed,
}

impl BridgeError {
    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::Codec(err) => err.error_code(),
            BridgeError::Link(LinkError::NotConnected) => "NOT_CONNECTED",
            BridgeError::Link(LinkError::TransmitFailed { .. }) => "TRANSMIT_FAILED",
            BridgeError::Link(LinkError::WriteError(_)) => "WRITE_ERROR",
            BridgeError::Link(LinkError::RadioError(_)) => "RADIO_ERROR",
            BridgeError::Buffer(BufferError::Full { .. }) => "STORE_FULL",
            BridgeError::Buffer(BufferError::Empty) => "STORE_EMPTY",
            BridgeError::Buffer(BufferError::Unstorable(_)) => "UNSTORABLE",
            BridgeError::State(StateError::CorruptPersistentStore { .. }) => "CORRUPT_STORE",
            BridgeError::ChannelClosed => "CHANNEL_CLOSED",
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
