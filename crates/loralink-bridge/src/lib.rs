//! LoraLink Bridge - store-and-forward relay between a phone link and a LoRa radio
//!
//! The bridge connects a short-range phone link (BLE) to a long-range,
//! low-bandwidth field radio. Messages written by the phone go out over the
//! radio; messages heard over the radio go to the phone, or wait in a store
//! until the phone comes back. The device sleeps when idle and keeps its
//! store across sleep.
//!
//! # Architecture
//!
//! 1. **Handoff queues** - bounded queues fed by the radio interrupt and the
//!    phone link callbacks ([`queue`])
//! 2. **Store** - volatile ring buffer plus a persistent store that survives
//!    suspend ([`store`])
//! 3. **Reliability** - guard-delayed acks and the single local retry
//!    ([`reliability`])
//! 4. **Power** - inactivity timeout, manual deep sleep and wake handling
//!    ([`power`], [`activity`])
//! 5. **Bridge** - the cooperative main loop tying the above together
//!    ([`bridge`])
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use loralink_bridge::{Bridge, DeviceConfigBuilder, RetainedRegion};
//!
//! #[tokio::main]
//! async fn main() -> loralink_bridge::Result<()> {
//!     let config = DeviceConfigBuilder::new()
//!         .inactivity_timeout(std::time::Duration::from_secs(120))
//!         .wake_button(0)
//!         .build();
//!
//!     let (bridge, endpoints) = Bridge::new(config, ble, lora, power, RetainedRegion::new());
//!     install_radio_isr(endpoints.radio_irq);
//!     install_ble_callbacks(endpoints.link_events);
//!
//!     bridge.run().await
//! }
//! ```
//!
//! # Message Flow
//!
//! ## Phone -> Radio
//!
//! 1. Phone writes a frame; the link callback queues it
//! 2. Main loop validates it with the codec
//! 3. Frame is transmitted with one retry, then the radio returns to receive
//!
//! ## Radio -> Phone
//!
//! 1. Radio interrupt copies the packet into the receive queue
//! 2. Main loop decodes it and schedules an ack after the guard delay
//! 3. Message is delivered to a ready phone, or buffered
//! 4. Buffered messages drain oldest-first once the phone has settled

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod activity;
pub mod bridge;
pub mod config;
pub mod error;
pub mod interface;
pub mod power;
pub mod queue;
pub mod reliability;
pub mod store;

pub mod test_utils;

pub use activity::ActivityClock;
pub use bridge::{
    Bridge, BridgeCommand, BridgeEndpoints, BridgeHandle, BridgeStats, DEEP_SLEEP_NOTICE,
};
pub use config::{
    BridgeConfig, DeviceConfig, DeviceConfigBuilder, PowerConfig, RadioConfig, SleepDepth,
};
pub use error::{BridgeError, BufferError, LinkError, Result, StateError};
pub use interface::{
    LongRangeLink, PowerControl, ShortRangeLink, SignalQuality, WakeCause, WakeSource,
};
pub use power::{ButtonAction, PowerState, SleepStateMachine, SuspendReason};
pub use queue::{LinkEvent, LinkEventSender, RadioIrqHandle, RxPacket};
pub use reliability::{AckScheduler, AckTracker, SequenceCounter};
pub use store::{PersistentStore, RetainedMemory, RetainedRegion, RingBuffer};

pub use config::{DEFAULT_ACK_GUARD_MS, DEFAULT_INACTIVITY_SECS, STORE_CAPACITY};
pub use store::{IMAGE_LEN, RETAINED_MAGIC};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_constants() {
        assert_eq!(STORE_CAPACITY, 10);
        assert_eq!(DEFAULT_ACK_GUARD_MS, 500);
        assert_eq!(RETAINED_MAGIC, 0xDEAD_BEEF);
        assert_eq!(IMAGE_LEN, 533);
    }
}
