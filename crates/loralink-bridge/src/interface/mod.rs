//! Boundaries to the hardware collaborators
//!
//! The router only talks to the outside world through these traits:
//!
//! - [`ShortRangeLink`] - the phone-facing connection
//! - [`LongRangeLink`] - the half-duplex field radio
//! - [`PowerControl`] - wake source setup and suspend/resume
//!
//! Inbound traffic does not arrive through these traits. The radio's packet
//! interrupt and the phone stack's callbacks push onto the handoff queues in
//! [`crate::queue`] instead.

use async_trait::async_trait;

use crate::config::{RadioConfig, SleepDepth};
use crate::error::LinkError;

/// Phone-facing link
#[async_trait]
pub trait ShortRangeLink: Send + Sync {
    /// Check if a phone is currently connected
    fn is_connected(&self) -> bool;

    /// Notify the phone with one wire frame
    async fn send(&mut self, frame: &[u8]) -> Result<(), LinkError>;

    /// Get the link name (for logging)
    fn name(&self) -> &str;
}

/// Field radio link
///
/// The radio is half-duplex: after [`LongRangeLink::send_packet`] it stays in
/// standby until [`LongRangeLink::start_receive`] is called again.
#[async_trait]
pub trait LongRangeLink: Send + Sync {
    /// Put the radio into continuous receive mode
    async fn start_receive(&mut self) -> Result<(), LinkError>;

    /// Transmit one frame, returning once transmission has finished
    async fn send_packet(&mut self, frame: &[u8]) -> Result<(), LinkError>;

    /// Reprogram the radio from scratch
    ///
    /// Needed after a deep suspend, which does not retain radio registers.
    async fn reinitialize(&mut self, config: &RadioConfig) -> Result<(), LinkError>;

    /// Signal quality of the most recently received packet
    fn signal_quality(&self) -> SignalQuality;

    /// Get the link name (for logging)
    fn name(&self) -> &str;
}

/// Suspend and resume control
#[async_trait]
pub trait PowerControl: Send + Sync {
    /// Arm the given wake sources for the next suspend
    fn configure_wake_sources(&mut self, sources: &[WakeSource]);

    /// Turn off elective peripherals (display, LEDs) before suspending
    fn power_down_peripherals(&mut self, depth: SleepDepth);

    /// Suspend the whole system until a wake source fires
    async fn suspend(&mut self, depth: SleepDepth) -> WakeCause;

    /// Restore elective peripherals after waking
    fn power_up_peripherals(&mut self, depth: SleepDepth);
}

/// RSSI and SNR of a received packet
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SignalQuality {
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Signal-to-noise ratio in dB
    pub snr: f32,
}

impl std::fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RSSI {} dBm, SNR {:.1} dB", self.rssi, self.snr)
    }
}

/// Something that can bring the device out of suspend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WakeSource {
    /// Radio packet-ready interrupt line
    RadioInterrupt,
    /// Physical button on the given pin
    Button(u8),
}

/// What ended a suspend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    /// Radio received a packet
    RadioInterrupt,
    /// Button on the given pin was pressed
    Button(u8),
    /// Timer expired
    Timer,
    /// Reset or unrecognized source
    Unknown,
}

impl std::fmt::Display for WakeCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WakeCause::RadioInterrupt => write!(f, "radio interrupt"),
            WakeCause::Button(pin) => write!(f, "button {}", pin),
            WakeCause::Timer => write!(f, "timer"),
            WakeCause::Unknown => write!(f, "unknown"),
        }
    }
}
