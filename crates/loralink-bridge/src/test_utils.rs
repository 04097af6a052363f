//! Mock collaborators and fixtures for exercising the bridge without hardware
//!
//! Every mock keeps its state behind an `Arc<Mutex<_>>`, so a clone kept by
//! the test sees what the bridge did with the instance it owns.
//!
//! # Example
//!
//! ```rust,ignore
//! use loralink_bridge::test_utils::TestFixture;
//!
//! #[tokio::test(start_paused = true)]
//! async fn relays_to_phone() {
//!     let mut fixture = TestFixture::started(DeviceConfig::default()).await;
//!     fixture.connect_phone();
//!     fixture.radio_receive(&Message::text(1, "HELLO"));
//!     fixture.bridge.poll_once().await;
//!     assert_eq!(fixture.phone.delivered_messages().len(), 1);
//! }
//! ```

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use loralink_core::{codec, Message};

use crate::bridge::{Bridge, BridgeEndpoints};
use crate::config::{DeviceConfig, RadioConfig, SleepDepth};
use crate::error::LinkError;
use crate::interface::{
    LongRangeLink, PowerControl, ShortRangeLink, SignalQuality, WakeCause, WakeSource,
};
use crate::store::RetainedRegion;

/// RSSI reported for packets injected by [`TestFixture::radio_receive`]
pub const TEST_RSSI: i16 = -90;

/// SNR reported for packets injected by [`TestFixture::radio_receive`]
pub const TEST_SNR: f32 = 8.5;

/// Observable state of a [`MockShortRangeLink`]
#[derive(Debug, Default)]
pub struct MockPhoneState {
    /// Whether a phone is connected
    pub connected: bool,
    /// Frames delivered to the phone, in order
    pub delivered: Vec<Vec<u8>>,
    /// Remaining sends that will fail
    pub fail_sends: usize,
}

/// Mock phone-facing link
#[derive(Debug, Clone, Default)]
pub struct MockShortRangeLink {
    state: Arc<Mutex<MockPhoneState>>,
}

impl MockShortRangeLink {
    /// Create a disconnected link
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the shared state
    pub fn state(&self) -> MutexGuard<'_, MockPhoneState> {
        self.state.lock()
    }

    /// Set the connection state reported by `is_connected`
    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    /// Make the next `n` sends fail
    pub fn fail_next_sends(&self, n: usize) {
        self.state.lock().fail_sends = n;
    }

    /// Decode everything delivered so far
    pub fn delivered_messages(&self) -> Vec<Message> {
        self.state
            .lock()
            .delivered
            .iter()
            .filter_map(|frame| codec::decode(frame).ok())
            .collect()
    }
}

#[async_trait]
impl ShortRangeLink for MockShortRangeLink {
    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(LinkError::NotConnected);
        }
        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(LinkError::WriteError("mock notify failed".to_string()));
        }
        state.delivered.push(frame.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "MockShortRangeLink"
    }
}

/// Hook run by a mock in the middle of an operation
pub type MockHook = Box<dyn FnMut() + Send>;

/// Observable state of a [`MockLongRangeLink`]
#[derive(Default)]
pub struct MockRadioState {
    /// Successfully transmitted frames with their transmit time
    pub sent: Vec<(Instant, Vec<u8>)>,
    /// Every call to `send_packet`, successful or not
    pub send_attempts: usize,
    /// Calls to `start_receive`
    pub receive_starts: usize,
    /// Calls to `reinitialize`
    pub reinitializations: usize,
    /// Remaining sends that will fail
    pub fail_sends: usize,
    /// Whether the radio is currently in receive mode
    pub receiving: bool,
    /// Configuration passed to the last `reinitialize`
    pub config: Option<RadioConfig>,
    /// Run once during the next transmission
    pub on_send: Option<MockHook>,
}

impl std::fmt::Debug for MockRadioState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRadioState")
            .field("sent", &self.sent.len())
            .field("send_attempts", &self.send_attempts)
            .field("receive_starts", &self.receive_starts)
            .field("reinitializations", &self.reinitializations)
            .field("receiving", &self.receiving)
            .finish()
    }
}

/// Mock field radio
#[derive(Debug, Clone, Default)]
pub struct MockLongRangeLink {
    state: Arc<Mutex<MockRadioState>>,
}

impl MockLongRangeLink {
    /// Create an idle radio
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the shared state
    pub fn state(&self) -> MutexGuard<'_, MockRadioState> {
        self.state.lock()
    }

    /// Make the next `n` transmissions fail
    pub fn fail_next_sends(&self, n: usize) {
        self.state.lock().fail_sends = n;
    }

    /// Run `hook` while the next frame is on air
    ///
    /// Lets a test raise a receive interrupt while the bridge is busy
    /// transmitting.
    pub fn on_next_send(&self, hook: impl FnMut() + Send + 'static) {
        self.state.lock().on_send = Some(Box::new(hook));
    }

    /// Decode every frame transmitted so far
    pub fn sent_messages(&self) -> Vec<Message> {
        self.state
            .lock()
            .sent
            .iter()
            .filter_map(|(_, frame)| codec::decode(frame).ok())
            .collect()
    }
}

#[async_trait]
impl LongRangeLink for MockLongRangeLink {
    async fn start_receive(&mut self) -> Result<(), LinkError> {
        let mut state = self.state.lock();
        state.receive_starts += 1;
        state.receiving = true;
        Ok(())
    }

    async fn send_packet(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let hook = self.state.lock().on_send.take();
        if let Some(mut hook) = hook {
            hook();
        }

        let mut state = self.state.lock();
        state.send_attempts += 1;
        state.receiving = false;
        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(LinkError::RadioError("mock transmit timeout".to_string()));
        }
        state.sent.push((Instant::now(), frame.to_vec()));
        Ok(())
    }

    async fn reinitialize(&mut self, config: &RadioConfig) -> Result<(), LinkError> {
        let mut state = self.state.lock();
        state.reinitializations += 1;
        state.receiving = false;
        state.config = Some(config.clone());
        Ok(())
    }

    fn signal_quality(&self) -> SignalQuality {
        SignalQuality {
            rssi: TEST_RSSI,
            snr: TEST_SNR,
        }
    }

    fn name(&self) -> &str {
        "MockLongRangeLink"
    }
}


/// Observable state of a [`MockPowerControl`]
#[derive(Default)]
pub struct MockPowerState {
    /// Wake sources armed before the last suspend
    pub wake_sources: Vec<WakeSource>,
    /// Depth of every suspend, in order
    pub suspends: Vec<SleepDepth>,
    /// Calls to `power_down_peripherals`
    pub powered_down: usize,
    /// Calls to `power_up_peripherals`
    pub powered_up: usize,
    /// Wake cause reported by the next suspend
    pub wake_cause: Option<WakeCause>,
    /// Time spent suspended
    pub sleep_for: Duration,
    /// Run once during the next suspend
    pub on_suspend: Option<MockHook>,
}

impl std::fmt::Debug for MockPowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPowerState")
            .field("wake_sources", &self.wake_sources)
            .field("suspends", &self.suspends)
            .field("powered_down", &self.powered_down)
            .field("powered_up", &self.powered_up)
            .finish()
    }
}

/// Mock suspend/resume control
///
/// `suspend` sleeps for the configured duration (instant under paused time)
/// and reports the configured wake cause.
#[derive(Debug, Clone, Default)]
pub struct MockPowerControl {
    state: Arc<Mutex<MockPowerState>>,
}

impl MockPowerControl {
    /// Create a power control that wakes immediately on the radio interrupt
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the shared state
    pub fn state(&self) -> MutexGuard<'_, MockPowerState> {
        self.state.lock()
    }

    /// Set what ends the next suspend and how long it lasts
    pub fn wake_after(&self, sleep_for: Duration, cause: WakeCause) {
        let mut state = self.state.lock();
        state.sleep_for = sleep_for;
        state.wake_cause = Some(cause);
    }

    /// Run `hook` during the next suspend
    pub fn on_next_suspend(&self, hook: impl FnMut() + Send + 'static) {
        self.state.lock().on_suspend = Some(Box::new(hook));
    }
}

#[async_trait]
impl PowerControl for MockPowerControl {
    fn configure_wake_sources(&mut self, sources: &[WakeSource]) {
        self.state.lock().wake_sources = sources.to_vec();
    }

    fn power_down_peripherals(&mut self, _depth: SleepDepth) {
        self.state.lock().powered_down += 1;
    }

    async fn suspend(&mut self, depth: SleepDepth) -> WakeCause {
        let (sleep_for, cause, hook) = {
            let mut state = self.state.lock();
            state.suspends.push(depth);
            (
                state.sleep_for,
                state.wake_cause.unwrap_or(WakeCause::RadioInterrupt),
                state.on_suspend.take(),
            )
        };

        if let Some(mut hook) = hook {
            hook();
        }
        if !sleep_for.is_zero() {
            tokio::time::sleep(sleep_for).await;
        }
        cause
    }

    fn power_up_peripherals(&mut self, _depth: SleepDepth) {
        self.state.lock().powered_up += 1;
    }
}

/// Bridge wired to mocks, with handles to inspect and drive every side
pub struct TestFixture {
    /// Bridge under test
    pub bridge: Bridge<MockShortRangeLink, MockLongRangeLink, MockPowerControl>,
    /// Producers feeding the bridge
    pub endpoints: BridgeEndpoints,
    /// Shared view of the phone link
    pub phone: MockShortRangeLink,
    /// Shared view of the radio
    pub radio: MockLongRangeLink,
    /// Shared view of the power control
    pub power: MockPowerControl,
    /// Shared view of the retained memory
    pub memory: RetainedRegion,
}

impl TestFixture {
    /// Build a bridge over fresh mocks and empty retained memory
    pub fn new(config: DeviceConfig) -> Self {
        Self::with_memory(config, RetainedRegion::new())
    }

    /// Build a bridge over fresh mocks and the given retained memory
    pub fn with_memory(config: DeviceConfig, memory: RetainedRegion) -> Self {
        let phone = MockShortRangeLink::new();
        let radio = MockLongRangeLink::new();
        let power = MockPowerControl::new();
        let (bridge, endpoints) = Bridge::new(
            config,
            phone.clone(),
            radio.clone(),
            power.clone(),
            memory.clone(),
        );
        Self {
            bridge,
            endpoints,
            phone,
            radio,
            power,
            memory,
        }
    }

    /// Build and start a bridge
    pub async fn started(config: DeviceConfig) -> Self {
        let mut fixture = Self::new(config);
        if let Err(e) = fixture.bridge.start().await {
            panic!("mock bridge failed to start: {}", e);
        }
        fixture
    }

    /// Connect the phone and raise the connect event
    pub fn connect_phone(&self) {
        self.phone.set_connected(true);
        self.endpoints.link_events.connected();
    }

    /// Disconnect the phone and raise the disconnect event
    pub fn disconnect_phone(&self) {
        self.phone.set_connected(false);
        self.endpoints.link_events.disconnected();
    }

    /// Simulate the phone writing `message`
    pub fn phone_write(&self, message: &Message) -> bool {
        match codec::encode_to_vec(message) {
            Ok(frame) => self.endpoints.link_events.write_received(&frame),
            Err(_) => false,
        }
    }

    /// Simulate the radio interrupt delivering `message`
    pub fn radio_receive(&self, message: &Message) -> bool {
        match codec::encode_to_vec(message) {
            Ok(frame) => self.endpoints.radio_irq.on_packet(&frame, TEST_RSSI, TEST_SNR),
            Err(_) => false,
        }
    }

    /// Run `n` loop iterations, advancing paused time by `step` after each
    pub async fn run_for(&mut self, n: usize, step: Duration) {
        for _ in 0..n {
            self.bridge.poll_once().await;
            tokio::time::advance(step).await;
        }
    }
}
