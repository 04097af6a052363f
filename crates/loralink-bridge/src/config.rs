//! Configuration types for the bridge device
//!
//! Durations are written in humantime form (`"500ms"`, `"2s"`, `"2m"`) and
//! every section falls back to firmware defaults when omitted.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Capacity of the volatile ring buffer and the persistent store
pub const STORE_CAPACITY: usize = 10;

/// Default guard delay before answering a text with an ack
pub const DEFAULT_ACK_GUARD_MS: u64 = 500;

/// Default inactivity timeout before suspending
pub const DEFAULT_INACTIVITY_SECS: u64 = 120;

/// Default radio frequency (433.92 MHz)
pub const DEFAULT_FREQUENCY_HZ: u64 = 433_920_000;

/// Default spreading factor
pub const DEFAULT_SPREADING_FACTOR: u8 = 10;

/// Default bandwidth (125 kHz)
pub const DEFAULT_BANDWIDTH_HZ: u32 = 125_000;

/// Default coding rate denominator (4/5)
pub const DEFAULT_CODING_RATE: u8 = 5;

/// Default transmit power in dBm
pub const DEFAULT_TX_POWER_DBM: i8 = 14;

/// Accepted transmit power range in dBm
pub const TX_POWER_RANGE_DBM: std::ops::RangeInclusive<i8> = -4..=20;

/// ISM bands the radio may be tuned to, in Hz (inclusive)
pub const ISM_BANDS_HZ: [(u64, u64); 3] = [
    (433_050_000, 434_790_000),
    (863_000_000, 870_000_000),
    (902_000_000, 928_000_000),
];

/// Complete device configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Router timing and queue sizes
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Sleep and wake behavior
    #[serde(default)]
    pub power: PowerConfig,

    /// Long-range radio parameters
    #[serde(default)]
    pub radio: RadioConfig,
}

/// Router timing and queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Wait after receiving a text before sending its ack
    #[serde(with = "humantime_serde", default = "default_ack_guard")]
    pub ack_guard: Duration,

    /// Pause after returning the radio to receive mode
    #[serde(with = "humantime_serde", default = "default_tx_settle")]
    pub tx_settle: Duration,

    /// Wait after a phone connects before draining stored messages
    #[serde(with = "humantime_serde", default = "default_reconnect_settle")]
    pub reconnect_settle: Duration,

    /// Minimum gap between drained deliveries
    #[serde(with = "humantime_serde", default = "default_drain_pacing")]
    pub drain_pacing: Duration,

    /// How long a transmitted text waits for its ack before it counts as missed
    #[serde(with = "humantime_serde", default = "default_ack_match_window")]
    pub ack_match_window: Duration,

    /// Capacity of the phone-to-radio event queue
    #[serde(default = "default_short_range_queue")]
    pub short_range_queue_size: usize,

    /// Capacity of the radio receive queue
    #[serde(default = "default_rx_queue")]
    pub rx_queue_size: usize,

    /// Main loop period
    #[serde(with = "humantime_serde", default = "default_loop_tick")]
    pub loop_tick: Duration,
}

fn default_ack_guard() -> Duration {
    Duration::from_millis(DEFAULT_ACK_GUARD_MS)
}

fn default_tx_settle() -> Duration {
    Duration::from_millis(50)
}

fn default_reconnect_settle() -> Duration {
    Duration::from_secs(2)
}

fn default_drain_pacing() -> Duration {
    Duration::from_millis(20)
}

fn default_ack_match_window() -> Duration {
    Duration::from_secs(10)
}

fn default_short_range_queue() -> usize {
    5
}

fn default_rx_queue() -> usize {
    15
}

fn default_loop_tick() -> Duration {
    Duration::from_millis(10)
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ack_guard: default_ack_guard(),
            tx_settle: default_tx_settle(),
            reconnect_settle: default_reconnect_settle(),
            drain_pacing: default_drain_pacing(),
            ack_match_window: default_ack_match_window(),
            short_range_queue_size: default_short_range_queue(),
            rx_queue_size: default_rx_queue(),
            loop_tick: default_loop_tick(),
        }
    }
}

/// Suspend depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SleepDepth {
    /// Retains peripheral state; fast resume, higher residual draw
    #[default]
    Light,
    /// Resets peripherals including the radio; lowest draw
    Deep,
}

impl std::fmt::Display for SleepDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SleepDepth::Light => write!(f, "light"),
            SleepDepth::Deep => write!(f, "deep"),
        }
    }
}

/// Sleep and wake configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    /// Idle time after which the device suspends
    #[serde(with = "humantime_serde", default = "default_inactivity_timeout")]
    pub inactivity_timeout: Duration,

    /// Inbound traffic goes to the persistent store once idle time is within
    /// this margin of the timeout
    #[serde(with = "humantime_serde", default = "default_imminent_margin")]
    pub imminent_margin: Duration,

    /// Depth used for inactivity suspends
    #[serde(default)]
    pub depth: SleepDepth,

    /// Buttons that wake the device in addition to the radio interrupt
    #[serde(default)]
    pub wake_buttons: Vec<u8>,

    /// Press length that forces a manual deep sleep
    #[serde(with = "humantime_serde", default = "default_long_press")]
    pub long_press: Duration,

    /// Transmit a notice over the radio before a manual deep sleep
    #[serde(default)]
    pub announce_deep_sleep: bool,
}

fn default_inactivity_timeout() -> Duration {
    Duration::from_secs(DEFAULT_INACTIVITY_SECS)
}

fn default_imminent_margin() -> Duration {
    Duration::from_secs(1)
}

fn default_long_press() -> Duration {
    Duration::from_secs(2)
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: default_inactivity_timeout(),
            imminent_margin: default_imminent_margin(),
            depth: SleepDepth::default(),
            wake_buttons: Vec::new(),
            long_press: default_long_press(),
            announce_deep_sleep: false,
        }
    }
}

/// Long-range radio parameters
///
/// Both ends of the link must use identical values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Carrier frequency in Hz
    #[serde(default = "default_frequency")]
    pub frequency_hz: u64,

    /// Spreading factor (7-12)
    #[serde(default = "default_spreading_factor")]
    pub spreading_factor: u8,

    /// Bandwidth in Hz
    #[serde(default = "default_bandwidth")]
    pub bandwidth_hz: u32,

    /// Coding rate denominator (5 means 4/5)
    #[serde(default = "default_coding_rate")]
    pub coding_rate: u8,

    /// Transmit power in dBm
    #[serde(default = "default_tx_power")]
    pub tx_power_dbm: i8,
}

fn default_frequency() -> u64 {
    DEFAULT_FREQUENCY_HZ
}

fn default_spreading_factor() -> u8 {
    DEFAULT_SPREADING_FACTOR
}

fn default_bandwidth() -> u32 {
    DEFAULT_BANDWIDTH_HZ
}

fn default_coding_rate() -> u8 {
    DEFAULT_CODING_RATE
}

fn default_tx_power() -> i8 {
    DEFAULT_TX_POWER_DBM
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            spreading_factor: DEFAULT_SPREADING_FACTOR,
            bandwidth_hz: DEFAULT_BANDWIDTH_HZ,
            coding_rate: DEFAULT_CODING_RATE,
            tx_power_dbm: DEFAULT_TX_POWER_DBM,
        }
    }
}

impl RadioConfig {
    /// Whether `frequency_hz` lies in one of the permitted ISM bands
    pub fn frequency_in_ism_band(frequency_hz: u64) -> bool {
        ISM_BANDS_HZ
            .iter()
            .any(|&(low, high)| frequency_hz >= low && frequency_hz <= high)
    }

    /// Replace out-of-range values with defaults, logging each substitution
    pub fn validated(mut self) -> Self {
        if !TX_POWER_RANGE_DBM.contains(&self.tx_power_dbm) {
            warn!(
                tx_power_dbm = self.tx_power_dbm,
                fallback = DEFAULT_TX_POWER_DBM,
                "TX power out of range, using default"
            );
            self.tx_power_dbm = DEFAULT_TX_POWER_DBM;
        }

        if !Self::frequency_in_ism_band(self.frequency_hz) {
            warn!(
                frequency_hz = self.frequency_hz,
                fallback = DEFAULT_FREQUENCY_HZ,
                "Frequency outside ISM bands, using default"
            );
            self.frequency_hz = DEFAULT_FREQUENCY_HZ;
        }

        self
    }

    /// Approximate time-on-air for a payload of `len` bytes
    ///
    /// Explicit header, CRC on, 8 symbol preamble, low data rate
    /// optimization enabled for SF11 and above.
    pub fn time_on_air(&self, len: usize) -> Duration {
        let sf = f64::from(self.spreading_factor);
        let bw = f64::from(self.bandwidth_hz);
        let symbol = (2f64).powf(sf) / bw;
        let de = if self.spreading_factor >= 11 { 2.0 } else { 0.0 };
        let cr = f64::from(self.coding_rate.saturating_sub(4).max(1));

        let payload_bits = 8.0 * len as f64 - 4.0 * sf + 28.0 + 16.0;
        let payload_symbols = 8.0 + ((payload_bits / (4.0 * (sf - de))).ceil() * (cr + 4.0)).max(0.0);
        let preamble = 8.0 + 4.25;

        Duration::from_secs_f64((preamble + payload_symbols) * symbol)
    }
}

/// Builder for DeviceConfig
#[derive(Debug, Default)]
pub struct DeviceConfigBuilder {
    config: DeviceConfig,
}

impl DeviceConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ack guard delay
    pub fn ack_guard(mut self, delay: Duration) -> Self {
        self.config.bridge.ack_guard = delay;
        self
    }

    /// Set the pause after returning the radio to receive mode
    pub fn tx_settle(mut self, delay: Duration) -> Self {
        self.config.bridge.tx_settle = delay;
        self
    }

    /// Set the reconnect settle interval
    pub fn reconnect_settle(mut self, delay: Duration) -> Self {
        self.config.bridge.reconnect_settle = delay;
        self
    }

    /// Set the drain pacing delay
    pub fn drain_pacing(mut self, delay: Duration) -> Self {
        self.config.bridge.drain_pacing = delay;
        self
    }

    /// Set the inactivity timeout
    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.config.power.inactivity_timeout = timeout;
        self
    }

    /// Set the suspend depth
    pub fn sleep_depth(mut self, depth: SleepDepth) -> Self {
        self.config.power.depth = depth;
        self
    }

    /// Add a wake button
    pub fn wake_button(mut self, pin: u8) -> Self {
        if !self.config.power.wake_buttons.contains(&pin) {
            self.config.power.wake_buttons.push(pin);
        }
        self
    }

    /// Enable or disable the deep sleep announcement
    pub fn announce_deep_sleep(mut self, enabled: bool) -> Self {
        self.config.power.announce_deep_sleep = enabled;
        self
    }

    /// Set radio parameters
    pub fn radio(mut self, radio: RadioConfig) -> Self {
        self.config.radio = radio;
        self
    }

    /// Build the configuration, validating radio parameters
    pub fn build(mut self) -> DeviceConfig {
        self.config.radio = self.config.radio.validated();
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
