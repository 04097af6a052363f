//! Bridge - the cooperative main loop
//!
//! The bridge owns every piece of mutable state: the store buffers, the
//! activity clock and the ack schedule. Interrupt and callback contexts only
//! reach it through the bounded handoff queues, so nothing here needs a lock.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                              Bridge                               │
//! ├───────────────────────────────────────────────────────────────────┤
//! │                                                                   │
//! │  LinkEventQueue ──► phone frame ──► encode ──► transmit_with_retry│
//! │                                                       │           │
//! │  RadioRxQueue ──► decode ──┬─► AckScheduler ──► ack ──┤           │
//! │                            │                          ▼           │
//! │                            │                    LongRangeLink     │
//! │                            ▼                                      │
//! │          phone ready? ──► ShortRangeLink                          │
//! │                 │                                                 │
//! │                 └─► RingBuffer / PersistentStore ──► drain        │
//! │                                                                   │
//! │  ActivityClock ──► SleepStateMachine ──► PowerControl::suspend    │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let (bridge, endpoints) = Bridge::new(config, phone, radio, power, RetainedRegion::new());
//!
//! // Hand the producers to the interrupt and callback contexts
//! install_radio_isr(endpoints.radio_irq);
//! install_phone_callbacks(endpoints.link_events);
//!
//! tokio::spawn(bridge.run());
//! let stats = endpoints.handle.stats().await?;
//! ```

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use loralink_core::{codec, Message};

use crate::activity::ActivityClock;
use crate::config::{DeviceConfig, SleepDepth, STORE_CAPACITY};
use crate::error::{BridgeError, BufferError, Result};
use crate::interface::{LongRangeLink, PowerControl, ShortRangeLink, SignalQuality, WakeCause};
use crate::power::{ButtonAction, PowerState, SleepStateMachine, SuspendReason};
use crate::queue::{
    link_event_queue, rx_queue, LinkEvent, LinkEventQueue, LinkEventSender, RadioIrqHandle,
    RadioRxQueue, RxPacket,
};
use crate::reliability::{
    restore_receive, transmit_once, transmit_with_retry, AckMatch, AckScheduler, AckTracker,
    SequenceCounter,
};
use crate::store::{PersistentStore, RetainedMemory, RingBuffer};

/// Text transmitted before a manual deep sleep when announcements are enabled
pub const DEEP_SLEEP_NOTICE: &str = "GOING TO DEEP SLEEP";

/// Commands that can be sent to the bridge
#[derive(Debug)]
pub enum BridgeCommand {
    /// Get bridge statistics
    GetStats(oneshot::Sender<BridgeStats>),
    /// Shutdown the bridge
    Shutdown,
}

/// Bridge statistics
#[derive(Debug, Clone, Default)]
pub struct BridgeStats {
    /// Phone frames transmitted over the radio
    pub phone_to_radio: u64,
    /// Radio messages delivered to the phone (directly or drained)
    pub radio_to_phone: u64,
    /// Deliveries that came out of a store buffer
    pub drained: u64,
    /// Radio messages placed in the ring buffer
    pub buffered_volatile: u64,
    /// Radio messages placed in the persistent store
    pub buffered_persistent: u64,
    /// Messages evicted from a full ring buffer
    pub ring_evictions: u64,
    /// Messages dropped because the persistent store was full
    pub store_full_drops: u64,
    /// Phone writes that were not valid frames
    pub phone_frames_rejected: u64,
    /// Radio packets that failed to decode
    pub decode_failures: u64,
    /// Radio packets dropped by the interrupt handoff (full queue or oversize)
    pub rx_queue_drops: u64,
    /// Data frames that needed their retry
    pub transmit_retries: u64,
    /// Data frames dropped after the retry failed
    pub transmit_failures: u64,
    /// Acks transmitted
    pub acks_sent: u64,
    /// Acks whose single attempt failed
    pub acks_failed: u64,
    /// Acks dropped because the device suspended first
    pub acks_cancelled: u64,
    /// Inbound acks matching a text we sent
    pub acks_matched: u64,
    /// Texts we sent that never got an ack within the window
    pub acks_missed: u64,
    /// Suspends entered
    pub suspends: u64,
    /// Wakes from suspend
    pub wakes: u64,
    /// Persistent store reinitializations after failed validation
    pub store_resets: u64,
    /// RSSI of the last received packet
    pub last_rssi: Option<i16>,
    /// SNR of the last received packet
    pub last_snr: Option<f32>,
    /// Radio's own signal readout after the last decoded packet
    pub link_quality: Option<SignalQuality>,
}

/// Handle for controlling the Bridge
#[derive(Clone)]
pub struct BridgeHandle {
    command_tx: mpsc::Sender<BridgeCommand>,
}

impl BridgeHandle {
    /// Get bridge statistics
    ///
    /// Answered at the next loop iteration, so this waits out a suspend.
    pub async fn stats(&self) -> Result<BridgeStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(BridgeCommand::GetStats(tx))
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    /// Shutdown the bridge
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(BridgeCommand::Shutdown)
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }
}

/// Producers handed to the contexts that feed the bridge
pub struct BridgeEndpoints {
    /// Command handle for other tasks
    pub handle: BridgeHandle,
    /// Producer for the radio packet-ready interrupt
    pub radio_irq: RadioIrqHandle,
    /// Producer for the phone link callbacks and the wake button
    pub link_events: LinkEventSender,
}

/// Message bridge between a phone link and a field radio
pub struct Bridge<S, L, P> {
    config: DeviceConfig,
    phone: S,
    radio: L,
    power: P,
    rx_queue: RadioRxQueue,
    link_events: LinkEventQueue,
    command_rx: mpsc::Receiver<BridgeCommand>,
    ring: RingBuffer,
    store: PersistentStore,
    clock: ActivityClock,
    sleep: SleepStateMachine,
    acks: AckScheduler,
    tracker: AckTracker,
    own_seq: SequenceCounter,
    /// When the phone was last seen connecting, `None` while disconnected
    phone_connected_at: Option<Instant>,
    next_drain_at: Instant,
    booted_at: Instant,
    stats: BridgeStats,
    running: bool,
}

impl<S, L, P> Bridge<S, L, P>
where
    S: ShortRangeLink + 'static,
    L: LongRangeLink + 'static,
    P: PowerControl + 'static,
{
    /// Create a bridge and the producers that feed it
    ///
    /// The persistent store is opened from `memory` immediately, so messages
    /// retained from before a restart of the main loop are kept.
    pub fn new(
        config: DeviceConfig,
        phone: S,
        radio: L,
        power: P,
        memory: impl RetainedMemory + 'static,
    ) -> (Self, BridgeEndpoints) {
        let now = Instant::now();
        let (radio_irq, rx_queue) = rx_queue(config.bridge.rx_queue_size);
        let (link_events, link_queue) = link_event_queue(config.bridge.short_range_queue_size);
        let (command_tx, command_rx) = mpsc::channel(16);

        let bridge = Self {
            rx_queue,
            link_events: link_queue,
            command_rx,
            phone,
            radio,
            power,
            ring: RingBuffer::new(STORE_CAPACITY),
            store: PersistentStore::open(memory),
            clock: ActivityClock::new(now),
            sleep: SleepStateMachine::new(config.power.clone()),
            acks: AckScheduler::new(config.bridge.ack_guard),
            tracker: AckTracker::new(config.bridge.ack_match_window),
            own_seq: SequenceCounter::default(),
            phone_connected_at: None,
            next_drain_at: now,
            booted_at: now,
            stats: BridgeStats::default(),
            running: false,
            config,
        };

        let endpoints = BridgeEndpoints {
            handle: BridgeHandle { command_tx },
            radio_irq,
            link_events,
        };

        (bridge, endpoints)
    }

    /// Bring the radio up in receive mode
    pub async fn start(&mut self) -> Result<()> {
        self.config.radio = self.config.radio.clone().validated();
        self.radio.reinitialize(&self.config.radio).await?;
        self.radio.start_receive().await?;
        self.clock.reset(Instant::now());
        info!(
            radio = self.radio.name(),
            phone = self.phone.name(),
            frequency_hz = self.config.radio.frequency_hz,
            stored = self.store.count(),
            "Bridge started"
        );
        Ok(())
    }

    /// Run the bridge service
    ///
    /// Polls the handoff queues once per loop tick until a shutdown command
    /// arrives. The only long wait is a suspend.
    pub async fn run(mut self) -> Result<()> {
        info!("Starting bridge service");
        self.start().await?;
        self.running = true;

        let mut tick = tokio::time::interval(self.config.bridge.loop_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.running {
            tick.tick().await;
            self.handle_commands();
            if !self.running {
                break;
            }
            self.poll_once().await;
        }

        info!(
            phone_to_radio = self.stats.phone_to_radio,
            radio_to_phone = self.stats.radio_to_phone,
            "Bridge stopped"
        );
        Ok(())
    }

    fn handle_commands(&mut self) {
        while let Ok(cmd) = self.command_rx.try_recv() {
            match cmd {
                BridgeCommand::GetStats(tx) => {
                    let _ = tx.send(self.stats.clone());
                }
                BridgeCommand::Shutdown => {
                    info!("Bridge shutdown requested");
                    self.running = false;
                }
            }
        }
    }

    /// Run one iteration of the main loop
    pub async fn poll_once(&mut self) {
        self.collect_rx_drops();

        self.service_link_events().await;
        self.sync_phone_state(Instant::now());

        self.service_radio_rx().await;
        self.service_due_ack().await;
        self.service_drain().await;

        let missed = self.tracker.expire(Instant::now());
        if missed > 0 {
            debug!(missed, "Sent texts expired without an ack");
            self.stats.acks_missed += missed as u64;
        }

        self.check_sleep().await;
    }

    fn collect_rx_drops(&mut self) {
        let full = self.rx_queue.take_queue_drops();
        let oversize = self.rx_queue.take_oversize_drops();
        if full > 0 {
            warn!(dropped = full, "Radio receive queue full, packets dropped");
        }
        if oversize > 0 {
            warn!(dropped = oversize, "Oversize radio packets dropped");
        }
        self.stats.rx_queue_drops += u64::from(full) + u64::from(oversize);
    }

    /// Apply queued phone events; at most one phone frame is transmitted
    async fn service_link_events(&mut self) {
        while let Some(event) = self.link_events.poll() {
            match event {
                LinkEvent::WriteReceived(frame) => {
                    self.forward_phone_frame(&frame).await;
                    return;
                }
                other => self.apply_control_event(other),
            }
        }
    }

    fn apply_control_event(&mut self, event: LinkEvent) {
        let now = Instant::now();
        match event {
            LinkEvent::Connected => {
                if self.phone_connected_at.is_none() {
                    self.on_phone_connected(now);
                }
            }
            LinkEvent::Disconnected => {
                if self.phone_connected_at.take().is_some() {
                    info!(phone = self.phone.name(), "Phone disconnected");
                }
            }
            LinkEvent::ButtonPressed { pin, held } => match self.sleep.classify_press(held) {
                ButtonAction::ShortPress => {
                    debug!(pin, held_ms = held.as_millis() as u64, "Short button press");
                    self.clock.touch(now);
                }
                ButtonAction::LongPress => {
                    info!(pin, held_ms = held.as_millis() as u64, "Long press, deep sleep requested");
                    self.sleep.request_manual_sleep();
                }
            },
            LinkEvent::WriteReceived(_) => {}
        }
    }

    fn on_phone_connected(&mut self, now: Instant) {
        info!(
            phone = self.phone.name(),
            stored = self.store.count() + self.ring.count(),
            "Phone connected"
        );
        self.phone_connected_at = Some(now);
        self.next_drain_at = now + self.config.bridge.reconnect_settle;
        self.clock.touch(now);
    }

    /// Reconcile with the link's own view in case an event was dropped
    fn sync_phone_state(&mut self, now: Instant) {
        match (self.phone.is_connected(), self.phone_connected_at) {
            (true, None) => self.on_phone_connected(now),
            (false, Some(_)) => {
                info!(phone = self.phone.name(), "Phone link lost");
                self.phone_connected_at = None;
            }
            _ => {}
        }
    }

    /// Validate a phone frame and send it over the radio
    async fn forward_phone_frame(&mut self, raw: &[u8]) {
        let message = match codec::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(len = raw.len(), code = e.error_code(), "Rejected phone frame: {}", e);
                self.stats.phone_frames_rejected += 1;
                return;
            }
        };

        let frame = match codec::encode_to_vec(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%message, code = e.error_code(), "Rejected phone frame: {}", e);
                self.stats.phone_frames_rejected += 1;
                return;
            }
        };

        self.clock.touch(Instant::now());
        match transmit_with_retry(&mut self.radio, &frame, self.config.bridge.tx_settle).await {
            Ok(attempts) => {
                info!(%message, attempts, "Phone -> radio");
                self.stats.phone_to_radio += 1;
                if attempts > 1 {
                    self.stats.transmit_retries += 1;
                }
                if message.requires_ack() {
                    let missed = self.tracker.record_sent(message.seq(), Instant::now());
                    self.stats.acks_missed += missed as u64;
                }
            }
            Err(e) => {
                warn!(%message, "Dropping phone message: {}", e);
                self.stats.transmit_retries += 1;
                self.stats.transmit_failures += 1;
            }
        }
        self.clock.touch(Instant::now());
    }

    /// Decode one received packet, schedule its ack and route it
    async fn service_radio_rx(&mut self) {
        let Some(packet) = self.rx_queue.poll() else {
            return;
        };
        let now = Instant::now();
        let imminent = self.sleep.is_imminent(&self.clock, now);

        let Some(message) = self.decode_packet(&packet) else {
            return;
        };
        self.clock.touch(now);

        match &message {
            Message::Text { seq, .. } => {
                self.acks.schedule(*seq, now);
            }
            Message::Ack { seq } => match self.tracker.on_ack(*seq, now) {
                AckMatch::Matched { latency } => {
                    info!(seq, latency_ms = latency.as_millis() as u64, "Delivery confirmed");
                    self.stats.acks_matched += 1;
                }
                AckMatch::Unmatched => debug!(seq, "Ack for unknown sequence"),
            },
        }

        self.route_inbound(message, imminent).await;
    }

    fn decode_packet(&mut self, packet: &RxPacket) -> Option<Message> {
        self.stats.last_rssi = Some(packet.rssi);
        self.stats.last_snr = Some(packet.snr);

        match codec::decode(packet.bytes()) {
            Ok(message) => {
                let quality = self.radio.signal_quality();
                debug!(
                    %message,
                    rssi = packet.rssi,
                    snr = packet.snr,
                    %quality,
                    "Radio packet received"
                );
                self.stats.link_quality = Some(quality);
                Some(message)
            }
            Err(e) if e.is_malformed_frame() => {
                debug!(len = packet.len(), code = e.error_code(), "Discarding undecodable packet: {}", e);
                self.stats.decode_failures += 1;
                None
            }
            Err(e) => {
                // Well-formed frame carrying content we cannot represent
                warn!(len = packet.len(), code = e.error_code(), "Discarding incompatible packet: {}", e);
                self.stats.decode_failures += 1;
                None
            }
        }
    }

    fn phone_ready(&self) -> bool {
        self.phone_connected_at.is_some() && self.phone.is_connected()
    }

    /// Deliver to the phone, or buffer if it cannot take the message yet
    async fn route_inbound(&mut self, message: Message, imminent: bool) {
        let backlog = !self.store.is_empty() || !self.ring.is_empty();

        if self.phone_ready() && !backlog {
            match self.deliver(&message).await {
                Ok(()) => {
                    info!(%message, "Radio -> phone");
                    self.stats.radio_to_phone += 1;
                    return;
                }
                Err(e) => warn!(%message, "Phone delivery failed, buffering: {}", e),
            }
        }

        if imminent && !self.store.is_full() {
            // Older ring entries go first so the drain order stays by arrival
            self.migrate_ring();
            self.buffer_persistent(message);
        } else {
            self.buffer_volatile(message);
        }
    }

    fn buffer_volatile(&mut self, message: Message) {
        debug!(%message, "Buffering in ring buffer");
        self.stats.buffered_volatile += 1;
        if let Some(evicted) = self.ring.add(message) {
            warn!(%evicted, "Ring buffer full, oldest message evicted");
            self.stats.ring_evictions += 1;
        }
    }

    fn buffer_persistent(&mut self, message: Message) -> bool {
        let text = message.to_string();
        match self.store.add(message) {
            Ok(()) => {
                debug!(message = %text, stored = self.store.count(), "Stored for sleep");
                self.stats.buffered_persistent += 1;
                true
            }
            Err(BufferError::Full { capacity }) => {
                warn!(message = %text, capacity, "Persistent store full, message dropped");
                self.stats.store_full_drops += 1;
                false
            }
            Err(e) => {
                warn!(message = %text, "Message dropped: {}", e);
                self.stats.store_full_drops += 1;
                false
            }
        }
    }

    /// Move the ring buffer into the persistent store, oldest first
    fn migrate_ring(&mut self) {
        let mut moved = 0usize;
        while let Ok(message) = self.ring.take() {
            if self.buffer_persistent(message) {
                moved += 1;
            }
        }
        if moved > 0 {
            info!(moved, "Moved ring buffer into persistent store");
        }
    }

    async fn deliver(&mut self, message: &Message) -> Result<()> {
        let frame = codec::encode_to_vec(message)?;
        self.phone.send(&frame).await?;
        self.clock.touch(Instant::now());
        Ok(())
    }

    /// Send the oldest ack whose guard delay has elapsed
    async fn service_due_ack(&mut self) {
        let Some(seq) = self.acks.due_ack(Instant::now()) else {
            return;
        };

        let frame = match codec::encode_to_vec(&Message::ack(seq)) {
            Ok(frame) => frame,
            Err(e) => {
                error!(seq, "Failed to encode ack: {}", e);
                return;
            }
        };

        match transmit_once(&mut self.radio, &frame, self.config.bridge.tx_settle).await {
            Ok(()) => {
                debug!(seq, "Ack sent");
                self.stats.acks_sent += 1;
            }
            Err(e) => {
                warn!(seq, "Ack not sent: {}", e);
                self.stats.acks_failed += 1;
            }
        }
    }

    /// Deliver one buffered message if the phone has settled
    async fn service_drain(&mut self) {
        let now = Instant::now();
        if !self.phone_ready() || now < self.next_drain_at {
            return;
        }

        let from_store = !self.store.is_empty();
        let message = if from_store {
            self.store.peek().cloned()
        } else {
            self.ring.peek().cloned()
        };
        let Some(message) = message else {
            return;
        };

        match self.deliver(&message).await {
            Ok(()) => {
                let _ = if from_store {
                    self.store.take()
                } else {
                    self.ring.take()
                };
                info!(
                    %message,
                    remaining = self.store.count() + self.ring.count(),
                    "Drained to phone"
                );
                self.stats.radio_to_phone += 1;
                self.stats.drained += 1;
                self.next_drain_at = Instant::now() + self.config.bridge.drain_pacing;
            }
            Err(e) => {
                warn!(
                    %message,
                    remaining = self.store.count() + self.ring.count(),
                    "Drain stopped: {}",
                    e
                );
                self.next_drain_at = Instant::now() + self.config.bridge.reconnect_settle;
            }
        }
    }

    async fn check_sleep(&mut self) {
        if let Some(reason) = self.sleep.should_suspend(&self.clock, Instant::now()) {
            self.suspend(reason).await;
        }
    }

    /// Suspend the device and restore it after wake
    pub async fn suspend(&mut self, reason: SuspendReason) {
        let depth = self.sleep.depth_for(reason);
        info!(
            ?reason,
            %depth,
            idle_ms = self.clock.idle(Instant::now()).as_millis() as u64,
            "Preparing to suspend"
        );

        if reason == SuspendReason::ManualDeepSleep && self.sleep.config().announce_deep_sleep {
            self.announce_deep_sleep().await;
        }

        self.prepare_suspend().await;

        self.power.configure_wake_sources(&self.sleep.wake_sources());
        self.power.power_down_peripherals(depth);
        self.sleep.enter_suspended();
        self.stats.suspends += 1;

        let cause = self.power.suspend(depth).await;
        self.resume(cause, depth).await;
    }

    async fn announce_deep_sleep(&mut self) {
        let notice = Message::text(self.own_seq.next_seq(), DEEP_SLEEP_NOTICE);
        let frame = match codec::encode_to_vec(&notice) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode deep sleep notice: {}", e);
                return;
            }
        };
        match transmit_with_retry(&mut self.radio, &frame, self.config.bridge.tx_settle).await {
            Ok(_) => info!(%notice, "Deep sleep announced"),
            Err(e) => warn!("Deep sleep notice not sent: {}", e),
        }
    }

    /// Move everything in flight somewhere that survives the suspend
    async fn prepare_suspend(&mut self) {
        // Phone frames are outbound and cannot wait in a store meant for the
        // phone, so they are transmitted now.
        while let Some(event) = self.link_events.poll() {
            match event {
                LinkEvent::WriteReceived(frame) => self.forward_phone_frame(&frame).await,
                LinkEvent::ButtonPressed { pin, .. } => {
                    trace!(pin, "Ignoring button press during suspend");
                }
                other => self.apply_control_event(other),
            }
        }

        self.migrate_ring();

        while let Some(packet) = self.rx_queue.poll() {
            if let Some(message) = self.decode_packet(&packet) {
                if message.requires_ack() {
                    self.stats.acks_cancelled += 1;
                }
                self.buffer_persistent(message);
            }
        }

        let cancelled = self.acks.cancel_all();
        if !cancelled.is_empty() {
            warn!(?cancelled, "Pending acks dropped by suspend");
            self.stats.acks_cancelled += cancelled.len() as u64;
        }

        let last_activity = self.clock.last().saturating_duration_since(self.booted_at);
        self.store
            .set_last_activity_ms(u32::try_from(last_activity.as_millis()).unwrap_or(u32::MAX));
        self.store.commit();
        info!(stored = self.store.count(), "Persistent store committed");
    }

    async fn resume(&mut self, cause: WakeCause, depth: SleepDepth) {
        self.power.power_up_peripherals(depth);
        self.sleep.wake();
        self.stats.wakes += 1;

        if let Err(e) = self.store.revalidate() {
            warn!("{}", e);
            self.stats.store_resets += 1;
        }
        let wake_count = self.store.record_wake();
        info!(%cause, %depth, wake_count, stored = self.store.count(), "Woke up");

        if let Err(e) = self.radio.reinitialize(&self.config.radio).await {
            error!(radio = self.radio.name(), "Radio reinitialization failed: {}", e);
        }
        restore_receive(&mut self.radio, self.config.bridge.tx_settle).await;

        let now = Instant::now();
        self.clock.reset(now);
        self.phone_connected_at = None;
        self.sync_phone_state(now);
    }

    /// Bridge statistics
    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// Volatile buffer contents
    pub fn ring_buffer(&self) -> &RingBuffer {
        &self.ring
    }

    /// Sleep-surviving store contents
    pub fn persistent_store(&self) -> &PersistentStore {
        &self.store
    }

    /// Number of acks waiting for their guard delay
    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    /// Current power state
    pub fn power_state(&self) -> PowerState {
        self.sleep.state()
    }

    /// Activity clock
    pub fn activity(&self) -> &ActivityClock {
        &self.clock
    }

    /// Configuration in use
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Remaining time before an inactivity suspend, `None` if disabled
    pub fn time_to_sleep(&self) -> Option<Duration> {
        if !self.sleep.auto_sleep_enabled() {
            return None;
        }
        Some(
            self.config
                .power
                .inactivity_timeout
                .saturating_sub(self.clock.idle(Instant::now())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfigBuilder;
    use crate::test_utils::{TestFixture, TEST_RSSI, TEST_SNR};
    use loralink_core::Location;

    fn quiet_config() -> DeviceConfig {
        DeviceConfigBuilder::new()
            .inactivity_timeout(Duration::ZERO)
            .tx_settle(Duration::ZERO)
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_bridge_creation() {
        let fixture = TestFixture::new(quiet_config());
        assert!(!fixture.bridge.running);
        assert_eq!(fixture.bridge.power_state(), PowerState::Active);
        assert!(fixture.bridge.ring_buffer().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_initializes_radio() {
        let mut fixture = TestFixture::new(quiet_config());
        fixture.bridge.start().await.unwrap();
        assert_eq!(fixture.radio.state().reinitializations, 1);
        assert_eq!(fixture.radio.state().receive_starts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_phone_frame_transmitted() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        fixture.phone_write(&Message::text(3, "ON MY WAY"));
        fixture.bridge.poll_once().await;

        let sent = fixture.radio.sent_messages();
        assert_eq!(sent, vec![Message::text(3, "ON MY WAY")]);
        assert_eq!(fixture.bridge.stats().phone_to_radio, 1);
        assert_eq!(fixture.radio.state().receive_starts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_phone_frame_rejected() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        fixture.endpoints.link_events.write_received(&[0x09, 0x00]);
        fixture.bridge.poll_once().await;

        assert!(fixture.radio.sent_messages().is_empty());
        assert_eq!(fixture.bridge.stats().phone_frames_rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_phone_frame_per_iteration() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        fixture.phone_write(&Message::text(1, "A"));
        fixture.phone_write(&Message::text(2, "B"));

        fixture.bridge.poll_once().await;
        assert_eq!(fixture.radio.sent_messages().len(), 1);
        fixture.bridge.poll_once().await;
        assert_eq!(fixture.radio.sent_messages().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_failure_drops_after_retry() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        fixture.radio.fail_next_sends(2);
        fixture.phone_write(&Message::text(1, "LOST"));
        fixture.bridge.poll_once().await;

        assert!(fixture.radio.sent_messages().is_empty());
        assert_eq!(fixture.radio.state().send_attempts, 2);
        assert_eq!(fixture.bridge.stats().transmit_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_received_text_goes_to_connected_phone() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        fixture.connect_phone();
        fixture.bridge.poll_once().await;

        let msg = Message::text_with_location(8, "ALL GOOD", Location::new(46_100_000, 7_200_000));
        fixture.radio_receive(&msg);
        fixture.bridge.poll_once().await;

        assert_eq!(fixture.phone.delivered_messages(), vec![msg]);
        assert_eq!(fixture.bridge.pending_acks(), 1);
        assert_eq!(fixture.bridge.stats().last_rssi, Some(-90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_radio_signal_readout_recorded() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        assert!(fixture.bridge.stats().link_quality.is_none());

        fixture.radio_receive(&Message::text(4, "LOUD AND CLEAR"));
        fixture.bridge.poll_once().await;

        assert_eq!(
            fixture.bridge.stats().link_quality,
            Some(SignalQuality {
                rssi: TEST_RSSI,
                snr: TEST_SNR,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_received_text_buffered_without_phone() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        fixture.radio_receive(&Message::text(1, "HELLO"));
        fixture.bridge.poll_once().await;

        assert_eq!(fixture.bridge.ring_buffer().count(), 1);
        assert!(fixture.phone.delivered_messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_packet_discarded_without_ack() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        fixture.endpoints.radio_irq.on_packet(&[0x01, 0x05], -100, 1.0);
        fixture.bridge.poll_once().await;

        assert_eq!(fixture.bridge.stats().decode_failures, 1);
        assert_eq!(fixture.bridge.pending_acks(), 0);
        assert!(fixture.bridge.ring_buffer().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_sent_after_guard_delay() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        fixture.radio_receive(&Message::text(42, "PING"));
        let received_at = Instant::now();
        fixture.bridge.poll_once().await;
        assert!(fixture.radio.sent_messages().is_empty());

        tokio::time::advance(Duration::from_millis(499)).await;
        fixture.bridge.poll_once().await;
        assert!(fixture.radio.sent_messages().is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        fixture.bridge.poll_once().await;

        let sent = fixture.radio.state().sent.clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(codec::decode(&sent[0].1).unwrap(), Message::ack(42));
        assert!(sent[0].0 >= received_at + Duration::from_millis(500));
        assert_eq!(fixture.bridge.stats().acks_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_received_ack_not_acked() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        fixture.radio_receive(&Message::ack(5));
        fixture.bridge.poll_once().await;
        assert_eq!(fixture.bridge.pending_acks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_ack_matches_sent_text() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        fixture.phone_write(&Message::text(11, "CHECK IN"));
        fixture.bridge.poll_once().await;

        tokio::time::advance(Duration::from_millis(900)).await;
        fixture.radio_receive(&Message::ack(11));
        fixture.bridge.poll_once().await;
        assert_eq!(fixture.bridge.stats().acks_matched, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_settle_then_paces() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        for n in 1..=3 {
            fixture.radio_receive(&Message::text(n, "QUEUED"));
            fixture.bridge.poll_once().await;
        }
        assert_eq!(fixture.bridge.ring_buffer().count(), 3);

        fixture.connect_phone();
        fixture.bridge.poll_once().await;
        tokio::time::advance(Duration::from_millis(1900)).await;
        fixture.bridge.poll_once().await;
        assert!(fixture.phone.delivered_messages().is_empty());

        tokio::time::advance(Duration::from_millis(100)).await;
        fixture.bridge.poll_once().await;
        assert_eq!(fixture.phone.delivered_messages().len(), 1);

        fixture.bridge.poll_once().await;
        assert_eq!(fixture.phone.delivered_messages().len(), 1);

        tokio::time::advance(Duration::from_millis(20)).await;
        fixture.bridge.poll_once().await;
        tokio::time::advance(Duration::from_millis(20)).await;
        fixture.bridge.poll_once().await;

        let seqs: Vec<u8> = fixture
            .phone
            .delivered_messages()
            .iter()
            .map(Message::seq)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(fixture.bridge.stats().drained, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_failure_keeps_remainder() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        fixture.radio_receive(&Message::text(1, "ONE"));
        fixture.bridge.poll_once().await;
        fixture.radio_receive(&Message::text(2, "TWO"));
        fixture.bridge.poll_once().await;

        fixture.connect_phone();
        fixture.bridge.poll_once().await;
        fixture.phone.fail_next_sends(1);
        tokio::time::advance(Duration::from_secs(2)).await;
        fixture.bridge.poll_once().await;

        assert!(fixture.phone.delivered_messages().is_empty());
        let seqs: Vec<u8> = fixture.bridge.ring_buffer().iter().map(Message::seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_message_queued_behind_backlog() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        fixture.radio_receive(&Message::text(1, "OLD"));
        fixture.bridge.poll_once().await;

        fixture.connect_phone();
        fixture.bridge.poll_once().await;
        fixture.radio_receive(&Message::text(2, "NEW"));
        fixture.bridge.poll_once().await;

        assert!(fixture.phone.delivered_messages().is_empty());
        assert_eq!(fixture.bridge.ring_buffer().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_press_counts_as_activity() {
        let config = DeviceConfigBuilder::new()
            .inactivity_timeout(Duration::from_secs(30))
            .build();
        let mut fixture = TestFixture::started(config).await;

        tokio::time::advance(Duration::from_secs(20)).await;
        fixture
            .endpoints
            .link_events
            .button_pressed(0, Duration::from_millis(200));
        fixture.bridge.poll_once().await;
        assert_eq!(fixture.bridge.activity().idle(Instant::now()), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reports_stopped_bridge() {
        let fixture = TestFixture::started(quiet_config()).await;
        let handle = fixture.endpoints.handle.clone();
        drop(fixture);

        assert!(matches!(handle.stats().await, Err(BridgeError::ChannelClosed)));
        assert!(matches!(handle.shutdown().await, Err(BridgeError::ChannelClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands() {
        let mut fixture = TestFixture::started(quiet_config()).await;
        let handle = fixture.endpoints.handle.clone();
        let bridge = &mut fixture.bridge;

        let (stats, ()) = tokio::join!(handle.stats(), async {
            tokio::task::yield_now().await;
            bridge.handle_commands();
        });
        assert_eq!(stats.unwrap().suspends, 0);

        fixture.endpoints.handle.shutdown().await.unwrap();
        fixture.bridge.running = true;
        fixture.bridge.handle_commands();
        assert!(!fixture.bridge.running);
    }
}
