//! Handoff queues between interrupt/callback contexts and the main loop
//!
//! ```text
//!  radio IRQ ──on_packet()──► [RxPacket; rx_queue_size] ──poll()──┐
//!                                                                 ├─► router
//!  phone stack ─connected()/write_received()─► [LinkEvent; n] ────┘
//! ```
//!
//! Producers only ever call `try_send`. A full queue drops the newest item:
//! the interrupt side bumps an atomic counter (it must not log), the callback
//! side logs a warning. The router is the only consumer and never awaits a
//! receive.

use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::warn;

/// Largest payload the radio FIFO can hold
pub const RX_PACKET_MAX: usize = 255;

/// Fixed-size descriptor for one received radio packet
#[derive(Clone, Copy)]
pub struct RxPacket {
    data: [u8; RX_PACKET_MAX],
    len: u8,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Signal-to-noise ratio in dB
    pub snr: f32,
}

impl RxPacket {
    /// Copy `bytes` into a descriptor; `None` if it does not fit
    pub fn new(bytes: &[u8], rssi: i16, snr: f32) -> Option<Self> {
        if bytes.len() > RX_PACKET_MAX {
            return None;
        }
        let mut data = [0u8; RX_PACKET_MAX];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            data,
            len: bytes.len() as u8,
            rssi,
            snr,
        })
    }

    /// Received bytes
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Number of received bytes
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Check if the packet carried no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for RxPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RxPacket")
            .field("bytes", &self.bytes())
            .field("rssi", &self.rssi)
            .field("snr", &self.snr)
            .finish()
    }
}

/// Drop counters shared between the interrupt handle and the main loop
#[derive(Debug, Default)]
struct RxDrops {
    queue_full: AtomicU32,
    oversize: AtomicU32,
}

/// Interrupt-side producer for received radio packets
#[derive(Clone)]
pub struct RadioIrqHandle {
    tx: mpsc::Sender<RxPacket>,
    drops: Arc<RxDrops>,
}

impl RadioIrqHandle {
    /// Hand a received packet to the main loop
    ///
    /// Returns `false` if the packet was dropped because it was oversize or
    /// the queue was full. Never blocks and never logs. The descriptor is
    /// copied into the channel's slot storage; tokio grows that storage a
    /// block at a time and reuses freed blocks, so a queue that has cycled
    /// once stops allocating. A target that forbids any allocation here
    /// needs a preallocated ring in place of the mpsc channel.
    pub fn on_packet(&self, bytes: &[u8], rssi: i16, snr: f32) -> bool {
        let Some(packet) = RxPacket::new(bytes, rssi, snr) else {
            self.drops.oversize.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        match self.tx.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.drops.queue_full.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

/// Main-loop consumer for received radio packets
pub struct RadioRxQueue {
    rx: mpsc::Receiver<RxPacket>,
    drops: Arc<RxDrops>,
}

impl RadioRxQueue {
    /// Take the next packet without waiting
    pub fn poll(&mut self) -> Option<RxPacket> {
        match self.rx.try_recv() {
            Ok(packet) => Some(packet),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Packets dropped for a full queue since the last call
    pub fn take_queue_drops(&self) -> u32 {
        self.drops.queue_full.swap(0, Ordering::Relaxed)
    }

    /// Packets dropped for exceeding [`RX_PACKET_MAX`] since the last call
    pub fn take_oversize_drops(&self) -> u32 {
        self.drops.oversize.swap(0, Ordering::Relaxed)
    }
}

/// Create the radio receive queue
pub fn rx_queue(capacity: usize) -> (RadioIrqHandle, RadioRxQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let drops = Arc::new(RxDrops::default());
    (
        RadioIrqHandle {
            tx,
            drops: drops.clone(),
        },
        RadioRxQueue { rx, drops },
    )
}

/// Event raised by the phone link stack or the wake button
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Phone connected
    Connected,
    /// Phone disconnected
    Disconnected,
    /// Phone wrote one wire frame
    WriteReceived(Bytes),
    /// Button released after being held for `held`
    ButtonPressed {
        /// Button pin
        pin: u8,
        /// How long it was held
        held: Duration,
    },
}

/// Callback-side producer for phone and button events
#[derive(Clone)]
pub struct LinkEventSender {
    tx: mpsc::Sender<LinkEvent>,
}

impl LinkEventSender {
    /// Report a phone connection
    pub fn connected(&self) -> bool {
        self.push(LinkEvent::Connected)
    }

    /// Report a phone disconnection
    pub fn disconnected(&self) -> bool {
        self.push(LinkEvent::Disconnected)
    }

    /// Report a frame written by the phone
    pub fn write_received(&self, frame: &[u8]) -> bool {
        self.push(LinkEvent::WriteReceived(Bytes::copy_from_slice(frame)))
    }

    /// Report a button release
    pub fn button_pressed(&self, pin: u8, held: Duration) -> bool {
        self.push(LinkEvent::ButtonPressed { pin, held })
    }

    fn push(&self, event: LinkEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(?event, "Short-range event queue full, dropping newest");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Main-loop consumer for phone and button events
pub struct LinkEventQueue {
    rx: mpsc::Receiver<LinkEvent>,
}

impl LinkEventQueue {
    /// Take the next event without waiting
    pub fn poll(&mut self) -> Option<LinkEvent> {
        self.rx.try_recv().ok()
    }
}

/// Create the phone event queue
pub fn link_event_queue(capacity: usize) -> (LinkEventSender, LinkEventQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (LinkEventSender { tx }, LinkEventQueue { rx })
}
