//! Shared half-duplex radio medium

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, trace};

use loralink_bridge::{LinkError, LongRangeLink, RadioConfig, RadioIrqHandle, SignalQuality};

/// Counters for everything put on the air
#[derive(Debug, Clone, Copy, Default)]
pub struct AirStats {
    /// Frames transmitted by any station
    pub transmitted: u64,
    /// Frame copies handed to a receiving station
    pub delivered: u64,
    /// Frame copies lost to simulated fading
    pub lost: u64,
    /// Frame copies missed because the receiver was not listening
    pub missed: u64,
}

struct Station {
    listening: Arc<AtomicBool>,
    last_signal: Arc<Mutex<SignalQuality>>,
    irq: Option<RadioIrqHandle>,
    wake: Arc<Notify>,
}

/// In-memory channel joining the simulated radios
///
/// A frame sent by one station reaches every other station that is in
/// receive mode, unless it is lost with probability `loss`.
pub struct SimAir {
    loss: f64,
    stations: Mutex<Vec<Station>>,
    stats: Mutex<AirStats>,
}

impl SimAir {
    /// Create a medium dropping each frame copy with probability `loss`
    pub fn new(loss: f64) -> Arc<Self> {
        Arc::new(Self {
            loss: loss.clamp(0.0, 1.0),
            stations: Mutex::new(Vec::new()),
            stats: Mutex::new(AirStats::default()),
        })
    }

    /// Add a station; `wake` is notified whenever a frame reaches it
    pub fn join(self: &Arc<Self>, wake: Arc<Notify>) -> SimRadio {
        let listening = Arc::new(AtomicBool::new(false));
        let last_signal = Arc::new(Mutex::new(SignalQuality::default()));
        let mut stations = self.stations.lock();
        stations.push(Station {
            listening: listening.clone(),
            last_signal: last_signal.clone(),
            irq: None,
            wake,
        });
        SimRadio {
            id: stations.len() - 1,
            air: self.clone(),
            listening,
            config: RadioConfig::default(),
            last_signal,
        }
    }

    /// Connect a station to its bridge's receive interrupt
    pub fn attach(&self, id: usize, irq: RadioIrqHandle) {
        if let Some(station) = self.stations.lock().get_mut(id) {
            station.irq = Some(irq);
        }
    }

    /// Medium counters
    pub fn stats(&self) -> AirStats {
        *self.stats.lock()
    }

    fn transmit(&self, from: usize, frame: &[u8]) {
        let mut rng = rand::thread_rng();
        let rssi: i16 = rng.gen_range(-118..=-70);
        let snr: f32 = rng.gen_range(-6.0..10.0);

        let stations = self.stations.lock();
        let mut stats = self.stats.lock();
        stats.transmitted += 1;

        for (id, station) in stations.iter().enumerate() {
            if id == from {
                continue;
            }
            let Some(irq) = &station.irq else {
                continue;
            };
            if !station.listening.load(Ordering::Acquire) {
                trace!(from, to = id, "Receiver not listening");
                stats.missed += 1;
                continue;
            }
            if rng.gen_bool(self.loss) {
                debug!(from, to = id, len = frame.len(), "Frame lost on air");
                stats.lost += 1;
                continue;
            }
            *station.last_signal.lock() = SignalQuality { rssi, snr };
            if irq.on_packet(frame, rssi, snr) {
                stats.delivered += 1;
            }
            station.wake.notify_waiters();
        }
    }
}

/// One station's radio on the shared medium
pub struct SimRadio {
    id: usize,
    air: Arc<SimAir>,
    listening: Arc<AtomicBool>,
    config: RadioConfig,
    last_signal: Arc<Mutex<SignalQuality>>,
}

impl SimRadio {
    /// Station index on the medium
    pub fn id(&self) -> usize {
        self.id
    }
}

#[async_trait]
impl LongRangeLink for SimRadio {
    async fn start_receive(&mut self) -> Result<(), LinkError> {
        self.listening.store(true, Ordering::Release);
        Ok(())
    }

    async fn send_packet(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        self.listening.store(false, Ordering::Release);
        tokio::time::sleep(self.config.time_on_air(frame.len())).await;
        self.air.transmit(self.id, frame);
        Ok(())
    }

    async fn reinitialize(&mut self, config: &RadioConfig) -> Result<(), LinkError> {
        self.listening.store(false, Ordering::Release);
        self.config = config.clone();
        debug!(
            station = self.id,
            frequency_hz = config.frequency_hz,
            spreading_factor = config.spreading_factor,
            "Radio configured"
        );
        Ok(())
    }

    fn signal_quality(&self) -> SignalQuality {
        *self.last_signal.lock()
    }

    fn name(&self) -> &str {
        "SimRadio"
    }
}
