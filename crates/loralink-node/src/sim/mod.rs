//! Two-device field simulation
//!
//! Each device is a full bridge with a simulated phone, radio and power
//! control. The radios share one [`SimAir`] medium.

pub mod air;
pub mod phone;
pub mod power;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use loralink_bridge::{Bridge, BridgeHandle, BridgeStats, DeviceConfig, RetainedRegion};
use loralink_core::Message;

pub use air::{AirStats, SimAir, SimRadio};
pub use phone::{PhoneDriver, SimPhone};
pub use power::SimPower;

/// Attempts to get final statistics out of a device that may be asleep
const STATS_ATTEMPTS: usize = 5;

/// A running bridge and the handles to poke at it
pub struct SimDevice {
    /// Device name used in logs
    pub name: String,
    /// Command handle of the running bridge
    pub handle: BridgeHandle,
    /// The user and phone paired with this device
    pub phone: PhoneDriver,
    /// Wake button
    pub power: SimPower,
    task: JoinHandle<loralink_bridge::Result<()>>,
}

impl SimDevice {
    /// Build a device on `air` and start its bridge
    pub fn spawn(name: &str, config: DeviceConfig, air: &Arc<SimAir>) -> Self {
        let radio_wake = Arc::new(Notify::new());
        let radio = air.join(radio_wake.clone());
        let station = radio.id();
        let phone = SimPhone::new(format!("{}-phone", name));
        let power = SimPower::new(name, radio_wake);

        let (bridge, endpoints) = Bridge::new(
            config,
            phone.clone(),
            radio,
            power.clone(),
            RetainedRegion::new(),
        );
        air.attach(station, endpoints.radio_irq);

        let device_name = name.to_string();
        let task = tokio::spawn(async move {
            let result = bridge.run().await;
            if let Err(e) = &result {
                error!(device = %device_name, "Bridge stopped with error: {}", e);
            }
            result
        });

        Self {
            name: name.to_string(),
            handle: endpoints.handle,
            phone: PhoneDriver::new(phone, endpoints.link_events),
            power,
            task,
        }
    }

    /// Wake the device if needed and fetch its statistics
    pub async fn stats(&self) -> anyhow::Result<BridgeStats> {
        for _ in 0..STATS_ATTEMPTS {
            self.power.press_button();
            match tokio::time::timeout(Duration::from_millis(500), self.handle.stats()).await {
                Ok(stats) => return Ok(stats?),
                Err(_) => warn!(device = %self.name, "Device slow to answer, pressing again"),
            }
        }
        anyhow::bail!("{} did not answer a stats request", self.name)
    }

    /// Stop the bridge and wait for it to exit
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.power.press_button();
        self.handle.shutdown().await?;
        self.task.await??;
        Ok(())
    }
}

/// Parameters of a simulation run
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Configuration for both devices
    pub config: DeviceConfig,
    /// Texts the first phone sends
    pub messages: usize,
    /// Probability of losing each frame on air
    pub loss: f64,
    /// Total run time
    pub duration: Duration,
}

/// What happened during a run
#[derive(Debug)]
pub struct Report {
    /// Texts written by the sending phone
    pub sent: Vec<Message>,
    /// Messages that reached the receiving phone
    pub received: Vec<Message>,
    /// Messages that reached the sending phone
    pub replies: Vec<Message>,
    /// Statistics of the sending device
    pub sender: BridgeStats,
    /// Statistics of the receiving device
    pub receiver: BridgeStats,
    /// Medium counters
    pub air: AirStats,
}

/// Run the field scenario
///
/// Device `alpha` has its phone attached and sends `messages` texts spread
/// over the first half of the run. Device `bravo` has no phone until the
/// halfway mark, so it buffers (and may sleep) until its phone connects and
/// the backlog drains. At the same moment alpha's phone walks out of range.
/// Bravo's phone then replies once, and alpha holds the reply until its
/// phone comes back.
pub async fn run(scenario: Scenario) -> anyhow::Result<Report> {
    let air = SimAir::new(scenario.loss);
    let mut alpha = SimDevice::spawn("alpha", scenario.config.clone(), &air);
    let mut bravo = SimDevice::spawn("bravo", scenario.config.clone(), &air);

    let half = scenario.duration / 2;
    let gap = half / (scenario.messages.max(1) as u32 + 1);

    alpha.phone.connect();
    let mut sent = Vec::with_capacity(scenario.messages);
    for n in 1..=scenario.messages {
        tokio::time::sleep(gap).await;
        if let Some(message) = alpha.phone.write_text(&format!("MSG {}", n)) {
            sent.push(message);
        }
    }

    tokio::time::sleep(gap).await;
    info!("Alpha phone leaving range, bravo phone coming into range");
    alpha.phone.disconnect();
    bravo.phone.connect();

    let settle = scenario.config.bridge.reconnect_settle;
    let drain = scenario.config.bridge.drain_pacing * 10;
    tokio::time::sleep(settle + drain).await;
    bravo.phone.write_text("COPY ALL");

    tokio::time::sleep(settle + drain).await;
    info!("Alpha phone back in range");
    alpha.phone.connect();

    let elapsed = gap * (scenario.messages as u32 + 1) + (settle + drain) * 2;
    tokio::time::sleep(scenario.duration.saturating_sub(elapsed)).await;

    let sender = alpha.stats().await?;
    let receiver = bravo.stats().await?;
    let received = bravo.phone.phone().inbox();
    let replies = alpha.phone.phone().inbox();

    alpha.shutdown().await?;
    bravo.shutdown().await?;

    Ok(Report {
        sent,
        received,
        replies,
        sender,
        receiver,
        air: air.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use loralink_bridge::DeviceConfigBuilder;

    #[tokio::test(start_paused = true)]
    async fn test_lossless_run_delivers_everything() {
        let config = DeviceConfigBuilder::new()
            .inactivity_timeout(Duration::from_secs(5))
            .wake_button(0)
            .build();
        let report = run(Scenario {
            config,
            messages: 3,
            loss: 0.0,
            duration: Duration::from_secs(20),
        })
        .await
        .unwrap();

        assert_eq!(report.sent.len(), 3);
        let texts: Vec<String> = report
            .received
            .iter()
            .filter(|m| m.requires_ack())
            .map(ToString::to_string)
            .collect();
        assert_eq!(texts, vec!["TXT #1: MSG 1", "TXT #2: MSG 2", "TXT #3: MSG 3"]);

        // Acks are passed through to the phone like any other message
        let replies: Vec<&Message> = report.replies.iter().filter(|m| m.requires_ack()).collect();
        assert_eq!(replies, vec![&Message::text(1, "COPY ALL")]);
        // The reply arrived while alpha's phone was away and was drained later
        assert_eq!(report.sender.drained, 1);
        assert_eq!(report.sender.phone_to_radio, 3);
        assert_eq!(report.sender.acks_matched, 3);
        assert_eq!(report.air.lost, 0);
    }
}
