//! LoraLink Node - host simulation of two bridge devices
//!
//! This binary runs two complete bridges against simulated hardware:
//! - A shared half-duplex radio medium with configurable packet loss
//! - A simulated phone per device driving the short-range link
//! - Simulated suspend/resume woken by the radio or the wake button

mod sim;

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use loralink_bridge::{BridgeStats, DeviceConfig};

use sim::Scenario;

#[derive(Parser)]
#[command(name = "loralink-node")]
#[command(about = "Simulate two LoRa/BLE bridge devices talking over the air")]
struct Args {
    /// JSON device configuration applied to both devices
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Number of texts the first phone sends
    #[arg(long, short, default_value_t = 5)]
    messages: usize,

    /// Probability of losing each frame on air (0.0 to 1.0)
    #[arg(long, default_value_t = 0.0, value_parser = parse_loss)]
    loss: f64,

    /// Inactivity timeout before a device sleeps ("0s" disables sleep)
    #[arg(long, value_parser = humantime::parse_duration)]
    inactivity: Option<Duration>,

    /// Total simulated run time
    #[arg(long, short, default_value = "30s", value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

fn parse_loss(raw: &str) -> Result<f64, String> {
    let loss: f64 = raw.parse().map_err(|e| format!("{}", e))?;
    if (0.0..=1.0).contains(&loss) {
        Ok(loss)
    } else {
        Err(format!("loss must be between 0 and 1, got {}", loss))
    }
}

fn load_config(args: &Args) -> anyhow::Result<DeviceConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            let config: DeviceConfig = serde_json::from_str(&raw)?;
            info!("Loaded configuration from {}", path.display());
            config
        }
        None => DeviceConfig::default(),
    };

    if let Some(timeout) = args.inactivity {
        config.power.inactivity_timeout = timeout;
    }
    if config.power.wake_buttons.is_empty() {
        config.power.wake_buttons.push(0);
    }
    config.radio = config.radio.validated();
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    info!(
        messages = args.messages,
        loss = args.loss,
        inactivity = %humantime::format_duration(config.power.inactivity_timeout),
        duration = %humantime::format_duration(args.duration),
        "Starting LoraLink simulation"
    );

    let report = sim::run(Scenario {
        config,
        messages: args.messages,
        loss: args.loss,
        duration: args.duration,
    })
    .await?;

    let delivered = report
        .received
        .iter()
        .filter(|m| report.sent.contains(*m))
        .count();

    info!("═══════════════════════════════════════════════════════════");
    info!("  Texts sent by alpha phone:      {}", report.sent.len());
    info!("  Texts delivered to bravo phone: {}", delivered);
    info!("  Messages seen by alpha phone:   {}", report.replies.len());
    info!(
        "  Air: {} transmitted, {} delivered, {} lost, {} missed",
        report.air.transmitted, report.air.delivered, report.air.lost, report.air.missed
    );
    info!("═══════════════════════════════════════════════════════════");
    log_stats("alpha", &report.sender);
    log_stats("bravo", &report.receiver);

    Ok(())
}

fn log_stats(device: &str, stats: &BridgeStats) {
    info!(
        device,
        phone_to_radio = stats.phone_to_radio,
        radio_to_phone = stats.radio_to_phone,
        drained = stats.drained,
        buffered_volatile = stats.buffered_volatile,
        buffered_persistent = stats.buffered_persistent,
        dropped = stats.ring_evictions + stats.store_full_drops + stats.rx_queue_drops,
        "Traffic"
    );
    info!(
        device,
        sent = stats.acks_sent,
        failed = stats.acks_failed,
        cancelled = stats.acks_cancelled,
        matched = stats.acks_matched,
        missed = stats.acks_missed,
        retries = stats.transmit_retries,
        transmit_failures = stats.transmit_failures,
        "Acks"
    );
    info!(
        device,
        suspends = stats.suspends,
        wakes = stats.wakes,
        store_resets = stats.store_resets,
        last_rssi = ?stats.last_rssi,
        last_snr = ?stats.last_snr,
        link_quality = ?stats.link_quality,
        "Power"
    );
}
