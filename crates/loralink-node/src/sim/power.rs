//! Simulated suspend/resume

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use loralink_bridge::{PowerControl, SleepDepth, WakeCause, WakeSource};

/// Suspends until the radio hears a frame or the wake button is pressed
#[derive(Debug, Clone)]
pub struct SimPower {
    name: String,
    radio_wake: Arc<Notify>,
    button: Arc<Notify>,
    button_pin: Option<u8>,
}

impl SimPower {
    /// Create a power control woken by `radio_wake`
    pub fn new(name: impl Into<String>, radio_wake: Arc<Notify>) -> Self {
        Self {
            name: name.into(),
            radio_wake,
            button: Arc::new(Notify::new()),
            button_pin: None,
        }
    }

    /// Press the wake button
    ///
    /// A press while the device is awake is remembered and ends the next
    /// suspend immediately.
    pub fn press_button(&self) {
        self.button.notify_one();
    }
}

#[async_trait]
impl PowerControl for SimPower {
    fn configure_wake_sources(&mut self, sources: &[WakeSource]) {
        self.button_pin = sources.iter().find_map(|source| match source {
            WakeSource::Button(pin) => Some(*pin),
            WakeSource::RadioInterrupt => None,
        });
    }

    fn power_down_peripherals(&mut self, depth: SleepDepth) {
        debug!(device = %self.name, %depth, "Peripherals off");
    }

    async fn suspend(&mut self, _depth: SleepDepth) -> WakeCause {
        let pin = self.button_pin.unwrap_or(0);
        tokio::select! {
            _ = self.radio_wake.notified() => WakeCause::RadioInterrupt,
            _ = self.button.notified() => WakeCause::Button(pin),
        }
    }

    fn power_up_peripherals(&mut self, depth: SleepDepth) {
        debug!(device = %self.name, %depth, "Peripherals on");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_button_press_before_suspend_wakes() {
        let mut power = SimPower::new("test", Arc::new(Notify::new()));
        power.configure_wake_sources(&[WakeSource::RadioInterrupt, WakeSource::Button(4)]);
        power.press_button();
        assert_eq!(power.suspend(SleepDepth::Light).await, WakeCause::Button(4));
    }

    #[tokio::test]
    async fn test_radio_wake() {
        let radio_wake = Arc::new(Notify::new());
        let mut power = SimPower::new("test", radio_wake.clone());

        let waker = tokio::spawn(async move {
            tokio::task::yield_now().await;
            radio_wake.notify_waiters();
        });
        assert_eq!(power.suspend(SleepDepth::Deep).await, WakeCause::RadioInterrupt);
        waker.await.unwrap();
    }
}
