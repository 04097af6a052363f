//! Sleep/power state machine
//!
//! ```text
//!            idle >= inactivity_timeout
//!            or long button press
//!   ┌────────┐ ─────────────────────────► ┌───────────┐
//!   │ Active │                            │ Suspended │
//!   └────────┘ ◄───────────────────────── └───────────┘
//!              radio interrupt / button
//! ```
//!
//! This module only makes the decisions. The router performs the
//! pre-suspend and post-wake work around [`crate::PowerControl::suspend`].

use std::time::Duration;
use tokio::time::Instant;

use crate::activity::ActivityClock;
use crate::config::{PowerConfig, SleepDepth};
use crate::interface::WakeSource;

/// Power state of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Main loop running
    Active,
    /// Whole system suspended until a wake source fires
    Suspended,
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::Active => write!(f, "active"),
            PowerState::Suspended => write!(f, "suspended"),
        }
    }
}

/// Why the device is going to sleep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// No activity for the inactivity timeout
    Inactivity,
    /// User held the wake button
    ManualDeepSleep,
}

/// How a button release is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    /// Counts as activity
    ShortPress,
    /// Forces a deep sleep
    LongPress,
}

/// Decides when to suspend and how deep
#[derive(Debug, Clone)]
pub struct SleepStateMachine {
    config: PowerConfig,
    state: PowerState,
    manual_request: bool,
}

impl SleepStateMachine {
    /// Create a state machine in the `Active` state
    pub fn new(config: PowerConfig) -> Self {
        Self {
            config,
            state: PowerState::Active,
            manual_request: false,
        }
    }

    /// Current state
    pub fn state(&self) -> PowerState {
        self.state
    }

    /// Power configuration in use
    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    /// Whether the inactivity timeout is enabled (non-zero)
    pub fn auto_sleep_enabled(&self) -> bool {
        !self.config.inactivity_timeout.is_zero()
    }

    /// Interpret a button held for `held`
    pub fn classify_press(&self, held: Duration) -> ButtonAction {
        if held >= self.config.long_press {
            ButtonAction::LongPress
        } else {
            ButtonAction::ShortPress
        }
    }

    /// Ask for a deep sleep at the next check
    pub fn request_manual_sleep(&mut self) {
        self.manual_request = true;
    }

    /// Whether the device will suspend within the imminent margin
    ///
    /// Inbound messages received now go to the persistent store rather than
    /// the ring buffer, which does not survive a suspend.
    pub fn is_imminent(&self, clock: &ActivityClock, now: Instant) -> bool {
        if self.manual_request {
            return true;
        }
        if !self.auto_sleep_enabled() {
            return false;
        }
        let threshold = self
            .config
            .inactivity_timeout
            .saturating_sub(self.config.imminent_margin);
        clock.idle(now) >= threshold
    }

    /// Decide whether to suspend now
    pub fn should_suspend(&self, clock: &ActivityClock, now: Instant) -> Option<SuspendReason> {
        if self.state != PowerState::Active {
            return None;
        }
        if self.manual_request {
            return Some(SuspendReason::ManualDeepSleep);
        }
        if self.auto_sleep_enabled() && clock.idle(now) >= self.config.inactivity_timeout {
            return Some(SuspendReason::Inactivity);
        }
        None
    }

    /// Depth to use for a suspend
    pub fn depth_for(&self, reason: SuspendReason) -> SleepDepth {
        match reason {
            SuspendReason::Inactivity => self.config.depth,
            SuspendReason::ManualDeepSleep => SleepDepth::Deep,
        }
    }

    /// Wake sources to arm: the radio interrupt plus any configured buttons
    pub fn wake_sources(&self) -> Vec<WakeSource> {
        let mut sources = vec![WakeSource::RadioInterrupt];
        sources.extend(self.config.wake_buttons.iter().map(|&pin| WakeSource::Button(pin)));
        sources
    }

    /// Record the transition to `Suspended`
    pub fn enter_suspended(&mut self) {
        self.state = PowerState::Suspended;
        self.manual_request = false;
    }

    /// Record the transition back to `Active`
    pub fn wake(&mut self) {
        self.state = PowerState::Active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(timeout_secs: u64) -> SleepStateMachine {
        SleepStateMachine::new(PowerConfig {
            inactivity_timeout: Duration::from_secs(timeout_secs),
            ..PowerConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspends_after_timeout() {
        let sleep = machine(30);
        let start = Instant::now();
        let clock = ActivityClock::new(start);

        assert_eq!(sleep.should_suspend(&clock, start + Duration::from_secs(29)), None);
        assert_eq!(
            sleep.should_suspend(&clock, start + Duration::from_secs(30)),
            Some(SuspendReason::Inactivity)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_imminent_window() {
        let sleep = machine(30);
        let start = Instant::now();
        let clock = ActivityClock::new(start);

        assert!(!sleep.is_imminent(&clock, start + Duration::from_millis(28_999)));
        assert!(sleep.is_imminent(&clock, start + Duration::from_secs(29)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_disables_auto_sleep() {
        let sleep = machine(0);
        let start = Instant::now();
        let clock = ActivityClock::new(start);
        let later = start + Duration::from_secs(3600);
        assert_eq!(sleep.should_suspend(&clock, later), None);
        assert!(!sleep.is_imminent(&clock, later));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_sleep_is_deep() {
        let mut sleep = machine(120);
        let now = Instant::now();
        let clock = ActivityClock::new(now);

        assert_eq!(sleep.classify_press(Duration::from_millis(300)), ButtonAction::ShortPress);
        assert_eq!(sleep.classify_press(Duration::from_secs(2)), ButtonAction::LongPress);

        sleep.request_manual_sleep();
        assert!(sleep.is_imminent(&clock, now));
        let reason = sleep.should_suspend(&clock, now).unwrap();
        assert_eq!(reason, SuspendReason::ManualDeepSleep);
        assert_eq!(sleep.depth_for(reason), SleepDepth::Deep);
        assert_eq!(sleep.depth_for(SuspendReason::Inactivity), SleepDepth::Light);

        sleep.enter_suspended();
        assert_eq!(sleep.state(), PowerState::Suspended);
        assert_eq!(sleep.should_suspend(&clock, now), None);

        sleep.wake();
        assert_eq!(sleep.state(), PowerState::Active);
        assert_eq!(sleep.should_suspend(&clock, now), None);
    }

    #[test]
    fn test_wake_sources() {
        let sleep = SleepStateMachine::new(PowerConfig {
            wake_buttons: vec![0, 14],
            ..PowerConfig::default()
        });
        assert_eq!(
            sleep.wake_sources(),
            vec![
                WakeSource::RadioInterrupt,
                WakeSource::Button(0),
                WakeSource::Button(14)
            ]
        );
    }
}
