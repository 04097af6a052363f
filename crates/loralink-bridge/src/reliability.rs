//! Single-hop reliability
//!
//! Every text received over the radio is answered with exactly one ack, sent
//! after a guard delay so the remote radio has time to switch from transmit
//! back to receive. Acks are never acknowledged or retried. Outbound data
//! frames get one local retry; after that they are dropped at this hop.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::LinkError;
use crate::interface::LongRangeLink;

/// Transmit attempts for a data frame (first try plus one retry)
pub const DATA_TX_ATTEMPTS: u8 = 2;

/// Wrapping sequence numbers for frames the bridge originates itself
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    next: u8,
}

impl SequenceCounter {
    /// Start counting at `first`
    pub fn starting_at(first: u8) -> Self {
        Self { next: first }
    }

    /// Take the next sequence number
    pub fn next_seq(&mut self) -> u8 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }
}

/// An ack waiting for its guard delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAck {
    /// Sequence number being acknowledged
    pub seq: u8,
    /// Earliest time the ack may be sent
    pub due: Instant,
}

/// Queue of acks waiting for their guard delay
///
/// The guard delay is constant, so entries become due in the order they
/// were scheduled.
#[derive(Debug, Clone)]
pub struct AckScheduler {
    guard: Duration,
    pending: VecDeque<PendingAck>,
}

impl AckScheduler {
    /// Create a scheduler with the given guard delay
    pub fn new(guard: Duration) -> Self {
        Self {
            guard,
            pending: VecDeque::new(),
        }
    }

    /// Schedule one ack for `seq`, received at `now`
    pub fn schedule(&mut self, seq: u8, now: Instant) -> Instant {
        let due = now + self.guard;
        self.pending.push_back(PendingAck { seq, due });
        debug!(seq, delay_ms = self.guard.as_millis() as u64, "Scheduled ack");
        due
    }

    /// Pop the oldest ack if its guard delay has elapsed
    pub fn due_ack(&mut self, now: Instant) -> Option<u8> {
        match self.pending.front() {
            Some(ack) if ack.due <= now => self.pending.pop_front().map(|ack| ack.seq),
            _ => None,
        }
    }

    /// Time the next pending ack becomes due
    pub fn next_due(&self) -> Option<Instant> {
        self.pending.front().map(|ack| ack.due)
    }

    /// Drop every pending ack, returning the sequence numbers dropped
    pub fn cancel_all(&mut self) -> Vec<u8> {
        self.pending.drain(..).map(|ack| ack.seq).collect()
    }

    /// Number of pending acks
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if no ack is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Outcome of matching an inbound ack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMatch {
    /// Ack matched a frame sent `latency` ago
    Matched {
        /// Time between transmission and ack receipt
        latency: Duration,
    },
    /// No outstanding frame with that sequence number
    Unmatched,
}

/// Diagnostic record of transmitted texts awaiting their ack
///
/// Nothing is re-sent; entries that outlive the window count as missed.
#[derive(Debug, Clone)]
pub struct AckTracker {
    window: Duration,
    outstanding: VecDeque<(u8, Instant)>,
    limit: usize,
}

impl AckTracker {
    /// Create a tracker with the given match window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            outstanding: VecDeque::new(),
            limit: 32,
        }
    }

    /// Record a text transmitted at `now`
    ///
    /// Returns the number of entries pushed out by the size limit, which
    /// count as missed.
    pub fn record_sent(&mut self, seq: u8, now: Instant) -> usize {
        let mut evicted = 0;
        while self.outstanding.len() >= self.limit {
            self.outstanding.pop_front();
            evicted += 1;
        }
        self.outstanding.push_back((seq, now));
        evicted
    }

    /// Match an inbound ack received at `now`
    pub fn on_ack(&mut self, seq: u8, now: Instant) -> AckMatch {
        let position = self
            .outstanding
            .iter()
            .position(|&(sent_seq, sent_at)| sent_seq == seq && now.duration_since(sent_at) <= self.window);

        match position.and_then(|index| self.outstanding.remove(index)) {
            Some((_, sent_at)) => AckMatch::Matched {
                latency: now.duration_since(sent_at),
            },
            None => AckMatch::Unmatched,
        }
    }

    /// Drop entries older than the window, returning how many were dropped
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.outstanding.len();
        self.outstanding
            .retain(|&(_, sent_at)| now.duration_since(sent_at) <= self.window);
        before - self.outstanding.len()
    }

    /// Number of texts still waiting for an ack
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}

/// Return the radio to receive mode and let it settle
pub async fn restore_receive<L: LongRangeLink + ?Sized>(radio: &mut L, settle: Duration) {
    if let Err(e) = radio.start_receive().await {
        warn!(radio = radio.name(), "Failed to restart receive mode: {}", e);
    }
    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }
}

/// Transmit a data frame with one retry
///
/// The radio is put back into receive mode afterwards whatever the outcome.
/// Returns the number of attempts used on success.
pub async fn transmit_with_retry<L: LongRangeLink + ?Sized>(
    radio: &mut L,
    frame: &[u8],
    settle: Duration,
) -> Result<u8, LinkError> {
    let mut result = Err(LinkError::TransmitFailed {
        attempts: DATA_TX_ATTEMPTS,
    });

    for attempt in 1..=DATA_TX_ATTEMPTS {
        match radio.send_packet(frame).await {
            Ok(()) => {
                result = Ok(attempt);
                break;
            }
            Err(e) if attempt < DATA_TX_ATTEMPTS => {
                warn!(attempt, len = frame.len(), "Transmit failed, retrying: {}", e);
            }
            Err(e) => {
                warn!(attempt, len = frame.len(), "Transmit failed, giving up: {}", e);
            }
        }
    }

    restore_receive(radio, settle).await;
    result
}

/// Transmit a frame exactly once
///
/// Used for acks, which are never retried. The radio is put back into
/// receive mode afterwards.
pub async fn transmit_once<L: LongRangeLink + ?Sized>(
    radio: &mut L,
    frame: &[u8],
    settle: Duration,
) -> Result<(), LinkError> {
    let result = radio
        .send_packet(frame)
        .await
        .map_err(|_| LinkError::TransmitFailed { attempts: 1 });
    restore_receive(radio, settle).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockLongRangeLink;

    #[test]
    fn test_sequence_counter_wraps() {
        let mut seq = SequenceCounter::starting_at(254);
        assert_eq!(seq.next_seq(), 254);
        assert_eq!(seq.next_seq(), 255);
        assert_eq!(seq.next_seq(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_waits_for_guard() {
        let mut acks = AckScheduler::new(Duration::from_millis(500));
        let start = Instant::now();
        acks.schedule(7, start);

        assert_eq!(acks.due_ack(start), None);
        assert_eq!(acks.due_ack(start + Duration::from_millis(499)), None);
        assert_eq!(acks.due_ack(start + Duration::from_millis(500)), Some(7));
        assert!(acks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_acks_one_per_call() {
        let mut acks = AckScheduler::new(Duration::from_millis(500));
        let start = Instant::now();
        acks.schedule(1, start);
        acks.schedule(2, start + Duration::from_millis(10));
        assert_eq!(acks.len(), 2);

        let later = start + Duration::from_secs(1);
        assert_eq!(acks.due_ack(later), Some(1));
        assert_eq!(acks.due_ack(later), Some(2));
        assert_eq!(acks.due_ack(later), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let mut acks = AckScheduler::new(Duration::from_millis(500));
        let now = Instant::now();
        acks.schedule(3, now);
        acks.schedule(4, now);
        assert_eq!(acks.next_due(), Some(now + Duration::from_millis(500)));
        assert_eq!(acks.cancel_all(), vec![3, 4]);
        assert!(acks.next_due().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_tracker_matches_within_window() {
        let mut tracker = AckTracker::new(Duration::from_secs(10));
        let sent = Instant::now();
        tracker.record_sent(9, sent);

        assert_eq!(tracker.on_ack(8, sent), AckMatch::Unmatched);
        assert_eq!(
            tracker.on_ack(9, sent + Duration::from_millis(1200)),
            AckMatch::Matched {
                latency: Duration::from_millis(1200)
            }
        );
        assert_eq!(tracker.outstanding(), 0);
        assert_eq!(tracker.on_ack(9, sent), AckMatch::Unmatched);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_tracker_expires() {
        let mut tracker = AckTracker::new(Duration::from_secs(10));
        let sent = Instant::now();
        tracker.record_sent(1, sent);
        tracker.record_sent(2, sent + Duration::from_secs(5));

        let late = sent + Duration::from_secs(11);
        assert_eq!(tracker.on_ack(1, late), AckMatch::Unmatched);
        assert_eq!(tracker.expire(late), 1);
        assert_eq!(tracker.outstanding(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_succeeds_first_try() {
        let mut radio = MockLongRangeLink::new();
        let attempts = transmit_with_retry(&mut radio, &[0x02, 0x01], Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(radio.state().sent.len(), 1);
        assert_eq!(radio.state().receive_starts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_retries_once() {
        let mut radio = MockLongRangeLink::new();
        radio.fail_next_sends(1);
        let attempts = transmit_with_retry(&mut radio, &[0x02, 0x01], Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(attempts, 2);
        assert_eq!(radio.state().sent.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_gives_up_after_retry() {
        let mut radio = MockLongRangeLink::new();
        radio.fail_next_sends(5);
        let err = transmit_with_retry(&mut radio, &[0x02, 0x01], Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, LinkError::TransmitFailed { attempts: 2 });
        assert_eq!(radio.state().send_attempts, 2);
        assert!(radio.state().sent.is_empty());
        assert_eq!(radio.state().receive_starts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_once_does_not_retry() {
        let mut radio = MockLongRangeLink::new();
        radio.fail_next_sends(1);
        assert!(transmit_once(&mut radio, &[0x02, 0x01], Duration::ZERO)
            .await
            .is_err());
        assert_eq!(radio.state().send_attempts, 1);
        assert_eq!(radio.state().receive_starts, 1);
    }
}
