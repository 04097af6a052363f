//! Simulated phone on the short-range link

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use loralink_bridge::reliability::SequenceCounter;
use loralink_bridge::{LinkError, LinkEventSender, ShortRangeLink};
use loralink_core::{codec, Message};

#[derive(Debug, Default)]
struct PhoneState {
    connected: bool,
    inbox: Vec<Message>,
    written: u64,
}

/// Phone side of the short-range link as seen by the bridge
#[derive(Debug, Clone)]
pub struct SimPhone {
    name: String,
    state: Arc<Mutex<PhoneState>>,
}

impl SimPhone {
    /// Create a disconnected phone
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(PhoneState::default())),
        }
    }

    /// Messages the bridge delivered, in order
    pub fn inbox(&self) -> Vec<Message> {
        self.state.lock().inbox.clone()
    }

    /// Frames written toward the bridge
    pub fn written(&self) -> u64 {
        self.state.lock().written
    }
}

#[async_trait]
impl ShortRangeLink for SimPhone {
    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let message = codec::decode(frame).map_err(|e| LinkError::WriteError(e.to_string()))?;
        let mut state = self.state.lock();
        if !state.connected {
            return Err(LinkError::NotConnected);
        }
        info!(phone = %self.name, %message, "Phone notified");
        state.inbox.push(message);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// The user holding a [`SimPhone`]: connects, disconnects and types
pub struct PhoneDriver {
    phone: SimPhone,
    events: LinkEventSender,
    seq: SequenceCounter,
}

impl PhoneDriver {
    /// Drive `phone` through the bridge's link callbacks
    pub fn new(phone: SimPhone, events: LinkEventSender) -> Self {
        Self {
            phone,
            events,
            seq: SequenceCounter::starting_at(1),
        }
    }

    /// The phone being driven
    pub fn phone(&self) -> &SimPhone {
        &self.phone
    }

    /// Pair with the bridge
    pub fn connect(&self) {
        self.phone.state.lock().connected = true;
        self.events.connected();
        info!(phone = %self.phone.name, "Phone connected");
    }

    /// Walk out of range
    pub fn disconnect(&self) {
        self.phone.state.lock().connected = false;
        self.events.disconnected();
        info!(phone = %self.phone.name, "Phone disconnected");
    }

    /// Type and send a text, returning the message written
    pub fn write_text(&mut self, body: &str) -> Option<Message> {
        let message = Message::text(self.seq.next_seq(), body);
        let frame = match codec::encode_to_vec(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(phone = %self.phone.name, "Cannot send {:?}: {}", body, e);
                return None;
            }
        };
        if !self.events.write_received(&frame) {
            return None;
        }
        self.phone.state.lock().written += 1;
        info!(phone = %self.phone.name, %message, "Phone wrote");
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loralink_bridge::queue::{link_event_queue, LinkEvent};

    #[tokio::test]
    async fn test_send_requires_connection() {
        let mut phone = SimPhone::new("test");
        let frame = codec::encode_to_vec(&Message::ack(3)).unwrap();
        assert!(matches!(phone.send(&frame).await, Err(LinkError::NotConnected)));

        let (events, _queue) = link_event_queue(4);
        let driver = PhoneDriver::new(phone.clone(), events);
        driver.connect();
        phone.send(&frame).await.unwrap();
        assert_eq!(phone.inbox(), vec![Message::ack(3)]);
    }

    #[test]
    fn test_driver_writes_frames() {
        let (events, mut queue) = link_event_queue(4);
        let mut driver = PhoneDriver::new(SimPhone::new("test"), events);
        driver.connect();
        let sent = driver.write_text("hi").unwrap();

        assert!(matches!(queue.poll(), Some(LinkEvent::Connected)));
        match queue.poll() {
            Some(LinkEvent::WriteReceived(frame)) => {
                assert_eq!(codec::decode(&frame).unwrap(), sent)
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(driver.phone().written(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_stops_delivery() {
        let (events, mut queue) = link_event_queue(4);
        let mut phone = SimPhone::new("test");
        let driver = PhoneDriver::new(phone.clone(), events);
        driver.connect();
        driver.disconnect();

        assert!(matches!(queue.poll(), Some(LinkEvent::Connected)));
        assert!(matches!(queue.poll(), Some(LinkEvent::Disconnected)));
        assert!(!phone.is_connected());

        let frame = codec::encode_to_vec(&Message::text(2, "ANYONE")).unwrap();
        assert!(matches!(phone.send(&frame).await, Err(LinkError::NotConnected)));
        assert!(phone.inbox().is_empty());
    }
}
