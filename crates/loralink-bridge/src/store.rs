//! Store-and-forward buffers
//!
//! Two FIFO stores hold inbound radio messages while the phone cannot take
//! them:
//!
//! - [`RingBuffer`] lives in ordinary memory and covers short disconnections.
//!   When full it evicts the oldest message.
//! - [`PersistentStore`] is backed by [`RetainedMemory`], which survives a
//!   suspend but not a power loss. When full it refuses new messages.
//!
//! # Retained image layout
//!
//! ```text
//! ┌─────────────┬───────┬──────────────────────────────┬────────────┬──────────────────┐
//! │ magic u32LE │ count │ 10 × slot [len u8][frame 51] │ wakes u32LE│ last_activity u32│
//! └─────────────┴───────┴──────────────────────────────┴────────────┴──────────────────┘
//! ```
//!
//! An image is valid when the magic matches, `count <= 10` and every used
//! slot decodes as a wire frame.

use std::collections::VecDeque;
use std::sync::Arc;

use loralink_core::{codec, Message, MAX_FRAME_LEN};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::STORE_CAPACITY;
use crate::error::{BufferError, StateError};

/// Marks a retained image as initialized
pub const RETAINED_MAGIC: u32 = 0xDEAD_BEEF;

/// Bytes per message slot in the retained image
pub const SLOT_LEN: usize = 1 + MAX_FRAME_LEN;

const COUNT_OFFSET: usize = 4;
const SLOTS_OFFSET: usize = COUNT_OFFSET + 1;
const WAKE_COUNT_OFFSET: usize = SLOTS_OFFSET + STORE_CAPACITY * SLOT_LEN;
const LAST_ACTIVITY_OFFSET: usize = WAKE_COUNT_OFFSET + 4;

/// Total size of the retained image
pub const IMAGE_LEN: usize = LAST_ACTIVITY_OFFSET + 4;

/// Volatile FIFO that evicts the oldest entry when full
#[derive(Debug, Clone)]
pub struct RingBuffer {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(STORE_CAPACITY)
    }
}

impl RingBuffer {
    /// Create an empty buffer
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append a message, returning the evicted oldest one if the buffer was full
    pub fn add(&mut self, message: Message) -> Option<Message> {
        let evicted = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(message);
        evicted
    }

    /// Remove and return the oldest message
    pub fn take(&mut self) -> Result<Message, BufferError> {
        self.messages.pop_front().ok_or(BufferError::Empty)
    }

    /// Oldest message, without removing it
    pub fn peek(&self) -> Option<&Message> {
        self.messages.front()
    }

    /// Number of buffered messages
    pub fn count(&self) -> usize {
        self.messages.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Check if the next add will evict
    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }

    /// Drop every message
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Iterate oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }
}

/// Memory that keeps its contents across a suspend
pub trait RetainedMemory: Send {
    /// Current image, `None` if the region was never written
    fn load(&self) -> Option<Vec<u8>>;

    /// Replace the image
    fn save(&mut self, image: &[u8]);
}

/// In-process retained region
///
/// Clones share the same backing bytes, so a clone held outside the bridge
/// observes what the bridge committed. Contents last until the process exits.
#[derive(Debug, Clone, Default)]
pub struct RetainedRegion {
    image: Arc<Mutex<Option<Vec<u8>>>>,
}

impl RetainedRegion {
    /// Create a region that has never been written
    pub fn new() -> Self {
        Self::default()
    }
}

impl RetainedMemory for RetainedRegion {
    fn load(&self) -> Option<Vec<u8>> {
        self.image.lock().clone()
    }

    fn save(&mut self, image: &[u8]) {
        *self.image.lock() = Some(image.to_vec());
    }
}

/// Decoded contents of a valid retained image
#[derive(Debug)]
struct Image {
    messages: VecDeque<Message>,
    wake_count: u32,
    last_activity_ms: u32,
}

fn read_u32(image: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&image[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn parse_image(image: &[u8]) -> Result<Image, StateError> {
    let corrupt = |reason: String| StateError::CorruptPersistentStore { reason };

    if image.len() != IMAGE_LEN {
        return Err(corrupt(format!(
            "image is {} bytes, expected {}",
            image.len(),
            IMAGE_LEN
        )));
    }

    let magic = read_u32(image, 0);
    if magic != RETAINED_MAGIC {
        return Err(corrupt(format!("bad magic 0x{:08X}", magic)));
    }

    let count = image[COUNT_OFFSET] as usize;
    if count > STORE_CAPACITY {
        return Err(corrupt(format!("count {} exceeds {}", count, STORE_CAPACITY)));
    }

    let mut messages = VecDeque::with_capacity(STORE_CAPACITY);
    for index in 0..count {
        let slot = &image[SLOTS_OFFSET + index * SLOT_LEN..SLOTS_OFFSET + (index + 1) * SLOT_LEN];
        let len = slot[0] as usize;
        if len == 0 || len > MAX_FRAME_LEN {
            return Err(corrupt(format!("slot {} has length {}", index, len)));
        }
        let message = codec::decode(&slot[1..1 + len])
            .map_err(|e| corrupt(format!("slot {}: {}", index, e)))?;
        messages.push_back(message);
    }

    Ok(Image {
        messages,
        wake_count: read_u32(image, WAKE_COUNT_OFFSET),
        last_activity_ms: read_u32(image, LAST_ACTIVITY_OFFSET),
    })
}

/// Sleep-surviving FIFO that rejects new messages when full
pub struct PersistentStore {
    memory: Box<dyn RetainedMemory>,
    messages: VecDeque<Message>,
    wake_count: u32,
    last_activity_ms: u32,
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore")
            .field("messages", &self.messages)
            .field("wake_count", &self.wake_count)
            .field("last_activity_ms", &self.last_activity_ms)
            .finish()
    }
}

impl PersistentStore {
    /// Load the store from retained memory
    ///
    /// A region that was never written is initialized empty. An invalid
    /// image is reinitialized empty with a warning.
    pub fn open(memory: impl RetainedMemory + 'static) -> Self {
        let mut store = Self {
            memory: Box::new(memory),
            messages: VecDeque::with_capacity(STORE_CAPACITY),
            wake_count: 0,
            last_activity_ms: 0,
        };

        match store.memory.load() {
            None => {
                info!("Retained memory empty, initializing persistent store");
                store.commit();
            }
            Some(image) => match parse_image(&image) {
                Ok(image) => {
                    info!(
                        messages = image.messages.len(),
                        wake_count = image.wake_count,
                        "Restored persistent store"
                    );
                    store.apply(image);
                }
                Err(e) => {
                    warn!("{}", e);
                    store.commit();
                }
            },
        }

        store
    }

    fn apply(&mut self, image: Image) {
        self.messages = image.messages;
        self.wake_count = image.wake_count;
        self.last_activity_ms = image.last_activity_ms;
    }

    /// Serialize the current contents into an image
    pub fn to_image(&self) -> Vec<u8> {
        let mut image = vec![0u8; IMAGE_LEN];
        image[..4].copy_from_slice(&RETAINED_MAGIC.to_le_bytes());

        let mut count = 0usize;
        for message in &self.messages {
            let slot = SLOTS_OFFSET + count * SLOT_LEN;
            match codec::encode(message, &mut image[slot + 1..slot + SLOT_LEN]) {
                Ok(len) => {
                    image[slot] = len as u8;
                    count += 1;
                }
                Err(e) => warn!(%message, "Skipping unencodable message in retained image: {}", e),
            }
        }
        image[COUNT_OFFSET] = count as u8;

        image[WAKE_COUNT_OFFSET..WAKE_COUNT_OFFSET + 4]
            .copy_from_slice(&self.wake_count.to_le_bytes());
        image[LAST_ACTIVITY_OFFSET..LAST_ACTIVITY_OFFSET + 4]
            .copy_from_slice(&self.last_activity_ms.to_le_bytes());
        image
    }

    /// Write the current contents to retained memory
    pub fn commit(&mut self) {
        let image = self.to_image();
        self.memory.save(&image);
        debug!(messages = self.messages.len(), "Committed persistent store");
    }

    /// Re-read retained memory after a wake
    ///
    /// If the image no longer validates the store is reset empty, committed,
    /// and the validation failure is returned for the caller to log.
    pub fn revalidate(&mut self) -> Result<(), StateError> {
        let result = match self.memory.load() {
            Some(image) => parse_image(&image),
            None => Err(StateError::CorruptPersistentStore {
                reason: "retained image missing".to_string(),
            }),
        };

        match result {
            Ok(image) => {
                self.apply(image);
                Ok(())
            }
            Err(e) => {
                self.messages.clear();
                self.wake_count = 0;
                self.last_activity_ms = 0;
                self.commit();
                Err(e)
            }
        }
    }

    /// Increment and persist the wake counter
    pub fn record_wake(&mut self) -> u32 {
        self.wake_count = self.wake_count.wrapping_add(1);
        self.commit();
        self.wake_count
    }

    /// Number of wakes recorded since the image was initialized
    pub fn wake_count(&self) -> u32 {
        self.wake_count
    }

    /// Milliseconds since boot of the last recorded activity
    pub fn last_activity_ms(&self) -> u32 {
        self.last_activity_ms
    }

    /// Record the time of the last activity
    pub fn set_last_activity_ms(&mut self, ms: u32) {
        self.last_activity_ms = ms;
    }

    /// Append a message, refusing it when the store is full
    ///
    /// Messages that cannot be encoded are refused as well, since they could
    /// not be written to the retained image.
    pub fn add(&mut self, message: Message) -> Result<(), BufferError> {
        if self.messages.len() >= STORE_CAPACITY {
            return Err(BufferError::Full {
                capacity: STORE_CAPACITY,
            });
        }
        codec::encoded_len(&message).map_err(BufferError::Unstorable)?;
        self.messages.push_back(message);
        Ok(())
    }

    /// Remove and return the oldest message
    pub fn take(&mut self) -> Result<Message, BufferError> {
        self.messages.pop_front().ok_or(BufferError::Empty)
    }

    /// Oldest message, without removing it
    pub fn peek(&self) -> Option<&Message> {
        self.messages.front()
    }

    /// Number of stored messages
    pub fn count(&self) -> usize {
        self.messages.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Check if the store will refuse the next add
    pub fn is_full(&self) -> bool {
        self.messages.len() >= STORE_CAPACITY
    }

    /// Drop every message (the wake counter is kept)
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Iterate oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loralink_core::Location;

    fn numbered(n: u8) -> Message {
        Message::text(n, format!("MSG {}", n))
    }

    #[test]
    fn test_image_len() {
        assert_eq!(SLOT_LEN, 52);
        assert_eq!(IMAGE_LEN, 4 + 1 + 10 * 52 + 4 + 4);
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut ring = RingBuffer::default();
        for n in 1..=10 {
            assert!(ring.add(numbered(n)).is_none());
        }
        assert!(ring.is_full());
        assert_eq!(ring.add(numbered(11)), Some(numbered(1)));

        assert_eq!(ring.count(), 10);
        let seqs: Vec<u8> = ring.iter().map(Message::seq).collect();
        assert_eq!(seqs, (2..=11).collect::<Vec<u8>>());
    }

    #[test]
    fn test_ring_buffer_fifo_take() {
        let mut ring = RingBuffer::new(3);
        ring.add(numbered(1));
        ring.add(numbered(2));
        assert_eq!(ring.peek(), Some(&numbered(1)));
        assert_eq!(ring.take().unwrap(), numbered(1));
        assert_eq!(ring.take().unwrap(), numbered(2));
        assert_eq!(ring.take().unwrap_err(), BufferError::Empty);
    }

    #[test]
    fn test_ring_buffer_clear() {
        let mut ring = RingBuffer::new(3);
        ring.add(numbered(1));
        ring.clear();
        assert!(ring.is_empty());
    }

    #[test]
    fn test_persistent_store_rejects_when_full() {
        let mut store = PersistentStore::open(RetainedRegion::new());
        for n in 1..=10 {
            store.add(numbered(n)).unwrap();
        }
        assert_eq!(
            store.add(numbered(11)).unwrap_err(),
            BufferError::Full { capacity: 10 }
        );
        assert_eq!(store.count(), 10);
        let seqs: Vec<u8> = store.iter().map(Message::seq).collect();
        assert_eq!(seqs, (1..=10).collect::<Vec<u8>>());
    }

    #[test]
    fn test_persistent_store_rejects_unencodable() {
        let mut store = PersistentStore::open(RetainedRegion::new());
        let bad = Message::text(1, "A".repeat(60));
        assert!(matches!(
            store.add(bad),
            Err(BufferError::Unstorable(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_first_boot_initializes_region() {
        let region = RetainedRegion::new();
        let store = PersistentStore::open(region.clone());
        assert!(store.is_empty());
        assert_eq!(store.wake_count(), 0);

        let image = region.load().unwrap();
        assert_eq!(image.len(), IMAGE_LEN);
        assert_eq!(&image[..4], &RETAINED_MAGIC.to_le_bytes());
    }

    #[test]
    fn test_commit_survives_reopen() {
        let region = RetainedRegion::new();
        let mut store = PersistentStore::open(region.clone());
        store.add(numbered(1)).unwrap();
        store
            .add(Message::text_with_location(2, "AT CAMP", Location::new(47_000_000, 8_000_000)))
            .unwrap();
        store.add(Message::ack(3)).unwrap();
        store.set_last_activity_ms(12_345);
        store.record_wake();

        let reopened = PersistentStore::open(region);
        assert_eq!(reopened.count(), 3);
        assert_eq!(reopened.wake_count(), 1);
        assert_eq!(reopened.last_activity_ms(), 12_345);
        let all: Vec<Message> = reopened.iter().cloned().collect();
        assert_eq!(all, store.iter().cloned().collect::<Vec<_>>());
    }

    #[test]
    fn test_uncommitted_changes_not_in_image() {
        let region = RetainedRegion::new();
        let mut store = PersistentStore::open(region.clone());
        store.add(numbered(1)).unwrap();
        assert_eq!(PersistentStore::open(region).count(), 0);
    }

    #[test]
    fn test_bad_magic_reinitializes() {
        let mut region = RetainedRegion::new();
        let mut image = vec![0u8; IMAGE_LEN];
        image[..4].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        region.save(&image);

        let store = PersistentStore::open(region.clone());
        assert!(store.is_empty());
        let fixed = region.load().unwrap();
        assert_eq!(&fixed[..4], &RETAINED_MAGIC.to_le_bytes());
    }

    #[test]
    fn test_count_over_capacity_is_corrupt() {
        let mut region = RetainedRegion::new();
        let mut store = PersistentStore::open(region.clone());
        store.add(numbered(1)).unwrap();
        store.commit();

        let mut image = region.load().unwrap();
        image[COUNT_OFFSET] = 11;
        region.save(&image);

        let err = store.revalidate().unwrap_err();
        assert!(matches!(err, StateError::CorruptPersistentStore { .. }));
        assert!(store.is_empty());
        assert!(store.revalidate().is_ok());
    }

    #[test]
    fn test_garbage_slot_is_corrupt() {
        let mut region = RetainedRegion::new();
        let mut store = PersistentStore::open(region.clone());
        store.add(numbered(1)).unwrap();
        store.commit();

        let mut image = region.load().unwrap();
        image[SLOTS_OFFSET + 1] = 0x7E;
        region.save(&image);

        assert!(store.revalidate().is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_revalidate_keeps_valid_contents() {
        let region = RetainedRegion::new();
        let mut store = PersistentStore::open(region);
        store.add(numbered(4)).unwrap();
        store.add(numbered(5)).unwrap();
        store.commit();

        assert!(store.revalidate().is_ok());
        assert_eq!(store.take().unwrap(), numbered(4));
        assert_eq!(store.take().unwrap(), numbered(5));
        assert_eq!(store.take().unwrap_err(), BufferError::Empty);
    }

    #[test]
    fn test_wake_counter_persists() {
        let region = RetainedRegion::new();
        let mut store = PersistentStore::open(region.clone());
        assert_eq!(store.record_wake(), 1);
        assert_eq!(store.record_wake(), 2);
        assert_eq!(PersistentStore::open(region).wake_count(), 2);
    }
}
