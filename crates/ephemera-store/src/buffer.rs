use std::collections::VecDeque;

use ephemera_shared::Message;

/// A bounded, time-ordered message buffer.
///
/// Entries are kept sorted by `created_at` (insertion order in practice) and
/// the oldest entry is evicted once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl ChannelBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Insert a message, evicting from the front until the buffer fits.
    /// Returns the number of evicted messages.
    pub fn push(&mut self, message: Message) -> usize {
        // Ties keep arrival order; a stamp older than the tail is slotted in
        // behind its newer neighbours.
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);

        let mut evicted = 0;
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// The newest `limit` messages with `created_at > after`, oldest first.
    pub fn newer_than(&self, after: i64, limit: usize) -> Vec<Message> {
        let start = self.messages.partition_point(|m| m.created_at <= after);
        let matching = self.messages.len() - start;
        let skip = matching.saturating_sub(limit);
        self.messages
            .iter()
            .skip(start + skip)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
