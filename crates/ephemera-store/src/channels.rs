use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use ephemera_shared::{ChannelId, ChannelTarget, Message};

use crate::buffer::ChannelBuffer;

// ---------------------------------------------------------------------------
// Local channel entry
// ---------------------------------------------------------------------------

/// A local channel's buffer plus the last time anything touched it.
#[derive(Debug)]
struct LocalChannelEntry {
    buffer: ChannelBuffer,
    last_seen: Instant,
    /// Set by the reclaimer under the entry lock just before the entry is
    /// dropped from the map. Holders of a stale `Arc` must re-resolve.
    reclaimed: bool,
}

impl LocalChannelEntry {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: ChannelBuffer::new(capacity),
            last_seen: Instant::now(),
            reclaimed: false,
        }
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

type SharedEntry = Arc<Mutex<LocalChannelEntry>>;

// ---------------------------------------------------------------------------
// Channel store
// ---------------------------------------------------------------------------

/// In-memory home of every channel buffer.
///
/// One lock guards the global buffer and one lock guards each local entry,
/// so traffic on unrelated channels never contends. The map of local entries
/// has its own lock, held only long enough to look up, insert, or remove an
/// entry.
#[derive(Clone)]
pub struct ChannelStore {
    global: Arc<Mutex<ChannelBuffer>>,
    local: Arc<RwLock<HashMap<ChannelId, SharedEntry>>>,
    capacity: usize,
    limit_ceiling: usize,
}

impl ChannelStore {
    /// `capacity` bounds every buffer; `limit_ceiling` bounds every query.
    pub fn new(capacity: usize, limit_ceiling: usize) -> Self {
        Self {
            global: Arc::new(Mutex::new(ChannelBuffer::new(capacity))),
            local: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            limit_ceiling: limit_ceiling.max(1),
        }
    }

    /// Store a message in the buffer named by its own channel fields.
    ///
    /// Local channels are created on first use. A local message is written
    /// to its channel only; it is never mirrored into the global buffer.
    pub async fn append(&self, message: Message) {
        match message.target() {
            ChannelTarget::Global => {
                let mut buffer = self.global.lock().await;
                let evicted = buffer.push(message);
                if evicted > 0 {
                    debug!(evicted, "Global buffer full, evicted oldest");
                }
            }
            ChannelTarget::Local(channel_id) => {
                let mut message = Some(message);
                loop {
                    let entry = self.resolve_or_create(&channel_id).await;
                    let mut entry = entry.lock().await;
                    if entry.reclaimed {
                        // Lost a race with the reclaimer; the next resolve
                        // creates a fresh entry.
                        continue;
                    }
                    entry.touch();
                    if let Some(message) = message.take() {
                        let evicted = entry.buffer.push(message);
                        if evicted > 0 {
                            debug!(channel = %channel_id, evicted, "Local buffer full, evicted oldest");
                        }
                    }
                    break;
                }
            }
        }
    }

    /// Messages in `target` with `created_at > after`, oldest first,
    /// truncated to the newest `min(limit, ceiling)` entries.
    ///
    /// An unknown local channel yields an empty list and is not created.
    /// Querying a known local channel refreshes its idle clock.
    pub async fn query(&self, target: &ChannelTarget, after: i64, limit: usize) -> Vec<Message> {
        let limit = limit.min(self.limit_ceiling);
        match target {
            ChannelTarget::Global => self.global.lock().await.newer_than(after, limit),
            ChannelTarget::Local(channel_id) => {
                let Some(entry) = self.lookup(channel_id).await else {
                    return Vec::new();
                };
                let mut entry = entry.lock().await;
                if entry.reclaimed {
                    return Vec::new();
                }
                entry.touch();
                entry.buffer.newer_than(after, limit)
            }
        }
    }

    /// Remove every local channel idle for longer than `max_idle`.
    /// Returns the number of channels removed.
    pub async fn reclaim_idle(&self, max_idle: Duration) -> usize {
        self.reclaim_idle_at(Instant::now(), max_idle).await
    }

    /// [`reclaim_idle`](Self::reclaim_idle) against an explicit clock.
    ///
    /// Entries whose lock is currently held are in use and are skipped.
    pub async fn reclaim_idle_at(&self, now: Instant, max_idle: Duration) -> usize {
        let mut local = self.local.write().await;
        let before = local.len();
        local.retain(|_, entry| {
            let Ok(mut guard) = entry.try_lock() else {
                return true;
            };
            let idle = now.saturating_duration_since(guard.last_seen);
            if idle > max_idle {
                guard.reclaimed = true;
                false
            } else {
                true
            }
        });
        before - local.len()
    }

    /// Number of messages currently held for `target`.
    pub async fn len(&self, target: &ChannelTarget) -> usize {
        match target {
            ChannelTarget::Global => self.global.lock().await.len(),
            ChannelTarget::Local(channel_id) => match self.lookup(channel_id).await {
                Some(entry) => entry.lock().await.buffer.len(),
                None => 0,
            },
        }
    }

    /// Number of live local channels.
    pub async fn local_channel_count(&self) -> usize {
        self.local.read().await.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn limit_ceiling(&self) -> usize {
        self.limit_ceiling
    }

    async fn lookup(&self, channel_id: &ChannelId) -> Option<SharedEntry> {
        self.local.read().await.get(channel_id).cloned()
    }

    async fn resolve_or_create(&self, channel_id: &ChannelId) -> SharedEntry {
        if let Some(entry) = self.lookup(channel_id).await {
            return entry;
        }
        let mut local = self.local.write().await;
        local
            .entry(channel_id.clone())
            .or_insert_with(|| {
                debug!(channel = %channel_id, "Creating local channel");
                Arc::new(Mutex::new(LocalChannelEntry::new(self.capacity)))
            })
            .clone()
    }
}
