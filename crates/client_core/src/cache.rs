use std::{collections::HashMap, fmt, time::Duration};

use tokio::time::Instant;

/// Logical resource a cached response belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Channels,
    Messages { channel: String, limit: u32 },
    User(String),
}

impl CacheKey {
    pub fn messages(channel: impl Into<String>, limit: u32) -> Self {
        CacheKey::Messages {
            channel: channel.into(),
            limit,
        }
    }

    pub fn is_messages_of(&self, channel: &str) -> bool {
        matches!(self, CacheKey::Messages { channel: cached, .. } if cached == channel)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Channels => f.write_str("channels"),
            CacheKey::Messages { channel, limit } => write!(f, "messages:{channel}:{limit}"),
            CacheKey::User(username) => write!(f, "user:{username}"),
        }
    }
}

struct CacheEntry<V> {
    data: V,
    stored_at: Instant,
}

/// Fixed-TTL read-through cache. Entries are never swept; a stale entry is
/// ignored on read and replaced by the next `set`.
///
/// Every invalidation bumps a generation counter. A read that captured the
/// generation before its request stores through [`ResponseCache::set_if_current`],
/// so a response fetched across an invalidation is never cached.
pub struct ResponseCache<V> {
    ttl: Duration,
    generation: u64,
    entries: HashMap<CacheKey, CacheEntry<V>>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            generation: 0,
            entries: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.data.clone())
    }

    pub fn set(&mut self, key: CacheKey, data: V) {
        self.entries.insert(
            key,
            CacheEntry {
                data,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stores unless an invalidation happened since `generation` was read.
    pub fn set_if_current(&mut self, key: CacheKey, data: V, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.set(key, data);
        true
    }

    pub fn invalidate(&mut self, key: &CacheKey) -> bool {
        self.generation += 1;
        self.entries.remove(key).is_some()
    }

    pub fn invalidate_where(&mut self, mut predicate: impl FnMut(&CacheKey) -> bool) -> usize {
        self.generation += 1;
        let before = self.entries.len();
        self.entries.retain(|key, _| !predicate(key));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.entries.clear();
    }

    /// Stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
