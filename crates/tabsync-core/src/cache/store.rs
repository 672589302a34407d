use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::clock::Clock;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    pub inserted_at: Instant,
    pub expires_at: Instant,
    /// Wall-clock time of insertion, for "last updated" labels.
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        age_display(self.age_minutes())
    }
}

/// Render an age in minutes as a short relative label, rounding half up.
fn age_display(minutes: i64) -> String {
    if minutes < 1 {
        // Includes negative ages from clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    max_size: usize,
    clock: Arc<dyn Clock>,
    torn_down: bool,
}

impl CacheStore {
    pub fn new(max_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            max_size,
            clock,
            torn_down: false,
        }
    }

    /// Payload for `key` if present and unexpired. Expired entries are left in
    /// place and simply ignored.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entry(key).map(|e| &e.payload)
    }

    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        let now = self.clock.now();
        self.entries.get(key).filter(|e| e.is_valid_at(now))
    }

    /// Insert or refresh `key`, evicting soonest-to-expire entries so that no
    /// more than `max_size` unexpired entries remain. Ignored once torn down,
    /// and when `max_size` is 0.
    pub fn set(&mut self, key: &str, payload: Value, ttl: Duration) {
        if self.torn_down {
            debug!(key = key, "Cache write after teardown ignored");
            return;
        }
        if self.max_size == 0 {
            self.entries.clear();
            debug!(key = key, "Cache size is 0, write ignored");
            return;
        }

        let now = self.clock.now();
        self.evict_for_insert(key, now);

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                payload,
                inserted_at: now,
                expires_at: now + ttl,
                cached_at: Utc::now(),
            },
        );
    }

    fn evict_for_insert(&mut self, key: &str, now: Instant) {
        self.entries.retain(|_, e| e.is_valid_at(now));

        // Refreshing an existing key does not grow the store
        let mut candidates: Vec<(Instant, String)> = self
            .entries
            .values()
            .filter(|e| e.key != key)
            .map(|e| (e.expires_at, e.key.clone()))
            .collect();
        candidates.sort();

        let excess = (candidates.len() + 1).saturating_sub(self.max_size);
        for (_, evicted) in candidates.into_iter().take(excess) {
            debug!(key = %evicted, "Evicting cache entry");
            self.entries.remove(&evicted);
        }
    }

    pub fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop everything and refuse further writes.
    pub fn mark_torn_down(&mut self) {
        self.torn_down = true;
        self.entries.clear();
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Number of unexpired entries.
    pub fn len_valid(&self) -> usize {
        let now = self.clock.now();
        self.entries.values().filter(|e| e.is_valid_at(now)).count()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

// ============================================================================
// Tests
// ============================================================================
