//! Leading-edge debounce for device notifications.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Lets the first request through, then coalesces requests with the same key
/// until `window` has passed since that delivery.
///
/// A slot is claimed before the delivery starts so concurrent requests see it.
/// If the delivery fails the caller hands the stamp back through `release`.
pub struct DebounceGate<K> {
    window: Duration,
    last: Mutex<HashMap<K, Instant>>,
}

impl<K: Eq + Hash + Copy> DebounceGate<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the slot for `key`. Returns `None` while inside the window.
    pub async fn try_acquire(&self, key: K) -> Option<Instant> {
        let now = Instant::now();
        let mut last = self.last.lock().await;
        if let Some(prev) = last.get(&key)
            && now.duration_since(*prev) < self.window
        {
            return None;
        }
        last.insert(key, now);
        Some(now)
    }

    /// Give back a slot whose delivery failed.
    ///
    /// Only clears the entry if nobody claimed it since `stamp`.
    pub async fn release(&self, key: K, stamp: Instant) {
        let mut last = self.last.lock().await;
        if last.get(&key) == Some(&stamp) {
            last.remove(&key);
        }
    }
}
