// =============================================================================
// Subscription bookkeeping
// =============================================================================
//
// `subscribed` holds symbols streamed on the live connection, `pending`
// holds symbols requested while disconnected.  Their union never exceeds the
// capacity: a request that would overflow is rejected whole.
//
// The sets are touched by vendor callback threads and the adapter's loop, so
// every operation takes the lock for its full read-modify-write.
// =============================================================================

use std::collections::BTreeSet;

use parking_lot::Mutex;

use super::AdapterError;

#[derive(Default)]
struct Sets {
    subscribed: BTreeSet<String>,
    pending: BTreeSet<String>,
}

impl Sets {
    fn len(&self) -> usize {
        self.subscribed.len() + self.pending.len()
    }

    fn contains(&self, symbol: &str) -> bool {
        self.subscribed.contains(symbol) || self.pending.contains(symbol)
    }
}

pub struct SubscriptionBook {
    capacity: usize,
    sets: Mutex<Sets>,
}

impl SubscriptionBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            sets: Mutex::new(Sets::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserve the not-yet-known symbols of `symbols`, into `subscribed` when
    /// `live`, else into `pending`.  Returns the newly reserved symbols in
    /// request order; symbols already held do not count against capacity.
    pub fn reserve(&self, symbols: &[String], live: bool) -> Result<Vec<String>, AdapterError> {
        let mut sets = self.sets.lock();

        let mut fresh: Vec<String> = Vec::new();
        for symbol in symbols.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            if !sets.contains(symbol) && !fresh.iter().any(|f| f == symbol) {
                fresh.push(symbol.to_string());
            }
        }

        let current = sets.len();
        if current + fresh.len() > self.capacity {
            return Err(AdapterError::CapacityExceeded {
                current,
                requested: fresh.len(),
                capacity: self.capacity,
            });
        }

        let target = if live { &mut sets.subscribed } else { &mut sets.pending };
        target.extend(fresh.iter().cloned());
        Ok(fresh)
    }

    /// Undo a live reservation whose vendor call failed.
    pub fn rollback(&self, symbols: &[String]) {
        let mut sets = self.sets.lock();
        for symbol in symbols {
            sets.subscribed.remove(symbol);
        }
    }

    /// Move live reservations to pending (the connection dropped under them).
    pub fn defer(&self, symbols: &[String]) {
        let mut sets = self.sets.lock();
        for symbol in symbols {
            if sets.subscribed.remove(symbol) {
                sets.pending.insert(symbol.clone());
            }
        }
    }

    /// Forget `symbols`; returns those that were live-subscribed.
    pub fn remove(&self, symbols: &[String]) -> Vec<String> {
        let mut sets = self.sets.lock();
        let mut live = Vec::new();
        for symbol in symbols.iter().map(|s| s.trim()) {
            sets.pending.remove(symbol);
            if sets.subscribed.remove(symbol) {
                live.push(symbol.to_string());
            }
        }
        live
    }

    /// Subscribed ∪ pending, sorted.
    pub fn all(&self) -> Vec<String> {
        let sets = self.sets.lock();
        sets.subscribed.union(&sets.pending).cloned().collect()
    }

    /// Pending symbols became live; returns how many moved.
    pub fn promote_pending(&self) -> usize {
        let mut sets = self.sets.lock();
        let pending = std::mem::take(&mut sets.pending);
        let moved = pending.len();
        sets.subscribed.extend(pending);
        moved
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.sets.lock().subscribed.iter().cloned().collect()
    }

    pub fn pending(&self) -> Vec<String> {
        self.sets.lock().pending.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
