//! Event ids the agent has sent.

use std::collections::{HashSet, VecDeque};
use std::sync::{PoisonError, RwLock};

pub const DEFAULT_CAPACITY: usize = 4096;

/// Bounded, recency-ordered set of the agent's own event ids.
///
/// Once `capacity` ids are held, recording a new one evicts the oldest.
/// Replies to an evicted message are then treated as replies to a user.
#[derive(Debug)]
pub struct OwnMessageRegistry {
    capacity: usize,
    inner: RwLock<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    order: VecDeque<String>,
    lookup: HashSet<String>,
}

impl Default for OwnMessageRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl OwnMessageRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(Entries::default()),
        }
    }

    /// Remember an event the agent just sent.
    pub fn record(&self, event_id: impl Into<String>) {
        let event_id = event_id.into();
        let mut entries = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.lookup.insert(event_id.clone()) {
            return;
        }
        entries.order.push_back(event_id);

        while entries.order.len() > self.capacity {
            if let Some(evicted) = entries.order.pop_front() {
                entries.lookup.remove(&evicted);
            }
        }
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup
            .contains(event_id)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn records_are_visible_immediately() {
        let registry = OwnMessageRegistry::default();
        assert!(!registry.contains("$a"));
        registry.record("$a");
        assert!(registry.contains("$a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let registry = OwnMessageRegistry::new(2);
        registry.record("$a");
        registry.record("$b");
        registry.record("$a");
        registry.record("$c");

        assert!(!registry.contains("$a"));
        assert!(registry.contains("$b"));
        assert!(registry.contains("$c"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn concurrent_writers_keep_every_id() {
        let registry = Arc::new(OwnMessageRegistry::new(1000));
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        registry.record(format!("${worker}-{i}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 200);
        assert!(registry.contains("$3-49"));
    }
}
