use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// How many delivery keys are remembered before the oldest is forgotten.
pub const DEFAULT_CAPACITY: usize = 200;

#[derive(Default)]
struct SeenKeys {
    order: VecDeque<String>,
    keys: HashSet<String>,
}

/// Bounded memory of recently processed Slack deliveries.
///
/// Slack retries an event when the ack is slow, and the same DM can arrive both as a
/// `message` and an `app_mention`, so each delivery is checked against several keys.
pub struct EventDeduplicator {
    capacity: usize,
    seen: Mutex<SeenKeys>,
}

impl EventDeduplicator {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), seen: Mutex::new(SeenKeys::default()) }
    }

    /// Returns `true` when none of `keys` has been observed, and remembers all of them.
    pub fn first_delivery<I>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        let keys: Vec<String> = keys.into_iter().collect();
        let mut seen = match self.seen.lock() {
            Ok(seen) => seen,
            Err(poisoned) => poisoned.into_inner(),
        };

        if keys.iter().any(|key| seen.keys.contains(key)) {
            return false;
        }

        for key in keys {
            seen.keys.insert(key.clone());
            seen.order.push_back(key);
            while seen.order.len() > self.capacity {
                if let Some(oldest) = seen.order.pop_front() {
                    seen.keys.remove(&oldest);
                }
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        match self.seen.lock() {
            Ok(seen) => seen.order.len(),
            Err(poisoned) => poisoned.into_inner().order.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::{EventDeduplicator, DEFAULT_CAPACITY};

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn repeated_event_ids_are_rejected() {
        let dedup = EventDeduplicator::default();
        assert!(dedup.first_delivery(keys(&["event:Ev1", "message:U1:1.0"])));
        assert!(!dedup.first_delivery(keys(&["event:Ev1", "message:U1:1.0"])));
    }

    #[test]
    fn any_shared_key_marks_a_duplicate() {
        let dedup = EventDeduplicator::default();
        assert!(dedup.first_delivery(keys(&["event:Ev1", "message:U1:1.0"])));
        assert!(!dedup.first_delivery(keys(&["event:Ev2", "message:U1:1.0"])));
        assert!(dedup.first_delivery(keys(&["event:Ev3", "message:U1:2.0"])));
    }

    #[test]
    fn memory_is_bounded_and_forgets_oldest_first() {
        let dedup = EventDeduplicator::new(3);
        for index in 0..5 {
            assert!(dedup.first_delivery(vec![format!("event:{index}")]));
        }

        assert_eq!(dedup.len(), 3);
        assert!(dedup.first_delivery(vec!["event:0".to_string()]));
        assert!(!dedup.first_delivery(vec!["event:4".to_string()]));
    }

    #[test]
    fn default_capacity_holds_two_hundred_keys() {
        let dedup = EventDeduplicator::default();
        for index in 0..(DEFAULT_CAPACITY + 50) {
            dedup.first_delivery(vec![format!("event:{index}")]);
        }
        assert_eq!(dedup.len(), DEFAULT_CAPACITY);
    }
}
