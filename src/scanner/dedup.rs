use dashmap::DashSet;

use crate::types::StackToken;

/// Remembers which profitable stacks have already been reported.
///
/// `should_notify` is the only way in: the first call for a token inserts it and
/// returns true, every later call returns false until `clear`. `DashSet::insert`
/// holds the shard lock across the test and the insert, so two workers racing on
/// the same lot cannot both win.
#[derive(Debug, Default)]
pub struct StackDeduplicator {
    seen: DashSet<StackToken>,
}

impl StackDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_notify(&self, token: StackToken) -> bool {
        self.seen.insert(token)
    }

    pub fn clear(&self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn token(start: &str) -> StackToken {
        StackToken {
            item_id: "y1q9".to_string(),
            buyout_price: 900,
            amount: 10,
            start_time: start.to_string(),
        }
    }

    #[test]
    fn same_token_notifies_once_until_cleared() {
        let dedup = StackDeduplicator::new();
        assert!(dedup.should_notify(token("t0")));
        assert!(!dedup.should_notify(token("t0")));

        dedup.clear();
        assert!(dedup.should_notify(token("t0")));
    }

    #[test]
    fn different_start_time_is_a_different_lot() {
        let dedup = StackDeduplicator::new();
        assert!(dedup.should_notify(token("t0")));
        assert!(dedup.should_notify(token("t1")));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn concurrent_discovery_yields_exactly_one_winner() {
        let dedup = Arc::new(StackDeduplicator::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let dedup = Arc::clone(&dedup);
                std::thread::spawn(move || dedup.should_notify(token("race")))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
