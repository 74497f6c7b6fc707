//! Invocation counting and the sampling decision

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::table::BoundedMap;

/// Per-identity invocation counters plus the shared sampling rate.
///
/// The n-th call of an identity (1-based) is deep-profiled iff
/// `n % rate == 0`. The rate is clamped to at least 1, so rate 1 samples
/// every call.
#[derive(Debug)]
pub struct SamplingState {
    counters: Mutex<BoundedMap<Arc<AtomicU64>>>,
    rate: AtomicU64,
}

impl SamplingState {
    pub fn new(rate: u64, max_identities: usize) -> Self {
        Self {
            counters: Mutex::new(BoundedMap::new(max_identities)),
            rate: AtomicU64::new(rate.max(1)),
        }
    }

    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    /// Store a new rate; values below 1 become 1
    pub fn set_rate(&self, rate: u64) {
        self.rate.store(rate.max(1), Ordering::Relaxed);
    }

    /// Count one invocation and return its 1-based ordinal
    pub fn record(&self, identity: &str) -> u64 {
        let counter = {
            let mut counters = self.counters.lock();
            let (counter, evicted) =
                counters.get_or_insert_with(identity, || Arc::new(AtomicU64::new(0)));
            if let Some(evicted) = evicted {
                debug!(function = %evicted, "Evicted sampling counter");
            }
            Arc::clone(counter)
        };
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn is_sampled(&self, ordinal: u64) -> bool {
        ordinal % self.rate() == 0
    }

    /// Count one invocation and decide whether it gets deep-profiled
    pub fn next(&self, identity: &str) -> bool {
        let ordinal = self.record(identity);
        self.is_sampled(ordinal)
    }

    /// Current count for an identity, if it is still tracked
    pub fn count(&self, identity: &str) -> Option<u64> {
        self.counters
            .lock()
            .get(identity)
            .map(|c| c.load(Ordering::Relaxed))
    }

    pub fn tracked(&self) -> usize {
        self.counters.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rate_is_clamped() {
        let state = SamplingState::new(0, 10);
        assert_eq!(state.rate(), 1);

        state.set_rate(0);
        assert_eq!(state.rate(), 1);
        state.set_rate(5);
        assert_eq!(state.rate(), 5);
    }

    #[test]
    fn test_rate_one_samples_every_call() {
        let state = SamplingState::new(1, 10);
        assert!((0..10).all(|_| state.next("f")));
    }

    #[test]
    fn test_counters_are_per_identity() {
        let state = SamplingState::new(2, 10);
        assert!(!state.next("a"));
        assert!(!state.next("b"));
        assert!(state.next("a"));
        assert_eq!(state.count("a"), Some(2));
        assert_eq!(state.count("b"), Some(1));
    }

    #[test]
    fn test_counter_table_is_bounded() {
        let state = SamplingState::new(1, 3);
        for i in 0..20 {
            state.record(&format!("f{}", i));
        }
        assert_eq!(state.tracked(), 3);
    }

    #[test]
    fn test_concurrent_counts_are_exact() {
        let state = Arc::new(SamplingState::new(10, 10));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    (0..250).filter(|_| state.next("hot")).count()
                })
            })
            .collect();
        let sampled: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(state.count("hot"), Some(1000));
        assert_eq!(sampled, 100);
    }

    proptest! {
        #[test]
        fn prop_sampled_calls_follow_rate(rate in 1u64..50, calls in 1u64..500) {
            let state = SamplingState::new(rate, 4);
            let sampled: Vec<u64> = (1..=calls)
                .filter(|_| state.next("f"))
                .collect();
            prop_assert_eq!(sampled.len() as u64, calls / rate);
        }
    }
}
