//! Bounded per-identity tables
//!
//! Both the function metric table and the sampling counter table are keyed
//! by function identity and capped. Entries live in a dense vector with a
//! key index beside it, so a uniformly random victim can be picked and
//! removed in O(1) via `swap_remove`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Serialize, Serializer};

// =============================================================================
// Function Metric Record
// =============================================================================

/// Most recent observation of a traced function.
///
/// Every run overwrites the timing and concurrency fields. Memory and
/// profile paths only change on sampled runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionMetricRecord {
    /// Wall-clock start of the latest run
    pub last_ran_at: DateTime<Utc>,

    /// Wall-clock duration of the latest run
    #[serde(rename = "executionTimeMicros", serialize_with = "as_micros")]
    pub execution_time: Duration,

    /// Growth in live concurrency units across the latest run
    pub concurrency_delta: u64,

    /// In-use heap growth across the latest sampled run, in bytes
    pub memory_usage: u64,

    pub cpu_profile_path: Option<PathBuf>,

    pub mem_profile_path: Option<PathBuf>,
}

fn as_micros<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_micros())
}

// =============================================================================
// Bounded Map
// =============================================================================

/// String-keyed map with a hard capacity and random eviction.
#[derive(Debug)]
pub struct BoundedMap<V> {
    index: HashMap<String, usize>,
    entries: Vec<(String, V)>,
    capacity: usize,
}

impl<V> BoundedMap<V> {
    /// Capacity is clamped to at least one entry
    pub fn new(capacity: usize) -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        match self.index.get(key) {
            Some(&i) => Some(&mut self.entries[i].1),
            None => None,
        }
    }

    /// Insert or overwrite.
    ///
    /// Adding a new key to a full map first evicts a random entry, whose key
    /// is returned.
    pub fn insert(&mut self, key: String, value: V) -> Option<String> {
        if let Some(&i) = self.index.get(&key) {
            self.entries[i].1 = value;
            return None;
        }

        let evicted = self.make_room();
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        evicted
    }

    /// Mutable access to `key`, inserting `make()` first when absent.
    ///
    /// Also returns the key evicted to make room, if any.
    pub fn get_or_insert_with(
        &mut self,
        key: &str,
        make: impl FnOnce() -> V,
    ) -> (&mut V, Option<String>) {
        let (slot, evicted) = match self.index.get(key).copied() {
            Some(i) => (i, None),
            None => {
                let evicted = self.make_room();
                let slot = self.entries.len();
                self.index.insert(key.to_string(), slot);
                self.entries.push((key.to_string(), make()));
                (slot, evicted)
            }
        };
        (&mut self.entries[slot].1, evicted)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let i = self.index.get(key).copied()?;
        Some(self.remove_at(i).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn make_room(&mut self) -> Option<String> {
        if self.entries.len() < self.capacity {
            return None;
        }
        let victim = rand::rng().random_range(0..self.entries.len());
        Some(self.remove_at(victim).0)
    }

    fn remove_at(&mut self, i: usize) -> (String, V) {
        let (key, value) = self.entries.swap_remove(i);
        self.index.remove(&key);
        if let Some((moved, _)) = self.entries.get(i) {
            if let Some(slot) = self.index.get_mut(moved) {
                *slot = i;
            }
        }
        (key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_consistent<V>(map: &BoundedMap<V>) {
        assert_eq!(map.index.len(), map.entries.len());
        for (i, (key, _)) in map.entries.iter().enumerate() {
            assert_eq!(map.index.get(key), Some(&i));
        }
    }

    #[test]
    fn test_insert_and_overwrite() {
        let mut map = BoundedMap::new(4);
        assert_eq!(map.insert("a".to_string(), 1), None);
        assert_eq!(map.insert("a".to_string(), 2), None);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("a"), Some(&2));
    }

    #[test]
    fn test_eviction_at_capacity() {
        let mut map = BoundedMap::new(2);
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);

        let evicted = map.insert("c".to_string(), 3).unwrap();
        assert!(evicted == "a" || evicted == "b");
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("c"));
        assert!(!map.contains_key(&evicted));
        assert_consistent(&map);
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut map: BoundedMap<u32> = BoundedMap::new(1);
        {
            let (value, evicted) = map.get_or_insert_with("a", || 10);
            *value += 1;
            assert!(evicted.is_none());
        }
        assert_eq!(map.get("a"), Some(&11));

        let (_, evicted) = map.get_or_insert_with("b", || 0);
        assert_eq!(evicted.as_deref(), Some("a"));
    }

    #[test]
    fn test_remove_keeps_index_consistent() {
        let mut map = BoundedMap::new(8);
        for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
            map.insert(key.to_string(), i);
        }
        assert_eq!(map.remove("a"), Some(0));
        assert_eq!(map.remove("a"), None);
        assert_consistent(&map);
        assert_eq!(map.get("d"), Some(&3));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut map = BoundedMap::new(0);
        map.insert("a".to_string(), ());
        assert_eq!(map.capacity(), 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_record_serializes_micros() {
        let record = FunctionMetricRecord {
            last_ran_at: Utc::now(),
            execution_time: Duration::from_millis(3),
            concurrency_delta: 0,
            memory_usage: 0,
            cpu_profile_path: None,
            mem_profile_path: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["executionTimeMicros"], 3000);
        assert!(json["cpuProfilePath"].is_null());
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity(
            capacity in 1usize..16,
            keys in prop::collection::vec("[a-z]{1,3}", 0..200),
        ) {
            let mut map = BoundedMap::new(capacity);
            for key in keys {
                map.insert(key.clone(), ());
                prop_assert!(map.len() <= capacity);
                prop_assert!(map.contains_key(&key));
            }
            assert_consistent(&map);
        }
    }
}
