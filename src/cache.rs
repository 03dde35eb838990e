// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Two-tier structural plan cache
//!
//! The fast path hashes the canonical plan rendering straight into the
//! hasher, without materializing the string. A hash hit is verified against
//! the full structural key; on mismatch (a collision) the secondary map
//! keyed by the string resolves it. Eviction is approximate LRU: a single
//! scan selects the oldest quarter of entries through a bounded replace-max
//! heap. Readers stay lock-free; eviction is serialized by a single-writer
//! guard.

use std::collections::BinaryHeap;
use std::fmt::Write as _;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, trace};
use parking_lot::Mutex;

use crate::plan::query::QueryPlan;
use crate::plan::LogicalPlan;

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a plan
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, 0.0 when no lookups happened
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    key: Arc<str>,
    hash: u64,
    plan: Arc<QueryPlan>,
    last_access: AtomicU64,
}

/// Concurrent plan cache with approximate-LRU eviction
#[derive(Debug)]
pub struct PlanCache {
    by_hash: DashMap<u64, Arc<CacheEntry>>,
    by_key: DashMap<Arc<str>, Arc<CacheEntry>>,
    random_state: RandomState,
    counter: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    max_size: usize,
    enabled: bool,
    evict_guard: Mutex<()>,
}

impl PlanCache {
    /// Create a cache holding at most `max_size` plans; a disabled cache
    /// turns lookups and inserts into no-ops
    pub fn new(enabled: bool, max_size: usize) -> Self {
        Self {
            by_hash: DashMap::new(),
            by_key: DashMap::new(),
            random_state: RandomState::new(),
            counter: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            max_size: max_size.max(1),
            enabled,
            evict_guard: Mutex::new(()),
        }
    }

    /// Look up the compiled plan for `plan`
    pub fn get(&self, plan: &LogicalPlan) -> Option<Arc<QueryPlan>> {
        if !self.enabled {
            return None;
        }
        let hash = self.structural_hash(plan);
        let entry = match self.by_hash.get(&hash) {
            Some(entry) => {
                // Verify against the full key; hashes can collide
                let key = structural_key(plan);
                if entry.key.as_ref() == key {
                    Some(Arc::clone(&entry))
                } else {
                    trace!("plan cache hash collision on {hash:#018x}");
                    self.by_key.get(key.as_str()).map(|e| Arc::clone(&e))
                }
            }
            None => None,
        };
        match entry {
            Some(entry) => {
                let stamp = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
                entry.last_access.store(stamp, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.plan))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert the compiled plan for `plan`
    pub fn put(&self, plan: &LogicalPlan, compiled: Arc<QueryPlan>) {
        if !self.enabled {
            return;
        }
        let hash = self.structural_hash(plan);
        let key: Arc<str> = Arc::from(structural_key(plan));
        let stamp = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = Arc::new(CacheEntry {
            key: Arc::clone(&key),
            hash,
            plan: compiled,
            last_access: AtomicU64::new(stamp),
        });
        // The primary slot keeps its first occupant on collision; the
        // secondary map is authoritative
        self.by_hash.entry(hash).or_insert_with(|| Arc::clone(&entry));
        self.by_key.insert(key, entry);
        if self.by_key.len() > self.max_size {
            self.evict();
        }
    }

    /// Number of cached plans
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether the cache holds no plans
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Drop every cached plan
    pub fn clear(&self) {
        let _guard = self.evict_guard.lock();
        self.by_hash.clear();
        self.by_key.clear();
    }

    /// Current hit/miss counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Evict the quarter of entries with the oldest access stamps, selected
    /// in one scan with a bounded replace-max heap
    fn evict(&self) {
        let Some(_guard) = self.evict_guard.try_lock() else {
            // Another writer is already evicting
            return;
        };
        let len = self.by_key.len();
        if len <= self.max_size {
            return;
        }
        let k = (len / 4).max(1);
        // Max-heap of (stamp, key): the top is the newest of the current
        // candidates and is replaced whenever an older entry turns up
        let mut heap: BinaryHeap<(u64, Arc<str>, u64)> = BinaryHeap::with_capacity(k + 1);
        for entry in self.by_key.iter() {
            let stamp = entry.last_access.load(Ordering::Relaxed);
            heap.push((stamp, Arc::clone(&entry.key), entry.hash));
            if heap.len() > k {
                heap.pop();
            }
        }
        let evicted = heap.len();
        for (_, key, hash) in heap.into_iter() {
            self.by_key.remove(&key);
            // Only clear the primary slot if it points at this entry
            if let Some(primary) = self.by_hash.get(&hash) {
                if primary.key == key {
                    drop(primary);
                    self.by_hash.remove(&hash);
                }
            }
        }
        debug!("plan cache evicted {evicted} of {len} entries");
    }

    /// Hash the canonical rendering without materializing it
    fn structural_hash(&self, plan: &LogicalPlan) -> u64 {
        struct HashWriter<H>(H);
        impl<H: Hasher> std::fmt::Write for HashWriter<H> {
            fn write_str(&mut self, s: &str) -> std::fmt::Result {
                self.0.write(s.as_bytes());
                Ok(())
            }
        }
        let mut writer = HashWriter(self.random_state.build_hasher());
        // Writing through the formatter cannot fail
        let _ = write!(writer, "{}", plan.display_indent());
        writer.0.finish()
    }
}

/// The canonical deterministic key of a plan
pub(crate) fn structural_key(plan: &LogicalPlan) -> String {
    plan.display_indent().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::query::flatten;
    use crate::plan::LogicalPlanBuilder;
    use crate::predicate::tests::int32_cmp;
    use crate::predicate::CompareOp;
    use crate::table::tests::test_table;
    use crate::table::Table;

    fn compiled(table: &Table, plan: &LogicalPlan) -> Arc<QueryPlan> {
        Arc::new(flatten(plan, table).unwrap())
    }

    fn plan_with_value(table: &Table, value: i32) -> LogicalPlan {
        LogicalPlanBuilder::scan(table)
            .filter(int32_cmp(table, "a", CompareOp::Gt, value))
            .build()
    }

    #[test]
    fn hit_after_insert() {
        let table = test_table();
        let cache = PlanCache::new(true, 16);
        let plan = plan_with_value(&table, 1);
        assert!(cache.get(&plan).is_none());
        cache.put(&plan, compiled(&table, &plan));
        let hit = cache.get(&plan).expect("cached plan");
        assert_eq!(*hit, *compiled(&table, &plan));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn different_constants_are_different_plans() {
        let table = test_table();
        let cache = PlanCache::new(true, 16);
        let plan1 = plan_with_value(&table, 1);
        let plan2 = plan_with_value(&table, 2);
        cache.put(&plan1, compiled(&table, &plan1));
        assert!(cache.get(&plan2).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn disabled_cache_is_a_no_op() {
        let table = test_table();
        let cache = PlanCache::new(false, 16);
        let plan = plan_with_value(&table, 1);
        cache.put(&plan, compiled(&table, &plan));
        assert!(cache.get(&plan).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 0 });
    }

    #[test]
    fn eviction_removes_oldest_quarter() {
        let table = test_table();
        let cache = PlanCache::new(true, 8);
        let plans: Vec<LogicalPlan> =
            (0..9).map(|v| plan_with_value(&table, v)).collect();
        for plan in &plans[..8] {
            cache.put(plan, compiled(&table, plan));
        }
        // Touch the early plans so the untouched middle ones age out
        for plan in &plans[..4] {
            assert!(cache.get(plan).is_some());
        }
        cache.put(&plans[8], compiled(&table, &plans[8]));
        assert!(cache.len() <= 8);
        // Recently touched plans survived
        for plan in &plans[..4] {
            assert!(cache.get(plan).is_some(), "touched plan evicted");
        }
    }

    #[test]
    fn clear_empties_both_tiers() {
        let table = test_table();
        let cache = PlanCache::new(true, 8);
        let plan = plan_with_value(&table, 1);
        cache.put(&plan, compiled(&table, &plan));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&plan).is_none());
    }
}
