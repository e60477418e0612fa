//! Eviction policy: decides which entries leave a tier under pressure.
//!
//! Each tier uses one policy:
//! - L1 `Popularity`: fewest hits first, then oldest
//! - L2 `WeightedLru`: lowest `hit_count / age` first, then oldest
//! - L3 `Oldest`: strict creation order (hit counts are not persisted)

use std::collections::BinaryHeap;
use std::time::Duration;

/// Floor for entry age so brand-new entries do not divide by zero.
const MIN_AGE_SECS: f64 = 0.001;

/// How a tier ranks its entries for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Popularity,
    WeightedLru,
    Oldest,
}

/// What the evictor needs to know about a resident entry.
#[derive(Debug, Clone, Copy)]
pub struct CandidateInfo<'a> {
    pub key: &'a str,
    pub hit_count: u64,
    pub age: Duration,
    pub size_bytes: usize,
}

/// An eviction candidate with its computed priority score.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub key: String,
    pub score: f64,
    pub age: Duration,
    pub size_bytes: usize,
}

// Higher score = evicted first; equal scores evict the older entry first.
impl PartialEq for EvictionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for EvictionCandidate {}

impl PartialOrd for EvictionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EvictionCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| self.age.cmp(&other.age))
    }
}

/// The eviction policy engine.
#[derive(Debug, Clone)]
pub struct Evictor {
    policy: EvictionPolicy,

    /// Fraction of resident entries a single call may evict; `None` = unbounded.
    batch_fraction: Option<f64>,
}

impl Evictor {
    pub fn new(policy: EvictionPolicy, batch_fraction: Option<f64>) -> Self {
        Self {
            policy,
            batch_fraction,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Compute eviction priority for a single entry.
    ///
    /// ```text
    /// Popularity:  -hit_count
    /// WeightedLru: -(hit_count / age_secs)
    /// Oldest:       0   (ordering falls through to age)
    /// ```
    pub fn compute_priority(&self, candidate: &CandidateInfo<'_>) -> f64 {
        match self.policy {
            EvictionPolicy::Popularity => -(candidate.hit_count as f64),
            EvictionPolicy::WeightedLru => {
                let age = candidate.age.as_secs_f64().max(MIN_AGE_SECS);
                -(candidate.hit_count as f64 / age)
            }
            EvictionPolicy::Oldest => 0.0,
        }
    }

    /// Maximum victims a single call may take from a tier holding `resident` entries.
    pub fn batch_limit(&self, resident: usize) -> usize {
        match self.batch_fraction {
            Some(fraction) => ((resident as f64 * fraction).floor() as usize).max(1),
            None => resident,
        }
    }

    /// Select entries to evict until at least `needed_bytes` are freed and
    /// `needed_slots` entries removed, or the batch limit is reached.
    ///
    /// Returns candidates ordered by eviction priority (highest first). The caller
    /// decides whether the freed space suffices.
    pub fn select_victims<'a>(
        &self,
        candidates: impl Iterator<Item = CandidateInfo<'a>>,
        needed_bytes: usize,
        needed_slots: usize,
    ) -> Vec<EvictionCandidate> {
        let mut heap = BinaryHeap::new();
        for candidate in candidates {
            let score = self.compute_priority(&candidate);
            heap.push(EvictionCandidate {
                key: candidate.key.to_string(),
                score,
                age: candidate.age,
                size_bytes: candidate.size_bytes,
            });
        }

        let limit = self.batch_limit(heap.len());
        let mut victims = Vec::new();
        let mut freed = 0usize;
        while victims.len() < limit && (freed < needed_bytes || victims.len() < needed_slots) {
            match heap.pop() {
                Some(candidate) => {
                    freed += candidate.size_bytes;
                    victims.push(candidate);
                }
                None => break,
            }
        }

        victims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(key: &str, hit_count: u64, age_ms: u64, size: usize) -> CandidateInfo<'_> {
        CandidateInfo {
            key,
            hit_count,
            age: Duration::from_millis(age_ms),
            size_bytes: size,
        }
    }

    #[test]
    fn test_popularity_prefers_low_hits_then_oldest() {
        let evictor = Evictor::new(EvictionPolicy::Popularity, None);
        let entries = [
            info("popular", 10, 5_000, 10),
            info("young", 1, 100, 10),
            info("old", 1, 4_000, 10),
        ];

        let victims = evictor.select_victims(entries.iter().copied(), 0, 2);
        let keys: Vec<_> = victims.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(keys, ["old", "young"]);
    }

    #[test]
    fn test_weighted_lru_prefers_stale_popularity() {
        let evictor = Evictor::new(EvictionPolicy::WeightedLru, None);
        let entries = [
            // 10 hits over 100 s = 0.1/s
            info("once-popular", 10, 100_000, 10),
            // 5 hits over 1 s = 5/s
            info("recently-busy", 5, 1_000, 10),
        ];

        let victims = evictor.select_victims(entries.iter().copied(), 0, 1);
        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].key, "once-popular");
    }

    #[test]
    fn test_oldest_ignores_hits() {
        let evictor = Evictor::new(EvictionPolicy::Oldest, None);
        let entries = [info("new", 0, 10, 10), info("old-but-hot", 1_000, 9_000, 10)];

        let victims = evictor.select_victims(entries.iter().copied(), 0, 1);
        assert_eq!(victims[0].key, "old-but-hot");
    }

    #[test]
    fn test_stops_once_bytes_freed() {
        let evictor = Evictor::new(EvictionPolicy::Oldest, None);
        let entries = [
            info("a", 0, 300, 100),
            info("b", 0, 200, 100),
            info("c", 0, 100, 100),
        ];

        let victims = evictor.select_victims(entries.iter().copied(), 150, 0);
        assert_eq!(victims.len(), 2);
    }

    #[test]
    fn test_batch_cap() {
        let evictor = Evictor::new(EvictionPolicy::Popularity, Some(0.10));
        assert_eq!(evictor.batch_limit(3), 1);
        assert_eq!(evictor.batch_limit(100), 10);

        let keys: Vec<String> = (0..20).map(|i| format!("k{i}")).collect();
        let entries: Vec<_> = keys.iter().map(|k| info(k, 0, 10, 100)).collect();
        let victims = evictor.select_victims(entries.iter().copied(), 10_000, 0);
        assert_eq!(victims.len(), 2);
    }

    #[test]
    fn test_empty_returns_nothing() {
        let evictor = Evictor::new(EvictionPolicy::WeightedLru, Some(0.1));
        let victims = evictor.select_victims(std::iter::empty(), 100, 1);
        assert!(victims.is_empty());
    }
}
