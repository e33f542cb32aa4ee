//! Replica Selector
//!
//! Orders a replica set for one attempt:
//!
//! 1. Uniformly random permutation. Sets of up to six use a precomputed
//!    permutation table and a single random draw; larger sets are shuffled.
//! 2. Each endpoint is classified: present in the request's failure set
//!    means `Unhealthy`, otherwise its own self-healing state.
//! 3. Stable bucketing by class, preserving the random order inside each
//!    bucket. Nothing is dropped.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::endpoint::ReplicaEndpoint;
use super::failure_set::RequestFailureSet;
use super::health::ReplicaHealthState;

/// Largest set size served from the permutation table.
const TABLE_MAX: usize = 6;

/// `PERMUTATIONS[n]` lists every permutation of `0..n`.
fn permutation_table() -> &'static [Vec<Vec<u8>>] {
    static TABLE: OnceLock<Vec<Vec<Vec<u8>>>> = OnceLock::new();
    TABLE.get_or_init(|| (0..=TABLE_MAX).map(|n| permutations(n as u8)).collect())
}

fn permutations(n: u8) -> Vec<Vec<u8>> {
    if n == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for shorter in permutations(n - 1) {
        for position in 0..=shorter.len() {
            let mut p = shorter.clone();
            p.insert(position, n - 1);
            out.push(p);
        }
    }
    out
}

/// Health-aware replica ordering with an owned, seedable generator.
#[derive(Debug)]
pub struct ReplicaSelector {
    rng: Mutex<StdRng>,
    grace_period: Duration,
}

impl ReplicaSelector {
    /// `seed` makes orderings reproducible; `None` seeds from entropy.
    pub fn new(seed: Option<u64>, grace_period: Duration) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
            grace_period,
        }
    }

    /// Health used for ordering this endpoint in this request.
    pub fn classify(
        &self,
        endpoint: &ReplicaEndpoint,
        failed: Option<&RequestFailureSet>,
    ) -> ReplicaHealthState {
        if failed.map(|f| f.contains(endpoint.uri())).unwrap_or(false) {
            return ReplicaHealthState::Unhealthy;
        }
        endpoint.effective_health(self.grace_period)
    }

    /// Order `replicas` best-first. `None` is an empty failure set.
    pub fn select(
        &self,
        replicas: &[Arc<ReplicaEndpoint>],
        failed: Option<&RequestFailureSet>,
        validation_enabled: bool,
    ) -> Vec<Arc<ReplicaEndpoint>> {
        if replicas.is_empty() {
            return Vec::new();
        }

        let shuffled = self.permute(replicas);

        let bucket_count = if validation_enabled { 4 } else { 2 };
        let mut buckets: Vec<Vec<Arc<ReplicaEndpoint>>> = vec![Vec::new(); bucket_count];
        for endpoint in shuffled {
            let state = self.classify(&endpoint, failed);
            let bucket = if validation_enabled {
                state.validated_bucket()
            } else {
                state.coarse_bucket()
            };
            buckets[bucket].push(endpoint);
        }

        buckets.into_iter().flatten().collect()
    }

    fn permute(&self, replicas: &[Arc<ReplicaEndpoint>]) -> Vec<Arc<ReplicaEndpoint>> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());

        if replicas.len() <= TABLE_MAX {
            let table = &permutation_table()[replicas.len()];
            let order = &table[rng.gen_range(0..table.len())];
            return order
                .iter()
                .map(|&i| Arc::clone(&replicas[i as usize]))
                .collect();
        }

        let mut shuffled = replicas.to_vec();
        shuffled.shuffle(&mut *rng);
        shuffled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn endpoints(n: usize) -> Vec<Arc<ReplicaEndpoint>> {
        (0..n)
            .map(|i| Arc::new(ReplicaEndpoint::new(format!("rntbd://r{}:1", i))))
            .collect()
    }

    fn uris(list: &[Arc<ReplicaEndpoint>]) -> Vec<String> {
        list.iter().map(|e| e.uri().to_string()).collect()
    }

    #[test]
    fn test_permutation_table_sizes() {
        let table = permutation_table();
        let factorials = [1, 1, 2, 6, 24, 120, 720];
        for n in 0..=TABLE_MAX {
            assert_eq!(table[n].len(), factorials[n]);
            let distinct: HashSet<&Vec<u8>> = table[n].iter().collect();
            assert_eq!(distinct.len(), factorials[n]);
        }
    }

    #[test]
    fn test_empty_input() {
        let selector = ReplicaSelector::new(Some(1), Duration::from_secs(60));
        assert!(selector.select(&[], None, true).is_empty());
    }

    #[test]
    fn test_output_is_permutation() {
        let selector = ReplicaSelector::new(Some(7), Duration::from_secs(60));
        for n in [1, 3, 6, 7, 12] {
            let replicas = endpoints(n);
            let mut failed = RequestFailureSet::new();
            failed.insert(replicas[0].uri());
            let ordered = selector.select(&replicas, Some(&failed), false);
            let mut got = uris(&ordered);
            let mut want = uris(&replicas);
            got.sort();
            want.sort();
            assert_eq!(got, want);
        }
    }

    #[test]
    fn test_failed_replicas_go_last() {
        let selector = ReplicaSelector::new(Some(42), Duration::from_secs(60));
        let replicas = endpoints(5);
        let mut failed = RequestFailureSet::new();
        failed.insert(replicas[1].uri());
        failed.insert(replicas[3].uri());

        for _ in 0..50 {
            let ordered = selector.select(&replicas, Some(&failed), false);
            let tail: HashSet<String> = uris(&ordered[3..]).into_iter().collect();
            assert!(tail.contains(replicas[1].uri()));
            assert!(tail.contains(replicas[3].uri()));
        }
    }

    #[test]
    fn test_validation_uses_four_buckets() {
        let selector = ReplicaSelector::new(Some(3), Duration::from_secs(60));
        let replicas = endpoints(4);
        replicas[0].set_unhealthy();
        replicas[1].set_unhealthy_pending();
        replicas[2].set_connected();
        // replicas[3] stays Unknown.

        let ordered = selector.select(&replicas, None, true);
        assert_eq!(
            uris(&ordered),
            vec![
                replicas[2].uri().to_string(),
                replicas[3].uri().to_string(),
                replicas[1].uri().to_string(),
                replicas[0].uri().to_string(),
            ]
        );

        let coarse = selector.select(&replicas, None, false);
        assert_eq!(coarse[3].uri(), replicas[0].uri());
    }

    #[test]
    fn test_seeded_selectors_agree() {
        let replicas = endpoints(6);
        let a = ReplicaSelector::new(Some(99), Duration::from_secs(60));
        let b = ReplicaSelector::new(Some(99), Duration::from_secs(60));
        for _ in 0..10 {
            assert_eq!(
                uris(&a.select(&replicas, None, false)),
                uris(&b.select(&replicas, None, false))
            );
        }
    }

    #[test]
    fn test_order_varies_between_calls() {
        let selector = ReplicaSelector::new(Some(5), Duration::from_secs(60));
        let replicas = endpoints(5);
        let firsts: HashSet<String> = (0..100)
            .map(|_| selector.select(&replicas, None, false)[0].uri().to_string())
            .collect();
        assert!(firsts.len() > 1);
    }
}
