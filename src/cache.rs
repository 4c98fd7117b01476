//! Lazily refreshed cache of sampled edge states.
//!
//! Every sketch or simulation trial needs one independent draw per edge it
//! touches. Instead of clearing O(|E|) memory between trials, each slot
//! remembers the epoch it was drawn in; `refresh` just bumps the global
//! epoch and a stale read re-draws on the spot. Caches are thread-private,
//! one per worker, and are never shared.

use rand::{rngs::SmallRng, Rng};

use crate::{graph::Edge, prelude::EdgeState};

#[derive(Debug, Clone)]
pub struct EdgeStateCache {
    epoch: u32,
    epochs: Vec<u32>,
    states: Vec<EdgeState>,
}

impl EdgeStateCache {
    pub fn new(nb_edges: usize) -> Self {
        EdgeStateCache {
            epoch: 1,
            epochs: vec![0; nb_edges],
            states: vec![EdgeState::Unsampled; nb_edges],
        }
    }

    /// The sampled state of the given edge in the current epoch, drawing it
    /// now if the stored one is stale. After this returns, the slot's epoch
    /// equals the current epoch.
    #[inline]
    pub fn get(&mut self, id: u32, edge: &Edge, rng: &mut SmallRng) -> EdgeState {
        let i = id as usize;
        if self.epochs[i] != self.epoch {
            let u: f64 = rng.gen();
            self.states[i] = if u < edge.p {
                EdgeState::Active
            } else if u < edge.p_boost {
                EdgeState::Boosted
            } else {
                EdgeState::Blocked
            };
            self.epochs[i] = self.epoch;
        }
        self.states[i]
    }

    /// Invalidates every cached state in O(1).
    pub fn refresh(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if self.epoch == 0 {
            // epoch counter wrapped: old stamps would look fresh again
            self.epochs.iter_mut().for_each(|e| *e = 0);
            self.epoch = 1;
        }
    }

    /// Reallocates for a graph with `nb_edges` edges and restarts at epoch 1.
    pub fn reset(&mut self, nb_edges: usize) {
        self.epoch = 1;
        self.epochs.clear();
        self.epochs.resize(nb_edges, 0);
        self.states.clear();
        self.states.resize(nb_edges, EdgeState::Unsampled);
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// The epoch the given slot was last drawn in (0 = never).
    pub fn stored_epoch(&self, id: u32) -> u32 {
        self.epochs[id as usize]
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn edge(p: f64, p_boost: f64) -> Edge {
        Edge { u: 0, v: 1, p, p_boost }
    }

    #[test]
    fn refresh_only_invalidates_lazily() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut cache = EdgeStateCache::new(3);
        let e = edge(0.5, 0.8);

        for id in 0..3 {
            cache.get(id, &e, &mut rng);
            assert_eq!(1, cache.stored_epoch(id));
        }

        cache.refresh();
        assert_eq!(2, cache.epoch());
        cache.get(0, &e, &mut rng);
        assert_eq!(2, cache.stored_epoch(0));
        // untouched slots keep their old stamp until read again
        assert_eq!(1, cache.stored_epoch(1));
        assert_eq!(1, cache.stored_epoch(2));
    }

    #[test]
    fn reads_within_an_epoch_are_stable() {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut cache = EdgeStateCache::new(1);
        let e = edge(0.5, 0.7);
        let first = cache.get(0, &e, &mut rng);
        for _ in 0..20 {
            assert_eq!(first, cache.get(0, &e, &mut rng));
        }
    }

    #[test]
    fn degenerate_probabilities_are_deterministic() {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut cache = EdgeStateCache::new(2);
        for _ in 0..50 {
            cache.refresh();
            assert_eq!(EdgeState::Active, cache.get(0, &edge(1.0, 1.0), &mut rng));
            assert_eq!(EdgeState::Boosted, cache.get(1, &edge(0.0, 1.0), &mut rng));
        }
    }

    #[test]
    fn empirical_state_frequencies_match_probabilities() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut cache = EdgeStateCache::new(1);
        let e = edge(0.3, 0.8);
        let trials = 20_000;
        let (mut active, mut boosted, mut blocked) = (0u32, 0u32, 0u32);
        for _ in 0..trials {
            cache.refresh();
            match cache.get(0, &e, &mut rng) {
                EdgeState::Active => active += 1,
                EdgeState::Boosted => boosted += 1,
                EdgeState::Blocked => blocked += 1,
                EdgeState::Unsampled => unreachable!(),
            }
        }
        let f = |c: u32| c as f64 / trials as f64;
        assert!((f(active) - 0.3).abs() < 0.02);
        assert!((f(boosted) - 0.5).abs() < 0.02);
        assert!((f(blocked) - 0.2).abs() < 0.02);
    }

    #[test]
    fn reset_restarts_epochs() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut cache = EdgeStateCache::new(2);
        let e = edge(0.5, 0.5);
        cache.get(0, &e, &mut rng);
        cache.refresh();
        cache.reset(5);
        assert_eq!(1, cache.epoch());
        assert_eq!(0, cache.stored_epoch(4));
    }
}
