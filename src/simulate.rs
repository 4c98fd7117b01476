//! The forward-simulation evaluator: runs the propagator many times with
//! and without a boost set and reports averaged per-state counts and gains.
//!
//! Trials are distributed over the worker pool; each worker owns an
//! independent edge-state cache and RNG, so per-trial draws are
//! independent. The with/without comparison reuses the same root seed,
//! which makes the no-boost baseline identical across calls.

use rand::{rngs::SmallRng, SeedableRng};

use crate::{
    cache::EdgeStateCache,
    graph::{Graph, SeedSet},
    prelude::{CoreConfig, NodeState},
    propagate::{propagate, NodeTable},
    solver::{pool, worker_seed},
};

/// Averages over one batch of simulation trials.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationStats {
    pub trials: usize,
    /// Average node count per state, indexed by [`NodeState::idx`].
    pub counts: [f64; 5],
    pub total_gain: f64,
    pub positive_gain: f64,
    pub negative_gain: f64,
}

impl SimulationStats {
    pub fn count(&self, s: NodeState) -> f64 {
        self.counts[s.idx()]
    }

    fn from_sums(config: &CoreConfig, n: usize, trials: usize, sums: [f64; 5]) -> Self {
        let mut counts = [0.0; 5];
        let mut reached = 0.0;
        for (i, s) in sums.iter().enumerate() {
            counts[i] = s / trials.max(1) as f64;
            reached += counts[i];
        }
        counts[NodeState::None.idx()] = n as f64 - reached;
        let positive_gain =
            config.lambda * (counts[NodeState::CaPlus.idx()] + counts[NodeState::Ca.idx()]);
        let negative_gain = (config.lambda - 1.0) * counts[NodeState::Cr.idx()];
        SimulationStats {
            trials,
            counts,
            total_gain: positive_gain + negative_gain,
            positive_gain,
            negative_gain,
        }
    }

    fn diff(&self, other: &SimulationStats) -> SimulationStats {
        let mut counts = [0.0; 5];
        for i in 0..5 {
            counts[i] = self.counts[i] - other.counts[i];
        }
        SimulationStats {
            trials: self.trials,
            counts,
            total_gain: self.total_gain - other.total_gain,
            positive_gain: self.positive_gain - other.positive_gain,
            negative_gain: self.negative_gain - other.negative_gain,
        }
    }
}

/// A with/without comparison for one boost set.
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub with_boost: SimulationStats,
    pub without_boost: SimulationStats,
    pub diff: SimulationStats,
}

/// Averaged outcome of `trials` independent propagations with the given
/// boost set.
pub fn simulate_boosted(
    graph: &Graph,
    config: &CoreConfig,
    seeds: &SeedSet,
    boost: &[u32],
    trials: usize,
    nb_threads: usize,
    seed: u64,
) -> SimulationStats {
    struct Worker {
        cache: EdgeStateCache,
        table: NodeTable,
        sums: [f64; 5],
    }

    let partials = pool::run(
        nb_threads,
        0..trials,
        |_| Worker {
            cache: EdgeStateCache::new(graph.nb_edges()),
            table: NodeTable::new(graph.nb_nodes()),
            sums: [0.0; 5],
        },
        |w, trial| {
            // the draw depends on the trial index alone, not on which
            // worker happens to run it
            let mut rng = SmallRng::seed_from_u64(worker_seed(seed, trial as u64, 0));
            w.cache.refresh();
            propagate(graph, config, seeds, boost, &mut w.cache, &mut rng, &mut w.table);
            for &v in w.table.touched() {
                let state = w.table.state(v);
                if state != NodeState::None {
                    w.sums[state.idx()] += 1.0;
                }
            }
        },
    );

    let mut sums = [0.0; 5];
    for w in &partials {
        for i in 0..5 {
            sums[i] += w.sums[i];
        }
    }
    SimulationStats::from_sums(config, graph.nb_nodes(), trials, sums)
}

/// Evaluates a boost set against the empty baseline under the same root
/// seed.
pub fn simulate(
    graph: &Graph,
    config: &CoreConfig,
    seeds: &SeedSet,
    boost: &[u32],
    trials: usize,
    nb_threads: usize,
    seed: u64,
) -> SimulationOutcome {
    let with_boost = simulate_boosted(graph, config, seeds, boost, trials, nb_threads, seed);
    let without_boost = simulate_boosted(graph, config, seeds, &[], trials, nb_threads, seed);
    let diff = with_boost.diff(&without_boost);
    SimulationOutcome { with_boost, without_boost, diff }
}

/// Evaluates every prefix of `boost` whose length appears in `k_list`
/// (clamped to the available length). The no-boost baseline is computed
/// once and shared by every entry.
pub fn simulate_prefixes(
    graph: &Graph,
    config: &CoreConfig,
    seeds: &SeedSet,
    boost: &[u32],
    k_list: &[usize],
    trials: usize,
    nb_threads: usize,
    seed: u64,
) -> Vec<(usize, SimulationOutcome)> {
    let without_boost = simulate_boosted(graph, config, seeds, &[], trials, nb_threads, seed);
    k_list
        .iter()
        .map(|&k| {
            let k = k.min(boost.len());
            let with_boost =
                simulate_boosted(graph, config, seeds, &boost[..k], trials, nb_threads, seed);
            let diff = with_boost.diff(&without_boost);
            (k, SimulationOutcome { with_boost, without_boost: without_boost.clone(), diff })
        })
        .collect()
}
