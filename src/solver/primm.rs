//! The PR-IMM path: PRR sketches sampled into a [`PrrCollection`] under a
//! static or doubling sample schedule, then selected greedily.

use std::time::Instant;

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    cache::EdgeStateCache,
    collection::PrrCollection,
    errors::ConfigError,
    graph::{Graph, SeedSet},
    prelude::CoreConfig,
    sketch::{GainMode, PrrScratch},
    solver::{alpha_beta, pool, worker_seed, SampleSchedule, SelectionRound},
};

#[derive(Debug, Clone)]
pub struct PrImmParams {
    pub k: usize,
    pub schedule: SampleSchedule,
    /// Hard cap on the number of sampled sketches; reaching it is logged,
    /// not fatal.
    pub sample_cap: usize,
    pub nb_threads: usize,
    pub seed: u64,
}

pub struct PrImmSolver<'a> {
    graph: &'a Graph,
    seeds: &'a SeedSet,
    config: CoreConfig,
    params: PrImmParams,
    mode: GainMode,
    collection: PrrCollection,
    /// Pool launches so far; decorrelates worker RNG streams across
    /// incremental extensions.
    launches: u64,
}

/// Everything a sampling worker owns.
struct PrWorker<'a> {
    rng: SmallRng,
    cache: EdgeStateCache,
    scratch: PrrScratch,
    partial: PrrCollection,
    graph: &'a Graph,
}

impl<'a> PrImmSolver<'a> {
    pub fn new(
        graph: &'a Graph,
        seeds: &'a SeedSet,
        config: CoreConfig,
        params: PrImmParams,
    ) -> Result<Self, ConfigError> {
        if params.k == 0 {
            return Err(ConfigError::ZeroBudget);
        }
        params.schedule.validate()?;
        let mode = if config.priority.is_submodular() {
            GainMode::Fast
        } else {
            GainMode::Slow
        };
        let collection = PrrCollection::new(graph.nb_nodes(), config, seeds);
        Ok(PrImmSolver { graph, seeds, config, params, mode, collection, launches: 0 })
    }

    /// Runs the configured schedule to completion, one result row per
    /// selection round.
    pub fn run(&mut self) -> Vec<SelectionRound> {
        match self.params.schedule.clone() {
            SampleSchedule::Static(totals) => {
                totals
                    .into_iter()
                    .map(|total| {
                        self.extend_to(total);
                        self.round()
                    })
                    .collect()
            }
            SampleSchedule::Dynamic { epsilon, ell } => vec![self.run_dynamic(epsilon, ell)],
        }
    }

    pub fn collection(&self) -> &PrrCollection {
        &self.collection
    }

    /// Selects the budgeted boost set from the current samples.
    pub fn round(&mut self) -> SelectionRound {
        let start = Instant::now();
        let mut boost = vec![];
        let sum = self.collection.select(self.params.k, &mut boost);
        SelectionRound {
            nb_samples: self.collection.nb_sampled(),
            boost,
            estimate: self.scale(sum),
            elapsed: start.elapsed(),
            footprint: self.collection.footprint(),
        }
    }

    /// The collection reports sums over sketches; the objective estimate
    /// scales them back to node counts.
    fn scale(&self, sum: f64) -> f64 {
        let sampled = self.collection.nb_sampled();
        if sampled == 0 {
            0.0
        } else {
            sum * self.graph.nb_nodes() as f64 / sampled as f64
        }
    }

    /// Samples in parallel until the collection holds `total` sketches
    /// (clamped by the cap).
    fn extend_to(&mut self, total: usize) {
        let cap = self.params.sample_cap;
        let total = if total > cap {
            log::warn!(
                "sample cap reached: {} sketches requested, capping at {}",
                total,
                cap
            );
            cap
        } else {
            total
        };
        let have = self.collection.nb_sampled();
        if total <= have {
            return;
        }
        self.launches += 1;

        let graph = self.graph;
        let seeds = self.seeds;
        let config = self.config;
        let mode = self.mode;
        let root = self.params.seed;
        let launch = self.launches;
        let n = graph.nb_nodes() as u32;

        let partials = pool::run(
            self.params.nb_threads,
            0..(total - have),
            |worker| PrWorker {
                rng: SmallRng::seed_from_u64(worker_seed(root, launch, worker)),
                cache: EdgeStateCache::new(graph.nb_edges()),
                scratch: PrrScratch::new(),
                partial: PrrCollection::new(graph.nb_nodes(), config, seeds),
                graph,
            },
            |w, _serial| {
                let center = w.rng.gen_range(0..n);
                w.scratch.sample(w.graph, &config, seeds, &mut w.cache, &mut w.rng, center, mode);
                w.partial.add(&w.scratch);
            },
        );
        for w in partials {
            self.collection.merge(w.partial);
        }
    }

    /// The doubling controller: double the sample count up to log2 |V|
    /// times, stopping as soon as the running estimate clears the
    /// concentration test, then top up to the final sample size the
    /// surviving lower bound implies.
    fn run_dynamic(&mut self, epsilon: f64, ell: f64) -> SelectionRound {
        let n = self.graph.nb_nodes();
        let k = self.params.k;
        let (alpha, beta) = alpha_beta(n, k, ell);
        let eps2 = std::f64::consts::SQRT_2 * epsilon;
        let unit = (alpha + beta).powi(2);

        let mut theta = 2.0 * unit / (epsilon * epsilon);
        let mut lb = 1.0;
        let rounds = (n.max(2) as f64).log2().floor() as i32;
        let mut boost = vec![];
        for i in 1..=rounds {
            theta *= 2.0;
            self.extend_to(theta.ceil() as usize);
            let sum = self.collection.select(k, &mut boost);
            let s = sum / self.collection.nb_sampled() as f64;
            lb = (s * n as f64 / (1.0 + eps2)).max(1.0);
            if s >= (1.0 + eps2) / 2f64.powi(i) {
                break;
            }
            if self.collection.nb_sampled() >= self.params.sample_cap {
                break;
            }
        }

        let theta_star = 2.0 * n as f64 * unit / (lb * epsilon * epsilon);
        self.extend_to(theta_star.ceil() as usize);
        self.round()
    }
}
