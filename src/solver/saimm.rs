//! The SA-IMM path: per-center lower-bound sampling into an
//! [`SaCollection`], selected greedily (SA-IMM) or random-greedily
//! (SA-RG-IMM, for the non-monotone case).

use std::time::Instant;

use bitset_fixed::BitSet;
use rand::{rngs::SmallRng, SeedableRng};

use crate::{
    cache::EdgeStateCache,
    collection::SaCollection,
    errors::ConfigError,
    graph::{Graph, SeedSet},
    prelude::{CoreConfig, SelectionMode},
    sketch::{GainMode, PrrScratch},
    solver::{pool, worker_seed, SampleSchedule, SelectionRound},
};

#[derive(Debug, Clone)]
pub struct SaImmParams {
    pub k: usize,
    pub mode: SelectionMode,
    /// Totals are per-center draw counts.
    pub schedule: SampleSchedule,
    /// Minimum average gain for a (center, boost) record to count.
    pub threshold: f64,
    /// Restrict candidate centers to nodes within this hop distance of the
    /// seed set (structural, ignoring probabilities).
    pub dist_limit: Option<u32>,
    /// Hard cap on per-center draws; reaching it is logged, not fatal.
    pub sample_cap: usize,
    pub nb_threads: usize,
    pub seed: u64,
}

pub struct SaImmSolver<'a> {
    graph: &'a Graph,
    seeds: &'a SeedSet,
    config: CoreConfig,
    params: SaImmParams,
    mode: GainMode,
    collection: SaCollection,
    centers: Vec<u32>,
    /// Drives the random-greedy draws; advances across rounds.
    select_rng: SmallRng,
    launches: u64,
}

/// Everything a sampling worker owns. The dense gain buffer plus its
/// touched list turn one center's batch of draws into the sparse records
/// the collection stores.
struct SaWorker<'a> {
    rng: SmallRng,
    cache: EdgeStateCache,
    scratch: PrrScratch,
    totals: Vec<f64>,
    seen: Vec<bool>,
    touched: Vec<u32>,
    partial: SaCollection,
    graph: &'a Graph,
}

impl<'a> SaImmSolver<'a> {
    pub fn new(
        graph: &'a Graph,
        seeds: &'a SeedSet,
        config: CoreConfig,
        params: SaImmParams,
    ) -> Result<Self, ConfigError> {
        if params.k == 0 {
            return Err(ConfigError::ZeroBudget);
        }
        if !(0.0..=1.0).contains(&params.threshold) {
            return Err(ConfigError::ThresholdOutOfRange(params.threshold));
        }
        params.schedule.validate()?;
        let mode = if config.priority.is_submodular() {
            GainMode::Fast
        } else {
            GainMode::Slow
        };
        let collection = SaCollection::new(graph.nb_nodes(), params.threshold, seeds);
        let centers = candidate_centers(graph, seeds, params.dist_limit);
        let select_rng = SmallRng::seed_from_u64(worker_seed(params.seed, u64::MAX, 0));
        Ok(SaImmSolver {
            graph,
            seeds,
            config,
            params,
            mode,
            collection,
            centers,
            select_rng,
            launches: 0,
        })
    }

    /// The candidate centers after distance filtering.
    pub fn centers(&self) -> &[u32] {
        &self.centers
    }

    pub fn collection(&self) -> &SaCollection {
        &self.collection
    }

    /// Runs the configured schedule to completion, one result row per
    /// selection round.
    pub fn run(&mut self) -> Vec<SelectionRound> {
        match self.params.schedule.clone() {
            SampleSchedule::Static(totals) => {
                totals
                    .into_iter()
                    .map(|per_center| {
                        self.extend_to(per_center);
                        self.round(per_center)
                    })
                    .collect()
            }
            SampleSchedule::Dynamic { epsilon, ell } => {
                // additive-epsilon Chernoff count for each per-center average
                let n = self.graph.nb_nodes().max(2) as f64;
                let per_center = ((2.0 + 2.0 / 3.0 * epsilon) * (ell * n.ln() + 2f64.ln())
                    / (epsilon * epsilon))
                    .ceil() as usize;
                self.extend_to(per_center);
                vec![self.round(per_center)]
            }
        }
    }

    fn round(&mut self, per_center: usize) -> SelectionRound {
        let start = Instant::now();
        let mut boost = vec![];
        let sum =
            self.collection.select(self.params.k, self.params.mode, &mut self.select_rng, &mut boost);
        SelectionRound {
            nb_samples: per_center.min(self.params.sample_cap),
            boost,
            estimate: sum,
            elapsed: start.elapsed(),
            footprint: self.collection.footprint(),
        }
    }

    /// Tops every candidate center up to `per_center` draws, in parallel
    /// over centers.
    fn extend_to(&mut self, per_center: usize) {
        let cap = self.params.sample_cap;
        let per_center = if per_center > cap {
            log::warn!(
                "per-center sample cap reached: {} draws requested, capping at {}",
                per_center,
                cap
            );
            cap
        } else {
            per_center
        };

        let items: Vec<(u32, u32)> = self
            .centers
            .iter()
            .map(|&c| (c, per_center.saturating_sub(self.collection.samples_at(c) as usize) as u32))
            .filter(|&(_, missing)| missing > 0)
            .collect();
        if items.is_empty() {
            return;
        }
        self.launches += 1;

        let graph = self.graph;
        let seeds = self.seeds;
        let config = self.config;
        let mode = self.mode;
        let threshold = self.params.threshold;
        let root = self.params.seed;
        let launch = self.launches;

        let partials = pool::run(
            self.params.nb_threads,
            items.into_iter(),
            |worker| SaWorker {
                rng: SmallRng::seed_from_u64(worker_seed(root, launch, worker)),
                cache: EdgeStateCache::new(graph.nb_edges()),
                scratch: PrrScratch::new(),
                totals: vec![0.0; graph.nb_nodes()],
                seen: vec![false; graph.nb_nodes()],
                touched: vec![],
                partial: SaCollection::new(graph.nb_nodes(), threshold, seeds),
                graph,
            },
            |w, (center, missing)| {
                for _ in 0..missing {
                    w.scratch.sample(
                        w.graph,
                        &config,
                        seeds,
                        &mut w.cache,
                        &mut w.rng,
                        center,
                        mode,
                    );
                    let base = config.gains.gain(w.scratch.center_state());
                    for (v, to) in w.scratch.members() {
                        if seeds.is_seed(v) {
                            continue;
                        }
                        let delta = config.gains.gain(to) - base;
                        if delta != 0.0 {
                            if !w.seen[v as usize] {
                                w.seen[v as usize] = true;
                                w.touched.push(v);
                            }
                            w.totals[v as usize] += delta;
                        }
                    }
                }
                let mut records = Vec::with_capacity(w.touched.len());
                for &v in &w.touched {
                    records.push((v, w.totals[v as usize]));
                    w.totals[v as usize] = 0.0;
                    w.seen[v as usize] = false;
                }
                w.touched.clear();
                w.partial.add(center, missing, &records);
            },
        );
        for w in partials {
            self.collection.merge(w.partial);
        }
    }
}

/// All non-seed nodes, optionally restricted to the ones within
/// `dist_limit` forward hops of either seed set (edge probabilities are
/// ignored for this reachability pass).
fn candidate_centers(graph: &Graph, seeds: &SeedSet, dist_limit: Option<u32>) -> Vec<u32> {
    let n = graph.nb_nodes();
    match dist_limit {
        None => (0..n as u32).filter(|&v| !seeds.is_seed(v)).collect(),
        Some(limit) => {
            let mut reached = BitSet::new(n.max(1));
            let mut queue = std::collections::VecDeque::new();
            for &s in seeds.sa().iter().chain(seeds.sr()) {
                reached.set(s as usize, true);
                queue.push_back((s, 0u32));
            }
            let mut keep = vec![];
            while let Some((u, d)) = queue.pop_front() {
                if !seeds.is_seed(u) {
                    keep.push(u);
                }
                if d == limit {
                    continue;
                }
                for a in graph.out_edges(u) {
                    if !reached[a.node as usize] {
                        reached.set(a.node as usize, true);
                        queue.push_back((a.node, d + 1));
                    }
                }
            }
            keep.sort_unstable();
            keep
        }
    }
}
