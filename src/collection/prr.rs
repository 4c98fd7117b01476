//! The PR-IMM collection: an append-only store of compact sketches with a
//! per-node reverse index and a marginal-gain table.
//!
//! A sketch is compacted down to its center's no-boost outcome plus the
//! members whose single-node boost strictly improves it. `contrib[v]` lists
//! every sketch v improves, `total_gain[v]` keeps the summed marginals, and
//! the two are kept consistent by construction. Selection walks the index
//! greedily and rolls its sketch-state updates back through a change log,
//! so a collection can be selected from any number of times.

use ordered_float::OrderedFloat;

use crate::{
    graph::SeedSet,
    prelude::{CoreConfig, NodeState},
    sketch::PrrScratch,
};

#[derive(Debug, Clone)]
struct CompactSketch {
    center_state: NodeState,
    /// Members with a strictly positive marginal, as (node, outcome).
    members: Vec<(u32, NodeState)>,
}

#[derive(Debug, Clone, Copy)]
struct Contrib {
    sketch: u32,
    state_to: NodeState,
}

#[derive(Debug, Clone)]
pub struct PrrCollection {
    config: CoreConfig,
    seeds: SeedSet,
    sketches: Vec<CompactSketch>,
    /// The current center outcome per sketch; equal to the stored
    /// center_state between selections (select restores it on exit).
    cur_center: Vec<NodeState>,
    contrib: Vec<Vec<Contrib>>,
    total_gain: Vec<f64>,
    /// Number of sampled sketches, including the ones dropped because no
    /// single boost improves them. The estimator scales by |V| / sampled.
    sampled: usize,
}

impl PrrCollection {
    pub fn new(n: usize, config: CoreConfig, seeds: &SeedSet) -> Self {
        let mut total_gain = vec![0.0; n];
        for &s in seeds.sa() {
            total_gain[s as usize] = f64::NEG_INFINITY;
        }
        for &s in seeds.sr() {
            total_gain[s as usize] = f64::NEG_INFINITY;
        }
        PrrCollection {
            config,
            seeds: seeds.clone(),
            sketches: vec![],
            cur_center: vec![],
            contrib: vec![vec![]; n],
            total_gain,
            sampled: 0,
        }
    }

    /// Number of sketches sampled into this collection (dropped ones
    /// included); the denominator of the gain estimator.
    pub fn nb_sampled(&self) -> usize {
        self.sampled
    }

    /// Number of sketches actually stored.
    pub fn nb_sketches(&self) -> usize {
        self.sketches.len()
    }

    /// Compacts one freshly sampled sketch into the store.
    pub fn add(&mut self, sketch: &PrrScratch) {
        self.sampled += 1;
        let base = self.config.gains.gain(sketch.center_state());
        let id = self.sketches.len() as u32;
        let mut members = vec![];
        for (v, to) in sketch.members() {
            if self.seeds.is_seed(v) {
                continue;
            }
            let delta = self.config.gains.gain(to) - base;
            if delta > 0.0 {
                members.push((v, to));
                self.contrib[v as usize].push(Contrib { sketch: id, state_to: to });
                self.total_gain[v as usize] += delta;
            }
        }
        if !members.is_empty() {
            self.sketches.push(CompactSketch { center_state: sketch.center_state(), members });
            self.cur_center.push(sketch.center_state());
        }
    }

    /// Folds a worker's partial collection into this one, shifting sketch
    /// ids so the reverse index stays valid.
    pub fn merge(&mut self, other: PrrCollection) {
        let shift = self.sketches.len() as u32;
        self.sampled += other.sampled;
        self.sketches.extend(other.sketches);
        self.cur_center.extend(other.cur_center);
        for (v, mut list) in other.contrib.into_iter().enumerate() {
            for c in &mut list {
                c.sketch += shift;
            }
            self.contrib[v].append(&mut list);
            if other.total_gain[v].is_finite() || self.total_gain[v].is_finite() {
                self.total_gain[v] += other.total_gain[v];
            }
        }
    }

    /// Greedy selection of up to `k` boost nodes, pushed onto `out` in pick
    /// order. Returns the summed marginal over the stored sketches; the
    /// caller scales it by |V| / nb_sampled to estimate the objective.
    ///
    /// Stops early when no remaining candidate has a nonnegative marginal.
    /// The collection is restored to its pre-call state before returning.
    pub fn select(&mut self, k: usize, out: &mut Vec<u32>) -> f64 {
        out.clear();
        let mut scratch: Vec<f64> = self.total_gain.clone();
        let mut log: Vec<(u32, NodeState)> = vec![];
        let mut sum = 0.0;

        for _ in 0..k {
            let best = (0..scratch.len()).max_by_key(|&v| OrderedFloat(scratch[v]));
            let v = match best {
                Some(v) if scratch[v] >= 0.0 => v,
                _ => break,
            };
            sum += scratch[v];
            out.push(v as u32);
            scratch[v] = f64::NEG_INFINITY;

            for ci in 0..self.contrib[v].len() {
                let Contrib { sketch, state_to } = self.contrib[v][ci];
                let cur = self.cur_center[sketch as usize];
                if !self.config.priority.higher(state_to, cur) {
                    // the sketch was already captured by a stronger pick
                    continue;
                }
                let delta = self.config.gains.gain(state_to) - self.config.gains.gain(cur);
                for &(j, _) in &self.sketches[sketch as usize].members {
                    scratch[j as usize] -= delta;
                }
                log.push((sketch, cur));
                self.cur_center[sketch as usize] = state_to;
            }
        }

        assert!(sum.is_finite(), "gain accumulation overflowed: {}", sum);

        // O(changes) rollback, newest first
        for (sketch, prev) in log.into_iter().rev() {
            self.cur_center[sketch as usize] = prev;
        }
        sum
    }

    /// An upper bound on the heap memory held by the collection.
    pub fn footprint(&self) -> usize {
        use std::mem::size_of;
        let mut bytes = self.sketches.capacity() * size_of::<CompactSketch>()
            + self.cur_center.capacity() * size_of::<NodeState>()
            + self.contrib.capacity() * size_of::<Vec<Contrib>>()
            + self.total_gain.capacity() * size_of::<f64>();
        for s in &self.sketches {
            bytes += s.members.capacity() * size_of::<(u32, NodeState)>();
        }
        for c in &self.contrib {
            bytes += c.capacity() * size_of::<Contrib>();
        }
        bytes
    }

    /// Cross-checks the reverse index against the stored sketches; a
    /// failure is a programmer fault.
    pub fn assert_consistent(&self) {
        let mut gain = vec![0.0; self.total_gain.len()];
        let mut count = vec![0usize; self.total_gain.len()];
        for (id, s) in self.sketches.iter().enumerate() {
            assert_eq!(
                s.center_state, self.cur_center[id],
                "sketch {} has a dangling selection update",
                id
            );
            let base = self.config.gains.gain(s.center_state);
            for &(v, to) in &s.members {
                gain[v as usize] += self.config.gains.gain(to) - base;
                count[v as usize] += 1;
            }
        }
        for v in 0..gain.len() {
            assert_eq!(
                count[v],
                self.contrib[v].len(),
                "contrib[{}] out of sync with the sketch store",
                v
            );
            if self.total_gain[v].is_finite() {
                assert!(
                    (gain[v] - self.total_gain[v]).abs() < 1e-9,
                    "total_gain[{}] = {} but sketches sum to {}",
                    v,
                    self.total_gain[v],
                    gain[v]
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;
    use crate::{
        cache::EdgeStateCache,
        graph::{Edge, Graph},
        sketch::GainMode,
    };

    fn edge(u: u32, v: u32, p: f64, p_boost: f64) -> Edge {
        Edge { u, v, p, p_boost }
    }

    fn config(priority: &str) -> CoreConfig {
        CoreConfig::new(priority.parse().unwrap(), 0.5).unwrap()
    }

    /// The deterministic relay graph with its unique improving boost at 2.
    fn relay_setup() -> (Graph, SeedSet, CoreConfig) {
        let g = Graph::new(
            4,
            vec![edge(0, 2, 1.0, 1.0), edge(1, 2, 1.0, 1.0), edge(2, 3, 0.0, 1.0)],
        );
        let seeds = SeedSet::new(4, vec![0], vec![1]).unwrap();
        (g, seeds, config("Ca+>Cr->Cr>Ca"))
    }

    fn fill(
        collection: &mut PrrCollection,
        graph: &Graph,
        cfg: &CoreConfig,
        seeds: &SeedSet,
        centers: &[u32],
        rng_seed: u64,
    ) {
        let mut scratch = PrrScratch::new();
        let mut cache = EdgeStateCache::new(graph.nb_edges());
        let mut rng = SmallRng::seed_from_u64(rng_seed);
        for &c in centers {
            scratch.sample(graph, cfg, seeds, &mut cache, &mut rng, c, GainMode::Fast);
            collection.add(&scratch);
        }
    }

    #[test]
    fn add_indexes_only_strict_improvements() {
        let (g, seeds, cfg) = relay_setup();
        let mut col = PrrCollection::new(4, cfg, &seeds);
        fill(&mut col, &g, &cfg, &seeds, &[3], 1);

        // center 3: only boosting node 2 improves (None -> Ca+); the seed
        // boost outcomes are filtered as seeds
        assert_eq!(1, col.nb_sampled());
        assert_eq!(1, col.nb_sketches());
        assert_eq!(1, col.contrib[2].len());
        assert!(col.contrib[3].is_empty());
        assert!((col.total_gain[2] - 0.5).abs() < 1e-12);
        assert_eq!(f64::NEG_INFINITY, col.total_gain[0]);
        col.assert_consistent();
    }

    #[test]
    fn sketches_without_improvement_are_dropped_but_counted() {
        let (g, seeds, cfg) = relay_setup();
        let mut col = PrrCollection::new(4, cfg, &seeds);
        // center 0 is the positive seed: nothing to improve
        fill(&mut col, &g, &cfg, &seeds, &[0, 3], 1);
        assert_eq!(2, col.nb_sampled());
        assert_eq!(1, col.nb_sketches());
        col.assert_consistent();
    }

    #[test]
    fn greedy_selects_the_relay_and_reports_its_gain() {
        let (g, seeds, cfg) = relay_setup();
        let mut col = PrrCollection::new(4, cfg, &seeds);
        fill(&mut col, &g, &cfg, &seeds, &[3, 3, 3], 1);

        let mut out = vec![];
        let sum = col.select(1, &mut out);
        assert_eq!(vec![2], out);
        // every center-3 sketch gains 0.5 from boosting node 2
        assert!((sum - 1.5).abs() < 1e-12);
    }

    #[test]
    fn seeds_are_never_selected() {
        let (g, seeds, cfg) = relay_setup();
        let mut col = PrrCollection::new(4, cfg, &seeds);
        fill(&mut col, &g, &cfg, &seeds, &[3, 2, 1, 0], 7);

        let mut out = vec![];
        col.select(4, &mut out);
        for v in out {
            assert!(!seeds.is_seed(v), "seed {} selected", v);
        }
    }

    #[test]
    fn select_rolls_back_to_a_bitwise_equal_state() {
        let (g, seeds, cfg) = relay_setup();
        let mut col = PrrCollection::new(4, cfg, &seeds);
        fill(&mut col, &g, &cfg, &seeds, &[3, 3, 2], 3);

        let gains_before = col.total_gain.clone();
        let centers_before = col.cur_center.clone();
        let mut out = vec![];
        let first = col.select(2, &mut out);
        let again = col.select(2, &mut out);

        assert_eq!(gains_before, col.total_gain);
        assert_eq!(centers_before, col.cur_center);
        assert_eq!(first, again);
        col.assert_consistent();
    }

    #[test]
    fn merge_shifts_ids_and_sums_gains() {
        let (g, seeds, cfg) = relay_setup();
        let mut a = PrrCollection::new(4, cfg, &seeds);
        let mut b = PrrCollection::new(4, cfg, &seeds);
        fill(&mut a, &g, &cfg, &seeds, &[3, 0], 1);
        fill(&mut b, &g, &cfg, &seeds, &[3, 3], 2);

        let gain_a = a.total_gain[2];
        let gain_b = b.total_gain[2];
        a.merge(b);

        assert_eq!(4, a.nb_sampled());
        assert_eq!(3, a.nb_sketches());
        assert!((a.total_gain[2] - (gain_a + gain_b)).abs() < 1e-12);
        a.assert_consistent();

        let mut out = vec![];
        let sum = a.select(1, &mut out);
        assert_eq!(vec![2], out);
        assert!((sum - 1.5).abs() < 1e-12);
    }

    #[test]
    fn selected_marginals_are_nonnegative() {
        // two-layer graph with mixed outcomes, random edge draws
        let mut edges = vec![];
        for u in 0..10u32 {
            edges.push(edge(u, 10 + (u % 5), 0.5, 0.9));
            edges.push(edge(10 + (u % 5), 15 + (u % 3), 0.4, 0.8));
        }
        let g = Graph::new(18, edges);
        let seeds = SeedSet::new(18, vec![0, 1], vec![2, 3]).unwrap();
        let cfg = config("Ca+>Cr->Cr>Ca");
        let mut col = PrrCollection::new(18, cfg, &seeds);
        let centers: Vec<u32> = (0..18u32).chain(0..18u32).collect();
        fill(&mut col, &g, &cfg, &seeds, &centers, 13);
        col.assert_consistent();

        let mut out = vec![];
        let mut prev_total = 0.0;
        for k in 1..=5 {
            let sum = col.select(k, &mut out);
            assert!(sum >= prev_total - 1e-9, "marginals must be nonnegative");
            prev_total = sum;
        }
        col.assert_consistent();
    }
}
