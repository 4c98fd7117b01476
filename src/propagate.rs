//! The forward propagation primitive: a priority-aware multi-source BFS
//! over sampled edge states.
//!
//! Both messages start spreading at round 0 from their seed sets and travel
//! one hop per round. A node keeps the first-round arrival, with the
//! configured priority breaking same-round races; later arrivals are
//! dropped. Only an upgraded positive message (Ca+) may traverse Boosted
//! edges, everything else needs Active ones. A message arriving at a
//! boosted node is upgraded before the race at that node is settled, so a
//! boosted node always stores an upgraded state.

use std::collections::VecDeque;

use rand::rngs::SmallRng;

use crate::{
    cache::EdgeStateCache,
    graph::{Graph, SeedSet},
    prelude::{CoreConfig, EdgeState, NodeState},
};

/// Reusable per-thread scratch for the propagator. Entries are stamped with
/// a run counter so starting a new run costs O(1) instead of O(|V|).
#[derive(Debug, Clone)]
pub struct NodeTable {
    run: u32,
    stamp: Vec<u32>,
    state: Vec<NodeState>,
    dist: Vec<u32>,
    boosted: Vec<bool>,
    touched: Vec<u32>,
    queue: VecDeque<u32>,
}

impl NodeTable {
    pub fn new(n: usize) -> Self {
        NodeTable {
            run: 0,
            stamp: vec![0; n],
            state: vec![NodeState::None; n],
            dist: vec![u32::MAX; n],
            boosted: vec![false; n],
            touched: vec![],
            queue: VecDeque::new(),
        }
    }

    fn begin(&mut self) {
        self.run = self.run.wrapping_add(1);
        if self.run == 0 {
            self.stamp.iter_mut().for_each(|s| *s = 0);
            self.run = 1;
        }
        self.touched.clear();
        self.queue.clear();
    }

    #[inline]
    fn touch(&mut self, v: u32) {
        let i = v as usize;
        if self.stamp[i] != self.run {
            self.stamp[i] = self.run;
            self.state[i] = NodeState::None;
            self.dist[i] = u32::MAX;
            self.boosted[i] = false;
            self.touched.push(v);
        }
    }

    /// The final state of `v` after the last run (None if unreached).
    #[inline]
    pub fn state(&self, v: u32) -> NodeState {
        let i = v as usize;
        if self.stamp[i] == self.run {
            self.state[i]
        } else {
            NodeState::None
        }
    }

    /// The arrival round of `v` after the last run (u32::MAX if unreached).
    #[inline]
    pub fn dist(&self, v: u32) -> u32 {
        let i = v as usize;
        if self.stamp[i] == self.run {
            self.dist[i]
        } else {
            u32::MAX
        }
    }

    /// Every node written during the last run, in touch order. A node in
    /// here may still be unreached (e.g. a boost mark nothing arrived at).
    #[inline]
    pub fn touched(&self) -> &[u32] {
        &self.touched
    }
}

/// Runs one forward propagation with the given boost set. The edge-state
/// cache is used as-is; the caller decides when to `refresh` it.
pub fn propagate(
    graph: &Graph,
    config: &CoreConfig,
    seeds: &SeedSet,
    boost: &[u32],
    cache: &mut EdgeStateCache,
    rng: &mut SmallRng,
    table: &mut NodeTable,
) {
    table.begin();
    for &b in boost {
        table.touch(b);
        table.boosted[b as usize] = true;
    }
    for &s in seeds.sa() {
        arrive(table, config, s, NodeState::Ca, 0);
    }
    for &s in seeds.sr() {
        arrive(table, config, s, NodeState::Cr, 0);
    }

    while let Some(u) = table.queue.pop_front() {
        let su = table.state[u as usize];
        let du = table.dist[u as usize];
        for a in graph.out_edges(u) {
            let es = cache.get(a.edge, graph.edge(a.edge), rng);
            let usable = if su == NodeState::CaPlus {
                es.is_live()
            } else {
                es == EdgeState::Active
            };
            if usable {
                arrive(table, config, a.node, su, du + 1);
            }
        }
    }
}

#[inline]
fn arrive(table: &mut NodeTable, config: &CoreConfig, v: u32, carried: NodeState, dist: u32) {
    table.touch(v);
    let i = v as usize;
    let candidate = if table.boosted[i] { carried.boosted() } else { carried };
    if dist < table.dist[i] {
        table.state[i] = candidate;
        table.dist[i] = dist;
        table.queue.push_back(v);
    } else if dist == table.dist[i] && config.priority.higher(candidate, table.state[i]) {
        table.state[i] = candidate;
    }
}
