//! Baseline selectors: out-degree, PageRank and simulation-driven greedy.
//! They share the solvers' output shape (an ordered boost list excluding
//! seeds) so the driver can evaluate them with the same machinery.

use binary_heap_plus::BinaryHeap;
use compare::Compare;
use ordered_float::OrderedFloat;

use crate::{
    graph::{Graph, SeedSet},
    prelude::CoreConfig,
    simulate::simulate_boosted,
};

/// The k non-seed nodes of largest out-degree, largest first.
pub fn max_degree(graph: &Graph, seeds: &SeedSet, k: usize) -> Vec<u32> {
    top_k_by(graph, seeds, k, |v| graph.out_degree(v) as f64)
}

/// The k non-seed nodes of largest PageRank, largest first. The rank is
/// computed on the transposed graph, so a node scores high when it can
/// reach much of the graph rather than when much of the graph points at it.
pub fn page_rank(graph: &Graph, seeds: &SeedSet, k: usize) -> Vec<u32> {
    const DAMPING: f64 = 0.85;
    const ROUNDS: usize = 100;
    const TOLERANCE: f64 = 1e-10;

    let n = graph.nb_nodes();
    if n == 0 {
        return vec![];
    }
    let mut rank = vec![1.0 / n as f64; n];
    let mut next = vec![0.0; n];

    for _ in 0..ROUNDS {
        let mut dangling = 0.0;
        next.iter_mut().for_each(|x| *x = 0.0);
        for v in 0..n as u32 {
            // transposed walk: mass flows against the edges
            let sources = graph.in_edges(v);
            if sources.is_empty() {
                dangling += rank[v as usize];
                continue;
            }
            let share = rank[v as usize] / sources.len() as f64;
            for a in sources {
                next[a.node as usize] += share;
            }
        }
        let base = (1.0 - DAMPING) / n as f64 + DAMPING * dangling / n as f64;
        let mut delta = 0.0;
        for v in 0..n {
            let updated = base + DAMPING * next[v];
            delta += (updated - rank[v]).abs();
            rank[v] = updated;
        }
        if delta < TOLERANCE {
            break;
        }
    }

    top_k_by(graph, seeds, k, |v| rank[v as usize])
}

/// Simulation-driven greedy: each round evaluates every remaining
/// candidate with `trials` propagations on top of the current pick set and
/// keeps the best.
pub fn sim_greedy(
    graph: &Graph,
    config: &CoreConfig,
    seeds: &SeedSet,
    k: usize,
    trials: usize,
    nb_threads: usize,
    seed: u64,
) -> Vec<u32> {
    let n = graph.nb_nodes() as u32;
    let mut picked: Vec<u32> = vec![];
    let mut in_pick = vec![false; n as usize];

    for round in 0..k {
        let mut best: Option<(f64, u32)> = None;
        for v in 0..n {
            if in_pick[v as usize] || seeds.is_seed(v) {
                continue;
            }
            picked.push(v);
            let stats = simulate_boosted(
                graph,
                config,
                seeds,
                &picked,
                trials,
                nb_threads,
                seed ^ (round as u64) << 32,
            );
            picked.pop();
            if best.map_or(true, |(g, _)| stats.total_gain > g) {
                best = Some((stats.total_gain, v));
            }
        }
        match best {
            Some((_, v)) => {
                picked.push(v);
                in_pick[v as usize] = true;
            }
            None => break,
        }
    }
    picked
}

/// Orders (score, node) pairs so the worst of the kept k pops first.
#[derive(Debug, Clone, Copy)]
struct MinScore;
impl Compare<(OrderedFloat<f64>, u32)> for MinScore {
    fn compare(
        &self,
        l: &(OrderedFloat<f64>, u32),
        r: &(OrderedFloat<f64>, u32),
    ) -> std::cmp::Ordering {
        r.cmp(l)
    }
}

/// The k best non-seed nodes under `score`, best first, via a size-k
/// min-heap.
fn top_k_by(graph: &Graph, seeds: &SeedSet, k: usize, score: impl Fn(u32) -> f64) -> Vec<u32> {
    if k == 0 {
        return vec![];
    }
    let mut heap = BinaryHeap::from_vec_cmp(Vec::with_capacity(k + 1), MinScore);
    for v in 0..graph.nb_nodes() as u32 {
        if seeds.is_seed(v) {
            continue;
        }
        heap.push((OrderedFloat(score(v)), v));
        if heap.len() > k {
            heap.pop();
        }
    }
    let mut out: Vec<(OrderedFloat<f64>, u32)> = heap.into_vec();
    out.sort_unstable_by(|a, b| b.cmp(a));
    out.into_iter().map(|(_, v)| v).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Edge;

    fn edge(u: u32, v: u32) -> Edge {
        Edge { u, v, p: 1.0, p_boost: 1.0 }
    }

    fn star_graph() -> Graph {
        // node 4 fans out to everyone, node 3 to two, the rest to one or none
        Graph::new(
            6,
            vec![
                edge(4, 0),
                edge(4, 1),
                edge(4, 2),
                edge(4, 3),
                edge(4, 5),
                edge(3, 0),
                edge(3, 1),
                edge(2, 0),
            ],
        )
    }

    #[test]
    fn max_degree_ranks_by_out_degree_and_skips_seeds() {
        let g = star_graph();
        let seeds = SeedSet::new(6, vec![0], vec![1]).unwrap();
        assert_eq!(vec![4, 3, 2], max_degree(&g, &seeds, 3));

        let seeded_out = SeedSet::new(6, vec![4], vec![]).unwrap();
        assert_eq!(vec![3, 2], max_degree(&g, &seeded_out, 2));
    }

    #[test]
    fn top_k_clamps_to_available_candidates() {
        let g = star_graph();
        let seeds = SeedSet::new(6, vec![0], vec![1]).unwrap();
        let all = max_degree(&g, &seeds, 100);
        assert_eq!(4, all.len());
        assert!(!all.contains(&0) && !all.contains(&1));
    }

    #[test]
    fn page_rank_favors_the_hub_on_the_transposed_walk() {
        let g = star_graph();
        let seeds = SeedSet::new(6, vec![], vec![]).unwrap();
        let ranked = page_rank(&g, &seeds, 6);
        // node 4 reaches everything, so it collects the most transposed mass
        assert_eq!(4, ranked[0]);
    }

    #[test]
    fn sim_greedy_finds_the_deterministic_relay() {
        let g = Graph::new(
            4,
            vec![
                Edge { u: 0, v: 2, p: 1.0, p_boost: 1.0 },
                Edge { u: 1, v: 2, p: 1.0, p_boost: 1.0 },
                Edge { u: 2, v: 3, p: 0.0, p_boost: 1.0 },
            ],
        );
        let seeds = SeedSet::new(4, vec![0], vec![1]).unwrap();
        let config = CoreConfig::new("Ca+>Cr->Cr>Ca".parse().unwrap(), 0.5).unwrap();
        let picked = sim_greedy(&g, &config, &seeds, 1, 8, 2, 3);
        assert_eq!(vec![2], picked);
    }
}
