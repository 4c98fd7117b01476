//! Command-line surface and run orchestration for the demo driver.
//!
//! Everything here is glue: argument parsing, dispatch to the configured
//! algorithm, forward-simulation validation of the selection, and the
//! aligned result tables.

use std::{path::Path, time::Instant};

use peak_alloc::PeakAlloc;
use structopt::StructOpt;
use thiserror::Error;

use crate::{
    errors::{ConfigError, InputError},
    graph::{Graph, SeedSet},
    heuristics::{max_degree, page_rank, sim_greedy},
    io::{load_graph, load_seed_set},
    prelude::{Algorithm, CoreConfig, NodeState, Priority, SelectionMode},
    simulate::{simulate_prefixes, SimulationStats},
    solver::{
        PrImmParams, PrImmSolver, SaImmParams, SaImmSolver, SampleSchedule, SelectionRound,
    },
};

#[global_allocator]
static PEAK_ALLOC: PeakAlloc = PeakAlloc;

#[derive(Debug, StructOpt)]
#[structopt(name = "c2im", about = "Complementary-competitive influence maximization")]
pub struct Args {
    /// Graph file: a "V E" header then E lines "u v p pBoost"
    #[structopt(short, long)]
    pub graph_path: String,
    /// Seed file: Na, the Na positive seeds, Nr, the Nr negative seeds
    #[structopt(short, long)]
    pub seed_set_path: String,
    /// Budget: a positive integer or a strictly increasing list
    #[structopt(short, long, use_delimiter = true, required = true)]
    pub k: Vec<usize>,
    /// Message priority from highest to lowest, e.g. "Ca+>Cr->Cr>Ca"
    #[structopt(short, long)]
    pub priority: Priority,
    /// Selection algorithm; auto picks from the priority classification
    #[structopt(short, long, default_value = "auto")]
    pub algo: Algorithm,
    /// Trade-off weight between positive reach and prevented negative reach
    #[structopt(short, long, default_value = "0.5")]
    pub lambda: f64,
    /// Static sketch schedule for pr-imm (strictly increasing totals);
    /// empty means the dynamic (epsilon, ell) controller
    #[structopt(long, use_delimiter = true)]
    pub n_samples: Vec<usize>,
    /// Static per-center schedule for sa-imm / sa-rg-imm
    #[structopt(long, use_delimiter = true)]
    pub n_samples_sa: Vec<usize>,
    /// Cap on the number of sampled sketches
    #[structopt(long)]
    pub sample_limit: Option<usize>,
    /// Cap on per-center draws for the sa paths
    #[structopt(long)]
    pub sample_limit_sa: Option<usize>,
    /// Only sample sa centers within this hop distance of the seeds
    #[structopt(long)]
    pub sample_dist_limit_sa: Option<u32>,
    #[structopt(short, long, default_value = "0.1")]
    pub epsilon: f64,
    #[structopt(long, default_value = "0.1")]
    pub epsilon_sa: f64,
    #[structopt(long, default_value = "1")]
    pub ell: f64,
    /// Minimum average gain for an sa record to count
    #[structopt(long, default_value = "0")]
    pub gain_threshold_sa: f64,
    /// Forward simulations per evaluation entry
    #[structopt(short, long, default_value = "10000")]
    pub test_times: usize,
    /// Forward simulations per candidate in the greedy baseline
    #[structopt(long, default_value = "100")]
    pub greedy_test_times: usize,
    #[structopt(short = "T", long)]
    pub n_threads: Option<usize>,
    /// Root seed for every random draw of the run
    #[structopt(long, default_value = "42")]
    pub seed: u64,
}

/// A fatal driver failure, mapped to the process exit code.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Input(#[from] InputError),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) => 2,
            RunError::Input(_) => 3,
        }
    }
}

pub fn run(args: &Args) -> Result<(), RunError> {
    validate(args)?;
    let config = CoreConfig::new(args.priority, args.lambda)?;
    let graph = load_graph(Path::new(&args.graph_path))?;
    let seeds = load_seed_set(Path::new(&args.seed_set_path), graph.nb_nodes())?;
    let threads = args.n_threads.unwrap_or_else(num_cpus::get);
    let algo = args.algo.resolve(args.priority);
    log::info!(
        "running {} on |V| = {}, |E| = {}, |Sa| = {}, |Sr| = {}, priority {}",
        algo,
        graph.nb_nodes(),
        graph.nb_edges(),
        seeds.sa().len(),
        seeds.sr().len(),
        args.priority
    );

    let start = Instant::now();
    let k_max = *args.k.last().unwrap();
    let rounds = select(args, algo, &graph, &seeds, config, k_max, threads)?;
    print_selection(&rounds);

    let boost = rounds.last().map(|r| r.boost.clone()).unwrap_or_default();
    println!(
        "selected ({}): {}",
        boost.len(),
        boost.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ")
    );

    let outcomes = simulate_prefixes(
        &graph,
        &config,
        &seeds,
        &boost,
        &args.k,
        args.test_times,
        threads,
        args.seed ^ 0x7e57,
    );
    evaluation_header();
    for (k, outcome) in &outcomes {
        evaluation_row(*k, "with", &outcome.with_boost);
        evaluation_row(*k, "without", &outcome.without_boost);
        evaluation_row(*k, "diff", &outcome.diff);
    }
    println!(
        "total time {:.2}s, peak ram {:.2} MB",
        start.elapsed().as_secs_f32(),
        PEAK_ALLOC.peak_usage_as_mb()
    );
    Ok(())
}

fn validate(args: &Args) -> Result<(), ConfigError> {
    if args.k.is_empty() || args.k[0] == 0 {
        return Err(ConfigError::ZeroBudget);
    }
    if !args.k.windows(2).all(|w| w[0] < w[1]) {
        return Err(ConfigError::BadBudgetList);
    }
    for &eps in &[args.epsilon, args.epsilon_sa] {
        if eps <= 0.0 {
            return Err(ConfigError::EpsilonOutOfRange(eps));
        }
    }
    if args.ell <= 0.0 {
        return Err(ConfigError::EllOutOfRange(args.ell));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn select(
    args: &Args,
    algo: Algorithm,
    graph: &Graph,
    seeds: &SeedSet,
    config: CoreConfig,
    k: usize,
    threads: usize,
) -> Result<Vec<SelectionRound>, RunError> {
    let started = Instant::now();
    match algo {
        Algorithm::PrImm => {
            let schedule = if args.n_samples.is_empty() {
                SampleSchedule::Dynamic { epsilon: args.epsilon, ell: args.ell }
            } else {
                SampleSchedule::Static(args.n_samples.clone())
            };
            let params = PrImmParams {
                k,
                schedule,
                sample_cap: args.sample_limit.unwrap_or(usize::MAX),
                nb_threads: threads,
                seed: args.seed,
            };
            let mut solver = PrImmSolver::new(graph, seeds, config, params)?;
            Ok(solver.run())
        }
        Algorithm::SaImm | Algorithm::SaRgImm => {
            let schedule = if args.n_samples_sa.is_empty() {
                SampleSchedule::Dynamic { epsilon: args.epsilon_sa, ell: args.ell }
            } else {
                SampleSchedule::Static(args.n_samples_sa.clone())
            };
            let mode = if algo == Algorithm::SaImm {
                SelectionMode::Greedy
            } else {
                SelectionMode::RandomGreedy
            };
            let params = SaImmParams {
                k,
                mode,
                schedule,
                threshold: args.gain_threshold_sa,
                dist_limit: args.sample_dist_limit_sa,
                sample_cap: args.sample_limit_sa.unwrap_or(usize::MAX),
                nb_threads: threads,
                seed: args.seed,
            };
            let mut solver = SaImmSolver::new(graph, seeds, config, params)?;
            Ok(solver.run())
        }
        Algorithm::SimGreedy => {
            let boost =
                sim_greedy(graph, &config, seeds, k, args.greedy_test_times, threads, args.seed);
            Ok(vec![heuristic_round(boost, started)])
        }
        Algorithm::MaxDegree => Ok(vec![heuristic_round(max_degree(graph, seeds, k), started)]),
        Algorithm::PageRank => Ok(vec![heuristic_round(page_rank(graph, seeds, k), started)]),
        Algorithm::Auto => unreachable!("auto resolves before dispatch"),
    }
}

fn heuristic_round(boost: Vec<u32>, started: Instant) -> SelectionRound {
    SelectionRound {
        nb_samples: 0,
        boost,
        estimate: f64::NAN,
        elapsed: started.elapsed(),
        footprint: 0,
    }
}

fn print_selection(rounds: &[SelectionRound]) {
    println!(
        "{:>8} | {:>10} | {:>12} | {:>8} | {:>10}",
        "ROUND", "SAMPLES", "ESTIMATE", "TIME_S", "MEM_BYTES"
    );
    for (i, r) in rounds.iter().enumerate() {
        println!(
            "{:>8} | {:>10} | {:>12.4} | {:>8.2} | {:>10}",
            i + 1,
            r.nb_samples,
            r.estimate,
            r.elapsed.as_secs_f32(),
            r.footprint
        );
    }
}

fn evaluation_header() {
    println!(
        "{:>5} | {:>8} | {:>10} | {:>10} | {:>10} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9}",
        "K", "KIND", "GAIN", "POS", "NEG", "CA+", "CA", "CR", "CR-", "NONE"
    );
}

fn evaluation_row(k: usize, kind: &str, stats: &SimulationStats) {
    println!(
        "{:>5} | {:>8} | {:>10.4} | {:>10.4} | {:>10.4} | {:>9.2} | {:>9.2} | {:>9.2} | {:>9.2} | {:>9.2}",
        k,
        kind,
        stats.total_gain,
        stats.positive_gain,
        stats.negative_gain,
        stats.count(NodeState::CaPlus),
        stats.count(NodeState::Ca),
        stats.count(NodeState::Cr),
        stats.count(NodeState::CrMinus),
        stats.count(NodeState::None),
    );
}
