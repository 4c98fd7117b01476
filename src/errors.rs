//! Typed failures surfaced at the module boundaries of the engine.
//!
//! Configuration and input problems are reported through these enums and are
//! fatal before any sampling starts. Violations of internal collection
//! invariants are programmer faults and are enforced with assertions rather
//! than error values.

use thiserror::Error;

/// A parameter rejected before the run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("budget k must be a positive integer")]
    ZeroBudget,
    #[error("k list must be strictly increasing")]
    BadBudgetList,
    #[error("lambda must lie in [0, 1], got {0}")]
    LambdaOutOfRange(f64),
    #[error("epsilon must be positive, got {0}")]
    EpsilonOutOfRange(f64),
    #[error("ell must be positive, got {0}")]
    EllOutOfRange(f64),
    #[error("gain threshold must lie in [0, 1], got {0}")]
    ThresholdOutOfRange(f64),
    #[error("priority must be a permutation of Ca+, Ca, Cr, Cr-: got '{0}'")]
    BadPriority(String),
    #[error("sample schedule must be non-empty and strictly increasing")]
    BadSchedule,
}

/// A malformed graph or seed-set input.
#[derive(Debug, Error)]
pub enum InputError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("line {line}: {what}")]
    Malformed { line: usize, what: String },
    #[error("line {line}: node {node} out of range (|V| = {n})")]
    NodeOutOfRange { line: usize, node: usize, n: usize },
    #[error("line {line}: need 0 <= p <= pBoost <= 1, got p = {p}, pBoost = {p_boost}")]
    BadProbability { line: usize, p: f64, p_boost: f64 },
    #[error("node {0} appears in both seed sets")]
    OverlappingSeeds(usize),
    #[error("seed node {node} out of range (|V| = {n})")]
    SeedOutOfRange { node: usize, n: usize },
    #[error("unexpected end of input at line {0}")]
    Truncated(usize),
}

impl InputError {
    pub(crate) fn malformed(line: usize, what: impl Into<String>) -> Self {
        InputError::Malformed { line, what: what.into() }
    }
}
