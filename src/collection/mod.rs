//! The two sample collections the selectors run on: the PR-IMM sketch
//! store and the SA-IMM per-center gain table.

pub mod prr;
pub mod sa;

pub use prr::*;
pub use sa::*;
