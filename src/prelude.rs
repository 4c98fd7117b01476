//! Core vocabulary shared by every stage of the pipeline: message states,
//! sampled edge states, the configured priority order with its gain table,
//! and the algorithm selection enums.

use std::{cmp::Ordering, fmt::Display, str::FromStr};

use crate::errors::ConfigError;

/// The message state a node may end up in after a propagation.
///
/// `None` means the node was never reached. `CaPlus`/`CrMinus` only appear
/// when a positive (resp. negative) message went through a boosted node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    None,
    CaPlus,
    Ca,
    Cr,
    CrMinus,
}

impl NodeState {
    /// The four states a reached node can take, in declaration order.
    pub const REACHABLE: [NodeState; 4] =
        [NodeState::CaPlus, NodeState::Ca, NodeState::Cr, NodeState::CrMinus];

    #[inline]
    pub fn idx(self) -> usize {
        match self {
            NodeState::None => 0,
            NodeState::CaPlus => 1,
            NodeState::Ca => 2,
            NodeState::Cr => 3,
            NodeState::CrMinus => 4,
        }
    }

    /// True for the two states carrying a positive message.
    #[inline]
    pub fn is_positive(self) -> bool {
        matches!(self, NodeState::CaPlus | NodeState::Ca)
    }

    /// True for the two states carrying a negative message.
    #[inline]
    pub fn is_negative(self) -> bool {
        matches!(self, NodeState::Cr | NodeState::CrMinus)
    }

    /// The state this message turns into when it reaches a boosted node.
    /// Positive messages upgrade, negative messages get neutralized, and the
    /// already-upgraded states are left alone.
    #[inline]
    pub fn boosted(self) -> NodeState {
        match self {
            NodeState::Ca => NodeState::CaPlus,
            NodeState::Cr => NodeState::CrMinus,
            other => other,
        }
    }
}

impl Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::None => write!(f, "none"),
            NodeState::CaPlus => write!(f, "Ca+"),
            NodeState::Ca => write!(f, "Ca"),
            NodeState::Cr => write!(f, "Cr"),
            NodeState::CrMinus => write!(f, "Cr-"),
        }
    }
}

impl FromStr for NodeState {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ca+" | "ca+" => Ok(NodeState::CaPlus),
            "Ca" | "ca" => Ok(NodeState::Ca),
            "Cr" | "cr" => Ok(NodeState::Cr),
            "Cr-" | "cr-" => Ok(NodeState::CrMinus),
            _ => Err("expected one of Ca+, Ca, Cr, Cr-"),
        }
    }
}

/// The sampled outcome of a single edge under the independent-cascade draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EdgeState {
    Unsampled,
    /// Live for every message (drawn with probability p).
    Active,
    /// Live only for boosted positive messages (drawn with probability p+ - p).
    Boosted,
    /// Dead (drawn with probability 1 - p+).
    Blocked,
}

impl EdgeState {
    #[inline]
    pub fn is_live(self) -> bool {
        matches!(self, EdgeState::Active | EdgeState::Boosted)
    }
}

/// Total order over the four reachable message states.
///
/// `None` is always ranked below everything. The order is configured once
/// (a permutation listed from highest to lowest) and is the single
/// comparator used everywhere; ranks are small integers so comparing two
/// states is an array lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    /// rank[state.idx()]; higher rank wins. rank[None] == 0.
    rank: [u8; 5],
}

impl Priority {
    /// Builds the order from the permutation listed highest first.
    pub fn new(high_to_low: [NodeState; 4]) -> Result<Self, ConfigError> {
        let mut rank = [0u8; 5];
        let mut seen = [false; 5];
        for (pos, state) in high_to_low.iter().enumerate() {
            let i = state.idx();
            if i == 0 || seen[i] {
                return Err(ConfigError::BadPriority(format!("{:?}", high_to_low)));
            }
            seen[i] = true;
            rank[i] = (4 - pos) as u8;
        }
        Ok(Priority { rank })
    }

    #[inline]
    pub fn rank(&self, s: NodeState) -> u8 {
        self.rank[s.idx()]
    }

    /// The canonical comparator over message states.
    #[inline]
    pub fn compare(&self, a: NodeState, b: NodeState) -> Ordering {
        self.rank(a).cmp(&self.rank(b))
    }

    #[inline]
    pub fn higher(&self, a: NodeState, b: NodeState) -> bool {
        self.rank(a) > self.rank(b)
    }

    /// The permutation from highest to lowest.
    pub fn order(&self) -> [NodeState; 4] {
        let mut out = [NodeState::None; 4];
        for s in NodeState::REACHABLE {
            out[(4 - self.rank(s)) as usize] = s;
        }
        out
    }

    /// Whether the boosting objective is monotone under this order.
    ///
    /// This classification is configuration, not a derived fact: boosting
    /// moves Ca to Ca+ and Cr to Cr-, so the objective only ever improves
    /// when both upgrades move upward in the order.
    pub fn is_monotone(&self) -> bool {
        self.higher(NodeState::CaPlus, NodeState::Ca)
            && self.higher(NodeState::CrMinus, NodeState::Cr)
    }

    /// Whether the objective is additionally submodular: monotone with Ca+
    /// ranked above every other state.
    pub fn is_submodular(&self) -> bool {
        self.is_monotone() && self.rank(NodeState::CaPlus) == 4
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let order = self.order();
        write!(f, "{}>{}>{}>{}", order[0], order[1], order[2], order[3])
    }
}

impl FromStr for Priority {
    type Err = ConfigError;

    /// Accepts the permutation separated by '>', ',' or whitespace,
    /// e.g. "Ca+>Cr->Cr>Ca" or "Ca+ Cr- Cr Ca".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut states = [NodeState::None; 4];
        let mut count = 0;
        for tok in s.split(&['>', ',', ' '][..]).filter(|t| !t.is_empty()) {
            let state: NodeState = tok
                .parse()
                .map_err(|_| ConfigError::BadPriority(s.to_owned()))?;
            if count == 4 {
                return Err(ConfigError::BadPriority(s.to_owned()));
            }
            states[count] = state;
            count += 1;
        }
        if count != 4 {
            return Err(ConfigError::BadPriority(s.to_owned()));
        }
        Priority::new(states).map_err(|_| ConfigError::BadPriority(s.to_owned()))
    }
}

/// Per-state gain, parameterized by the trade-off weight lambda.
///
/// Positive reach is worth lambda whether or not it was boosted; an
/// un-neutralized negative reach costs 1 - lambda; a neutralized negative
/// message and an unreached node are both worth nothing.
#[derive(Debug, Clone, Copy)]
pub struct GainTable {
    gain: [f64; 5],
}

impl GainTable {
    pub fn new(lambda: f64) -> Self {
        let mut gain = [0.0; 5];
        gain[NodeState::CaPlus.idx()] = lambda;
        gain[NodeState::Ca.idx()] = lambda;
        gain[NodeState::Cr.idx()] = lambda - 1.0;
        GainTable { gain }
    }

    #[inline]
    pub fn gain(&self, s: NodeState) -> f64 {
        self.gain[s.idx()]
    }
}

/// Immutable configuration threaded through the samplers, collections and
/// selectors. There is deliberately no global mutable counterpart.
#[derive(Debug, Clone, Copy)]
pub struct CoreConfig {
    pub priority: Priority,
    pub lambda: f64,
    pub gains: GainTable,
}

impl CoreConfig {
    pub fn new(priority: Priority, lambda: f64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&lambda) {
            return Err(ConfigError::LambdaOutOfRange(lambda));
        }
        Ok(CoreConfig { priority, lambda, gains: GainTable::new(lambda) })
    }
}

/// The selection algorithms the driver can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Decide from the priority classification.
    Auto,
    PrImm,
    SaImm,
    SaRgImm,
    /// Simulation-driven greedy baseline.
    SimGreedy,
    MaxDegree,
    PageRank,
}

impl Algorithm {
    /// Resolves `Auto` against the configured priority: PR-IMM when the
    /// objective is monotone and submodular, SA-IMM when it is only
    /// monotone, and the random-greedy SA variant otherwise.
    pub fn resolve(self, priority: Priority) -> Algorithm {
        match self {
            Algorithm::Auto => {
                if priority.is_submodular() {
                    Algorithm::PrImm
                } else if priority.is_monotone() {
                    Algorithm::SaImm
                } else {
                    Algorithm::SaRgImm
                }
            }
            other => other,
        }
    }
}

impl FromStr for Algorithm {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Algorithm::Auto),
            "pr-imm" => Ok(Algorithm::PrImm),
            "sa-imm" => Ok(Algorithm::SaImm),
            "sa-rg-imm" => Ok(Algorithm::SaRgImm),
            "greedy" => Ok(Algorithm::SimGreedy),
            "max-degree" => Ok(Algorithm::MaxDegree),
            "page-rank" => Ok(Algorithm::PageRank),
            _ => Err(
                "expected one of auto, pr-imm, sa-imm, sa-rg-imm, greedy, \
                 max-degree, page-rank",
            ),
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::Auto => write!(f, "auto"),
            Algorithm::PrImm => write!(f, "pr-imm"),
            Algorithm::SaImm => write!(f, "sa-imm"),
            Algorithm::SaRgImm => write!(f, "sa-rg-imm"),
            Algorithm::SimGreedy => write!(f, "greedy"),
            Algorithm::MaxDegree => write!(f, "max-degree"),
            Algorithm::PageRank => write!(f, "page-rank"),
        }
    }
}

/// How the last stage of an SA-IMM selection picks among candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Greedy,
    RandomGreedy,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perm(s: &str) -> Priority {
        s.parse().unwrap()
    }

    #[test]
    fn priority_is_a_strict_total_order() {
        let p = perm("Ca+>Cr->Cr>Ca");
        for a in NodeState::REACHABLE {
            for b in NodeState::REACHABLE {
                let gt = p.higher(a, b);
                let lt = p.higher(b, a);
                let eq = a == b;
                // exactly one of the three relations holds
                assert_eq!(1, gt as u8 + lt as u8 + eq as u8, "{} vs {}", a, b);
            }
            assert!(p.higher(a, NodeState::None));
        }
    }

    #[test]
    fn parse_matches_configured_order() {
        let p = perm("Ca+>Cr->Cr>Ca");
        assert_eq!(4, p.rank(NodeState::CaPlus));
        assert_eq!(3, p.rank(NodeState::CrMinus));
        assert_eq!(2, p.rank(NodeState::Cr));
        assert_eq!(1, p.rank(NodeState::Ca));
        assert_eq!(0, p.rank(NodeState::None));
        assert_eq!("Ca+>Cr->Cr>Ca", p.to_string());

        let spaced = perm("Cr- Ca+ Ca Cr");
        assert_eq!(4, spaced.rank(NodeState::CrMinus));
        assert_eq!(3, spaced.rank(NodeState::CaPlus));
    }

    #[test]
    fn parse_rejects_non_permutations() {
        assert!("Ca+>Ca>Cr".parse::<Priority>().is_err());
        assert!("Ca+>Ca>Cr>Ca".parse::<Priority>().is_err());
        assert!("Ca+>Ca>Cr>Cr->Ca".parse::<Priority>().is_err());
        assert!("Ca+>Ca>Cr>bogus".parse::<Priority>().is_err());
    }

    #[test]
    fn classification_table() {
        // submodular: monotone with Ca+ on top
        assert!(perm("Ca+>Cr->Cr>Ca").is_submodular());
        assert!(perm("Ca+>Cr->Ca>Cr").is_submodular());
        assert!(perm("Ca+>Ca>Cr->Cr").is_submodular());
        // monotone but not submodular
        let p = perm("Cr->Ca+>Ca>Cr");
        assert!(p.is_monotone() && !p.is_submodular());
        // not monotone
        assert!(!perm("Ca>Ca+>Cr->Cr").is_monotone());
        assert!(!perm("Ca+>Cr>Cr->Ca").is_monotone());
    }

    #[test]
    fn auto_dispatch_follows_classification() {
        let ms = perm("Ca+>Cr->Cr>Ca");
        let m = perm("Cr->Ca+>Ca>Cr");
        let other = perm("Ca>Ca+>Cr->Cr");
        assert_eq!(Algorithm::PrImm, Algorithm::Auto.resolve(ms));
        assert_eq!(Algorithm::SaImm, Algorithm::Auto.resolve(m));
        assert_eq!(Algorithm::SaRgImm, Algorithm::Auto.resolve(other));
        assert_eq!(Algorithm::PageRank, Algorithm::PageRank.resolve(other));
    }

    #[test]
    fn gains_follow_lambda() {
        let g = GainTable::new(0.7);
        assert_eq!(0.7, g.gain(NodeState::CaPlus));
        assert_eq!(0.7, g.gain(NodeState::Ca));
        assert!((g.gain(NodeState::Cr) + 0.3).abs() < 1e-12);
        assert_eq!(0.0, g.gain(NodeState::CrMinus));
        assert_eq!(0.0, g.gain(NodeState::None));
    }

    #[test]
    fn config_rejects_bad_lambda() {
        let p = perm("Ca+>Cr->Cr>Ca");
        assert!(CoreConfig::new(p, -0.1).is_err());
        assert!(CoreConfig::new(p, 1.1).is_err());
        assert!(CoreConfig::new(p, 0.5).is_ok());
    }
}
