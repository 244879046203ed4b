use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stats::StatKind;

/// One kind of request a worker can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Health,
    Create,
    List,
    Get,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Health,
        Operation::Create,
        Operation::List,
        Operation::Get,
        Operation::Update,
        Operation::Delete,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Operation::Health => "health",
            Operation::Create => "create",
            Operation::List => "list",
            Operation::Get => "get",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// get/update/delete need a known id to aim at
    pub const fn needs_target(self) -> bool {
        matches!(self, Operation::Get | Operation::Update | Operation::Delete)
    }

    pub const fn stat_kind(self) -> StatKind {
        match self {
            Operation::Health => StatKind::Health,
            Operation::Create => StatKind::Create,
            Operation::List | Operation::Get => StatKind::Read,
            Operation::Update => StatKind::Update,
            Operation::Delete => StatKind::Delete,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = MixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MixError::UnknownOperation(s.trim().to_string()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MixError {
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),
    #[error("expected `operation=weight`, got `{0}`")]
    Malformed(String),
    #[error("invalid weight for {op}: `{value}`")]
    InvalidWeight { op: Operation, value: String },
    #[error("at least one operation needs a non-zero weight")]
    AllZero,
    #[error("operation weights sum past {}", u32::MAX)]
    Overflow,
    #[error("invalid operation weights: {0}")]
    Weights(WeightedError),
}

pub const DEFAULT_WEIGHTS: [u32; 6] = [3, 2, 3, 2, 1, 1];

/// Relative weights for each [`Operation`]. Always holds at least one
/// non-zero weight, so sampling never fails.
#[derive(Debug, Clone, Serialize)]
pub struct OperationMix {
    weights: [u32; 6],
    #[serde(skip)]
    index: WeightedIndex<u32>,
}

impl OperationMix {
    pub fn new(weights: [u32; 6]) -> Result<Self, MixError> {
        weights
            .iter()
            .try_fold(0u32, |sum, w| sum.checked_add(*w))
            .ok_or(MixError::Overflow)?;
        let index = WeightedIndex::new(weights).map_err(|err| match err {
            WeightedError::AllWeightsZero => MixError::AllZero,
            other => MixError::Weights(other),
        })?;
        Ok(Self { weights, index })
    }

    /// Parse `health=3,create=2,...`. Operations left out keep their
    /// default weight; `op=0` disables one.
    pub fn parse(raw: &str) -> Result<Self, MixError> {
        let mut weights = DEFAULT_WEIGHTS;
        for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
            let (op, value) = part
                .split_once('=')
                .ok_or_else(|| MixError::Malformed(part.trim().to_string()))?;
            let op: Operation = op.parse()?;
            weights[op.index()] = value.trim().parse().map_err(|_| MixError::InvalidWeight {
                op,
                value: value.trim().to_string(),
            })?;
        }
        Self::new(weights)
    }

    pub fn weight(&self, op: Operation) -> u32 {
        self.weights[op.index()]
    }

    pub fn weights(&self) -> impl Iterator<Item = (Operation, u32)> + '_ {
        Operation::ALL.into_iter().map(|op| (op, self.weight(op)))
    }

    /// Pick the next operation. Without any known id, operations that need
    /// a target turn into a create.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R, has_targets: bool) -> Operation {
        let op = Operation::ALL[self.index.sample(rng)];
        if op.needs_target() && !has_targets {
            Operation::Create
        } else {
            op
        }
    }
}

impl Default for OperationMix {
    fn default() -> Self {
        Self::new(DEFAULT_WEIGHTS).expect("default weights are non-zero")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn histogram(mix: &OperationMix, has_targets: bool, n: usize) -> HashMap<Operation, usize> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut counts = HashMap::new();
        for _ in 0..n {
            *counts.entry(mix.choose(&mut rng, has_targets)).or_default() += 1;
        }
        counts
    }

    #[test]
    fn default_ratios() {
        let counts = histogram(&OperationMix::default(), true, 12_000);
        // 12 weight units, so ~1000 draws per unit
        for (op, units) in [
            (Operation::Health, 3),
            (Operation::Create, 2),
            (Operation::List, 3),
            (Operation::Get, 2),
            (Operation::Update, 1),
            (Operation::Delete, 1),
        ] {
            let got = counts[&op] as f64;
            let want = units as f64 * 1000.0;
            assert!((got - want).abs() < want * 0.15, "{op}: {got} vs {want}");
        }
    }

    #[test]
    fn empty_cache_falls_back_to_create() {
        let counts = histogram(&OperationMix::default(), false, 5_000);
        assert!(!counts.contains_key(&Operation::Get));
        assert!(!counts.contains_key(&Operation::Update));
        assert!(!counts.contains_key(&Operation::Delete));
        assert!(counts[&Operation::Create] > 0);
        assert!(counts[&Operation::Health] > 0);
    }

    #[test]
    fn parse_overrides() {
        let mix = OperationMix::parse("delete=0, get=5").unwrap();
        assert_eq!(mix.weight(Operation::Delete), 0);
        assert_eq!(mix.weight(Operation::Get), 5);
        assert_eq!(mix.weight(Operation::Health), 3);

        let counts = histogram(&mix, true, 2_000);
        assert!(!counts.contains_key(&Operation::Delete));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            OperationMix::parse("fetch=1").unwrap_err(),
            MixError::UnknownOperation("fetch".into())
        );
        assert!(matches!(
            OperationMix::parse("get").unwrap_err(),
            MixError::Malformed(_)
        ));
        assert!(matches!(
            OperationMix::parse("get=-1").unwrap_err(),
            MixError::InvalidWeight { .. }
        ));
        assert_eq!(
            OperationMix::parse("health=0,create=0,list=0,get=0,update=0,delete=0").unwrap_err(),
            MixError::AllZero
        );
    }

    #[test]
    fn oversized_weights_rejected() {
        assert_eq!(
            OperationMix::new([u32::MAX, 1, 0, 0, 0, 0]).unwrap_err(),
            MixError::Overflow
        );
        assert_eq!(
            OperationMix::parse("health=4294967295,create=1").unwrap_err(),
            MixError::Overflow
        );
        let mix = OperationMix::new([u32::MAX, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(mix.weight(Operation::Health), u32::MAX);
    }
}
