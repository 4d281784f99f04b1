//! Bucketizer
//!
//! Bins each candidate into a risk tier (APR), an exposure-size tier (credit
//! line) and a concentration tier (aggregate exposure to its payer).
//!
//! Buckets are half-open `[edge_i, edge_{i+1})` intervals numbered from 1.
//! The topmost bucket has no upper bound. A value sitting exactly on an edge
//! belongs to the bucket that starts there.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::candidate::Candidate;
use crate::config::AllocatorConfig;
use crate::error::{AllocationError, Result};

/// 1-based ordinal tier.
pub type Tier = u32;

/// Ordered lower boundaries of each bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketEdges(Vec<f64>);

impl BucketEdges {
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        let edges = Self(edges);
        edges.validate("bucket")?;
        Ok(edges)
    }

    /// Wrap edges known to be valid (built-in defaults).
    pub(crate) fn from_sorted(edges: Vec<f64>) -> Self {
        Self(edges)
    }

    pub fn validate(&self, dimension: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(AllocationError::invalid_config(format!(
                "{} edges must not be empty",
                dimension
            )));
        }
        if let Some(bad) = self.0.iter().find(|e| !e.is_finite()) {
            return Err(AllocationError::invalid_config(format!(
                "{} edges must be finite, got {}",
                dimension, bad
            )));
        }
        if let Some(w) = self.0.windows(2).find(|w| w[0] >= w[1]) {
            return Err(AllocationError::invalid_config(format!(
                "{} edges must be strictly increasing, got {} then {}",
                dimension, w[0], w[1]
            )));
        }
        Ok(())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Number of buckets (one per edge, the last one unbounded).
    pub fn bucket_count(&self) -> usize {
        self.0.len()
    }

    pub fn lowest(&self) -> f64 {
        self.0.first().copied().unwrap_or(f64::NAN)
    }

    /// Tier containing `value`, or `None` when it falls below the first edge.
    pub fn tier_of(&self, value: f64) -> Option<Tier> {
        let containing = self.0.partition_point(|edge| *edge <= value);
        if containing == 0 {
            None
        } else {
            Some(containing as Tier)
        }
    }
}

/// Tier triple attached to a candidate for the duration of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketAssignment {
    pub apr_bucket: Tier,
    pub line_bucket: Tier,
    pub payer_bucket: Tier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketedCandidate {
    pub candidate: Candidate,
    pub buckets: BucketAssignment,
    /// Total `amount` across all candidates sharing this payer
    pub payer_exposure: f64,
}

/// Aggregate requested amount per payer over the whole candidate set.
pub fn payer_exposures(candidates: &[Candidate]) -> HashMap<&str, f64> {
    let mut exposure: HashMap<&str, f64> = HashMap::new();
    for c in candidates {
        *exposure.entry(c.payer.as_str()).or_insert(0.0) += c.amount;
    }
    exposure
}

fn tier_for(
    edges: &BucketEdges,
    candidate: &Candidate,
    dimension: &'static str,
    value: f64,
) -> Result<Tier> {
    edges
        .tier_of(value)
        .ok_or_else(|| AllocationError::UnbucketableValue {
            candidate_id: candidate.id.to_string(),
            dimension,
            value,
            lowest_edge: edges.lowest(),
        })
}

/// Annotate copies of `candidates` with their bucket triple.
///
/// Fails on the first candidate whose APR, line or payer exposure falls
/// below the configured edges. Nothing is dropped silently.
pub fn assign_buckets(
    candidates: &[Candidate],
    config: &AllocatorConfig,
) -> Result<Vec<BucketedCandidate>> {
    if candidates.is_empty() {
        return Err(AllocationError::invalid_input(
            "cannot bucket an empty candidate table",
        ));
    }

    let exposure = payer_exposures(candidates);

    let bucketed = candidates
        .iter()
        .map(|c| -> Result<BucketedCandidate> {
            let payer_exposure = exposure.get(c.payer.as_str()).copied().unwrap_or(0.0);
            let buckets = BucketAssignment {
                apr_bucket: tier_for(&config.apr_bucket_edges, c, "apr", c.apr)?,
                line_bucket: tier_for(&config.line_bucket_edges, c, "line", c.line)?,
                payer_bucket: tier_for(
                    &config.payer_bucket_edges,
                    c,
                    "payer_exposure",
                    payer_exposure,
                )?,
            };
            Ok(BucketedCandidate {
                candidate: c.clone(),
                buckets,
                payer_exposure,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(
        candidates = bucketed.len(),
        payers = exposure.len(),
        "assigned buckets"
    );
    Ok(bucketed)
}
