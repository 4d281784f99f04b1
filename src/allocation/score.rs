//! Scorer
//!
//! Composite priority per candidate:
//!
//! ```text
//! score = apr_weight * apr_bucket + line_weight * line_bucket + payer_weight * payer_bucket
//! ```
//!
//! With the default weights a higher APR tier raises the score, a higher
//! payer concentration tier lowers it, and the exposure-size tier only
//! separates otherwise similar candidates.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::bucket::{BucketAssignment, BucketedCandidate};
use super::candidate::Candidate;
use crate::error::{AllocationError, Result};

/// Per-dimension multipliers applied to bucket tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_apr_weight")]
    pub apr: f64,
    #[serde(default = "default_line_weight")]
    pub line: f64,
    #[serde(default = "default_payer_weight")]
    pub payer: f64,
}

fn default_apr_weight() -> f64 {
    1.0
}

fn default_line_weight() -> f64 {
    0.1
}

fn default_payer_weight() -> f64 {
    -0.5
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            apr: default_apr_weight(),
            line: default_line_weight(),
            payer: default_payer_weight(),
        }
    }
}

impl ScoreWeights {
    pub fn validate(&self) -> Result<()> {
        for (name, w) in [("apr", self.apr), ("line", self.line), ("payer", self.payer)] {
            if !w.is_finite() {
                return Err(AllocationError::invalid_config(format!(
                    "score weight '{}' must be finite, got {}",
                    name, w
                )));
            }
        }
        Ok(())
    }

    /// Pure function of the tier triple.
    pub fn score(&self, buckets: &BucketAssignment) -> f64 {
        self.apr * buckets.apr_bucket as f64
            + self.line * buckets.line_bucket as f64
            + self.payer * buckets.payer_bucket as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    #[serde(flatten)]
    pub candidate: Candidate,
    /// Absent when the caller supplied its own score
    #[serde(flatten)]
    pub buckets: Option<BucketAssignment>,
    pub score: f64,
}

impl ScoredCandidate {
    /// Candidate scored upstream; skips bucketing entirely.
    pub fn prescored(candidate: Candidate, score: f64) -> Self {
        Self {
            candidate,
            buckets: None,
            score,
        }
    }
}

/// Attach a score to each bucketed candidate. Row count and order are kept.
pub fn compute_score(
    bucketed: Vec<BucketedCandidate>,
    weights: &ScoreWeights,
) -> Vec<ScoredCandidate> {
    let scored: Vec<ScoredCandidate> = bucketed
        .into_iter()
        .map(|b| ScoredCandidate {
            score: weights.score(&b.buckets),
            buckets: Some(b.buckets),
            candidate: b.candidate,
        })
        .collect();

    debug!(candidates = scored.len(), ?weights, "computed scores");
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucketed(id: i64, apr: u32, line: u32, payer: u32) -> BucketedCandidate {
        BucketedCandidate {
            candidate: Candidate::new(id, 100.0, 0.2, 1_000.0, "p"),
            buckets: BucketAssignment {
                apr_bucket: apr,
                line_bucket: line,
                payer_bucket: payer,
            },
            payer_exposure: 100.0,
        }
    }

    #[test]
    fn test_weighted_sum() {
        let weights = ScoreWeights {
            apr: 2.0,
            line: 0.5,
            payer: -1.0,
        };
        let scored = compute_score(vec![bucketed(1, 3, 2, 1)], &weights);
        assert_eq!(scored[0].score, 2.0 * 3.0 + 0.5 * 2.0 - 1.0);
    }

    #[test]
    fn test_default_direction() {
        let w = ScoreWeights::default();
        let base = bucketed(1, 2, 2, 2);
        let higher_apr = bucketed(2, 3, 2, 2);
        let more_concentrated = bucketed(3, 2, 2, 3);

        let scored = compute_score(vec![base, higher_apr, more_concentrated], &w);
        assert!(scored[1].score > scored[0].score);
        assert!(scored[2].score < scored[0].score);
    }

    #[test]
    fn test_identical_triples_score_identically() {
        let w = ScoreWeights::default();
        let scored = compute_score(vec![bucketed(1, 4, 1, 2), bucketed(2, 4, 1, 2)], &w);
        assert_eq!(scored[0].score.to_bits(), scored[1].score.to_bits());
    }

    #[test]
    fn test_rows_kept_in_order() {
        let w = ScoreWeights::default();
        let scored = compute_score(
            vec![bucketed(3, 1, 1, 1), bucketed(1, 5, 1, 1), bucketed(2, 2, 1, 1)],
            &w,
        );
        let ids: Vec<String> = scored.iter().map(|s| s.candidate.id.to_string()).collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
    }

    #[test]
    fn test_non_finite_weight_rejected() {
        let w = ScoreWeights {
            apr: f64::NAN,
            ..ScoreWeights::default()
        };
        assert!(w.validate().is_err());
    }
}
