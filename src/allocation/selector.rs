//! Selector
//!
//! Best-score-first, first-fit capital allocation:
//! 1. Drop candidates whose term misses `target_term` (if given)
//! 2. Bucket and score what is left
//! 3. Sort by score descending, then the configured tie-break key, then id
//! 4. Walk the order with a running total; admit a candidate iff it still
//!    fits under `aum_total`, otherwise skip it and keep walking
//!
//! One pass, no backtracking. This is a heuristic, not an optimal knapsack.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::bucket::{assign_buckets, BucketedCandidate};
use super::candidate::{candidates_from_rows, Candidate, CandidateId, RawCandidate};
use super::score::{compute_score, ScoredCandidate};
use crate::config::AllocatorConfig;
use crate::error::{AllocationError, Result};

/// Column consulted when two candidates have the same score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakKey {
    #[default]
    Id,
    Amount,
    Apr,
    Line,
    Term,
    Payer,
}

impl TieBreakKey {
    /// Ascending comparison on this key. Candidate id is applied afterwards
    /// by the caller so the overall order is total.
    fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
        match self {
            TieBreakKey::Id => a.id.cmp(&b.id),
            TieBreakKey::Amount => a.amount.total_cmp(&b.amount),
            TieBreakKey::Apr => a.apr.total_cmp(&b.apr),
            TieBreakKey::Line => a.line.total_cmp(&b.line),
            TieBreakKey::Term => a.term.cmp(&b.term),
            TieBreakKey::Payer => a.payer.cmp(&b.payer),
        }
    }
}

/// One admitted row: the scored candidate plus its position in the running
/// total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedCandidate {
    #[serde(flatten)]
    pub scored: ScoredCandidate,
    /// Always true; the selection only contains admitted rows
    pub selected: bool,
    pub selected_amount_cum: f64,
}

impl SelectedCandidate {
    pub fn candidate(&self) -> &Candidate {
        &self.scored.candidate
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Would push the running total past `aum_total`
    ExceedsRemainingBudget { remaining: f64 },
    /// Nothing to fund
    ZeroAmount,
}

/// A candidate that reached the walk but was not admitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedCandidate {
    pub id: CandidateId,
    pub amount: f64,
    pub score: f64,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Output of one allocation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub aum_total: f64,
    /// Admitted rows in admission order
    pub rows: Vec<SelectedCandidate>,
    /// Walk-order record of everything considered but not admitted
    pub skipped: Vec<SkippedCandidate>,
    /// Candidates removed by the term filter before scoring
    pub filtered_out: usize,
}

impl Selection {
    fn empty(aum_total: f64, filtered_out: usize) -> Self {
        Self {
            aum_total,
            rows: Vec::new(),
            skipped: Vec::new(),
            filtered_out,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Capital deployed: the last cumulative value, or 0 when nothing was admitted.
    pub fn deployed(&self) -> f64 {
        self.rows
            .last()
            .map(|r| r.selected_amount_cum)
            .unwrap_or(0.0)
    }

    pub fn remaining(&self) -> f64 {
        (self.aum_total - self.deployed()).max(0.0)
    }

    pub fn ids(&self) -> Vec<&CandidateId> {
        self.rows.iter().map(|r| &r.scored.candidate.id).collect()
    }

    pub fn cumulative_amounts(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.selected_amount_cum).collect()
    }
}

/// Policy-driven allocator. Holds only immutable configuration, so one
/// instance can serve concurrent callers.
#[derive(Debug, Clone)]
pub struct Allocator {
    config: AllocatorConfig,
}

impl Allocator {
    pub fn new(config: AllocatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn with_default_config() -> Self {
        Self {
            config: AllocatorConfig::default(),
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn assign_buckets(&self, candidates: &[Candidate]) -> Result<Vec<BucketedCandidate>> {
        assign_buckets(candidates, &self.config)
    }

    pub fn compute_score(&self, bucketed: Vec<BucketedCandidate>) -> Vec<ScoredCandidate> {
        compute_score(bucketed, &self.config.score_weights)
    }

    /// Full pipeline: term filter, bucketing, scoring, greedy selection.
    pub fn optimize(
        &self,
        candidates: &[Candidate],
        aum_total: f64,
        target_term: Option<i64>,
    ) -> Result<Selection> {
        check_aum(aum_total)?;
        check_candidates(candidates.iter())?;

        let filtered: Vec<Candidate> = candidates
            .iter()
            .filter(|c| self.matches_term(c, target_term))
            .cloned()
            .collect();
        let filtered_out = candidates.len() - filtered.len();

        if filtered.is_empty() {
            info!(?target_term, filtered_out, "no candidates left after term filter");
            return Ok(Selection::empty(aum_total, filtered_out));
        }

        let bucketed = self.assign_buckets(&filtered)?;
        let scored = self.compute_score(bucketed);
        Ok(self.walk(scored, aum_total, filtered_out))
    }

    /// Selection over candidates that already carry a score.
    pub fn select_scored(
        &self,
        scored: Vec<ScoredCandidate>,
        aum_total: f64,
        target_term: Option<i64>,
    ) -> Result<Selection> {
        check_aum(aum_total)?;
        check_candidates(scored.iter().map(|s| &s.candidate))?;
        if let Some(bad) = scored.iter().find(|s| !s.score.is_finite()) {
            return Err(AllocationError::invalid_input(format!(
                "candidate {}: score must be finite, got {}",
                bad.candidate.id, bad.score
            )));
        }

        let total = scored.len();
        let filtered: Vec<ScoredCandidate> = scored
            .into_iter()
            .filter(|s| self.matches_term(&s.candidate, target_term))
            .collect();
        let filtered_out = total - filtered.len();

        if filtered.is_empty() {
            info!(?target_term, filtered_out, "no candidates left after term filter");
            return Ok(Selection::empty(aum_total, filtered_out));
        }

        Ok(self.walk(filtered, aum_total, filtered_out))
    }

    /// Boundary entry point for untyped upstream rows.
    pub fn optimize_rows(
        &self,
        rows: Vec<RawCandidate>,
        aum_total: f64,
        target_term: Option<i64>,
    ) -> Result<Selection> {
        let candidates = candidates_from_rows(rows)?;
        self.optimize(&candidates, aum_total, target_term)
    }

    fn matches_term(&self, candidate: &Candidate, target_term: Option<i64>) -> bool {
        match target_term {
            None => true,
            Some(target) => candidate.term.map_or(false, |term| {
                term.abs_diff(target) <= self.config.term_tolerance.unsigned_abs()
            }),
        }
    }

    fn sort(&self, scored: &mut [ScoredCandidate]) {
        let key = self.config.tie_break_key;
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| key.compare(&a.candidate, &b.candidate))
                .then_with(|| a.candidate.id.cmp(&b.candidate.id))
        });
    }

    fn walk(
        &self,
        mut scored: Vec<ScoredCandidate>,
        aum_total: f64,
        filtered_out: usize,
    ) -> Selection {
        self.sort(&mut scored);

        if aum_total <= 0.0 {
            info!(aum_total, "no capital to deploy");
        }

        let mut rows = Vec::new();
        let mut skipped = Vec::new();
        let mut running_total = 0.0_f64;

        for s in scored {
            let amount = s.candidate.amount;
            if amount == 0.0 {
                warn!(id = %s.candidate.id, "skipping zero-amount candidate");
                skipped.push(SkippedCandidate {
                    id: s.candidate.id.clone(),
                    amount,
                    score: s.score,
                    reason: SkipReason::ZeroAmount,
                });
                continue;
            }

            if running_total + amount <= aum_total {
                running_total += amount;
                rows.push(SelectedCandidate {
                    scored: s,
                    selected: true,
                    selected_amount_cum: running_total,
                });
            } else {
                let remaining = aum_total - running_total;
                debug!(
                    id = %s.candidate.id,
                    amount,
                    remaining,
                    "candidate exceeds remaining budget"
                );
                skipped.push(SkippedCandidate {
                    id: s.candidate.id.clone(),
                    amount,
                    score: s.score,
                    reason: SkipReason::ExceedsRemainingBudget { remaining },
                });
            }
        }

        info!(
            aum_total,
            admitted = rows.len(),
            skipped = skipped.len(),
            filtered_out,
            deployed = running_total,
            "selection complete"
        );

        Selection {
            aum_total,
            rows,
            skipped,
            filtered_out,
        }
    }
}

/// Run the full pipeline with an explicit configuration.
pub fn optimize(
    candidates: &[Candidate],
    aum_total: f64,
    target_term: Option<i64>,
    config: &AllocatorConfig,
) -> Result<Selection> {
    Allocator::new(config.clone())?.optimize(candidates, aum_total, target_term)
}

fn check_aum(aum_total: f64) -> Result<()> {
    if !aum_total.is_finite() {
        return Err(AllocationError::invalid_input(format!(
            "aum_total must be a finite number, got {}",
            aum_total
        )));
    }
    Ok(())
}

fn check_candidates<'a>(candidates: impl Iterator<Item = &'a Candidate>) -> Result<()> {
    let mut seen = HashSet::new();
    for c in candidates {
        c.validate()?;
        if !seen.insert(&c.id) {
            return Err(AllocationError::invalid_input(format!(
                "duplicate candidate id {}",
                c.id
            )));
        }
    }
    if seen.is_empty() {
        return Err(AllocationError::invalid_input("candidate table is empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn prescored(id: i64, amount: f64, score: f64) -> ScoredCandidate {
        ScoredCandidate::prescored(Candidate::new(id, amount, 0.2, 1_000.0, "p"), score)
    }

    fn allocator() -> Allocator {
        Allocator::with_default_config()
    }

    #[test]
    fn test_zero_aum_returns_empty_selection() {
        let candidates = vec![Candidate::new(1, 100.0, 0.2, 1_000.0, "p")];
        let selection = allocator().optimize(&candidates, 0.0, None).unwrap();

        assert!(selection.is_empty());
        assert_eq!(selection.deployed(), 0.0);
        assert_eq!(selection.skipped.len(), 1);
    }

    #[test]
    fn test_negative_aum_returns_empty_selection() {
        let candidates = vec![Candidate::new(1, 100.0, 0.2, 1_000.0, "p")];
        let selection = allocator().optimize(&candidates, -50.0, None).unwrap();
        assert!(selection.is_empty());
        assert_eq!(selection.remaining(), 0.0);
    }

    #[test]
    fn test_exact_fit_single_candidate() {
        let candidates = vec![Candidate::new(1, 100.0, 0.2, 1_000.0, "p")];
        let selection = allocator().optimize(&candidates, 100.0, None).unwrap();

        assert_eq!(selection.cumulative_amounts(), vec![100.0]);
        assert!(selection.rows[0].selected);
    }

    #[test]
    fn test_overflowing_second_candidate_is_skipped() {
        let scored = vec![prescored(1, 80.0, 10.0), prescored(2, 50.0, 5.0)];
        let selection = allocator().select_scored(scored, 100.0, None).unwrap();

        assert_eq!(selection.ids(), vec![&CandidateId::Int(1)]);
        assert_eq!(selection.cumulative_amounts(), vec![80.0]);
        assert_eq!(
            selection.skipped[0].reason,
            SkipReason::ExceedsRemainingBudget { remaining: 20.0 }
        );
    }

    #[test]
    fn test_second_candidate_fills_budget_exactly() {
        let scored = vec![prescored(1, 90.0, 10.0), prescored(2, 10.0, 5.0)];
        let selection = allocator().select_scored(scored, 100.0, None).unwrap();

        assert_eq!(selection.cumulative_amounts(), vec![90.0, 100.0]);
        assert!(selection.skipped.is_empty());
    }

    #[test]
    fn test_walk_continues_past_rejection() {
        // best score is too large; the smaller ones behind it still fit
        let scored = vec![
            prescored(1, 60.0, 9.0),
            prescored(2, 50.0, 8.0),
            prescored(3, 30.0, 7.0),
            prescored(4, 10.0, 1.0),
        ];
        let selection = allocator().select_scored(scored, 100.0, None).unwrap();

        assert_eq!(
            selection.ids(),
            vec![&CandidateId::Int(1), &CandidateId::Int(3), &CandidateId::Int(4)]
        );
        assert_eq!(selection.cumulative_amounts(), vec![60.0, 90.0, 100.0]);
    }

    #[test]
    fn test_oversize_candidate_skipped_alone() {
        let scored = vec![prescored(1, 500.0, 10.0), prescored(2, 40.0, 1.0)];
        let selection = allocator().select_scored(scored, 100.0, None).unwrap();
        assert_eq!(selection.ids(), vec![&CandidateId::Int(2)]);
    }

    #[test]
    fn test_equal_scores_break_by_id() {
        let scored = vec![
            prescored(3, 40.0, 5.0),
            prescored(1, 40.0, 5.0),
            prescored(2, 40.0, 5.0),
        ];
        let selection = allocator().select_scored(scored, 80.0, None).unwrap();
        assert_eq!(
            selection.ids(),
            vec![&CandidateId::Int(1), &CandidateId::Int(2)]
        );
    }

    #[test]
    fn test_configured_tie_break_key() {
        let config = AllocatorConfig {
            tie_break_key: TieBreakKey::Amount,
            ..AllocatorConfig::default()
        };
        let allocator = Allocator::new(config).unwrap();
        let scored = vec![
            prescored(1, 70.0, 5.0),
            prescored(2, 20.0, 5.0),
            prescored(3, 20.0, 5.0),
        ];
        let selection = allocator.select_scored(scored, 1_000.0, None).unwrap();
        assert_eq!(
            selection.ids(),
            vec![&CandidateId::Int(2), &CandidateId::Int(3), &CandidateId::Int(1)]
        );
    }

    #[test]
    fn test_target_term_filters_before_scoring() {
        let candidates = vec![
            Candidate::new(1, 10.0, 0.3, 1_000.0, "p").with_term(90),
            Candidate::new(2, 10.0, 0.3, 1_000.0, "p").with_term(30),
            Candidate::new(3, 10.0, 0.3, 1_000.0, "p"),
        ];
        let selection = allocator().optimize(&candidates, 100.0, Some(90)).unwrap();

        assert_eq!(selection.ids(), vec![&CandidateId::Int(1)]);
        assert_eq!(selection.filtered_out, 2);
    }

    #[test]
    fn test_target_term_with_no_match_is_empty_not_error() {
        let candidates = vec![Candidate::new(1, 10.0, 0.3, 1_000.0, "p").with_term(30)];
        let selection = allocator().optimize(&candidates, 100.0, Some(90)).unwrap();
        assert!(selection.is_empty());
        assert_eq!(selection.filtered_out, 1);
    }

    #[test]
    fn test_filtered_out_candidates_do_not_need_bucketing() {
        // apr below the first edge would fail bucketing, but the row is
        // filtered out first
        let candidates = vec![
            Candidate::new(1, 10.0, 0.3, 1_000.0, "p").with_term(90),
            Candidate::new(2, 10.0, -1.0, 1_000.0, "p").with_term(30),
        ];
        let selection = allocator().optimize(&candidates, 100.0, Some(90)).unwrap();
        assert_eq!(selection.len(), 1);
    }

    #[test]
    fn test_term_tolerance() {
        let config = AllocatorConfig {
            term_tolerance: 5,
            ..AllocatorConfig::default()
        };
        let allocator = Allocator::new(config).unwrap();
        let candidates = vec![
            Candidate::new(1, 10.0, 0.3, 1_000.0, "p").with_term(85),
            Candidate::new(2, 10.0, 0.3, 1_000.0, "p").with_term(96),
        ];
        let selection = allocator.optimize(&candidates, 100.0, Some(90)).unwrap();
        assert_eq!(selection.ids(), vec![&CandidateId::Int(1)]);
    }

    #[test]
    fn test_zero_amount_candidate_ignored() {
        let scored = vec![prescored(1, 0.0, 10.0), prescored(2, 10.0, 1.0)];
        let selection = allocator().select_scored(scored, 100.0, None).unwrap();

        assert_eq!(selection.ids(), vec![&CandidateId::Int(2)]);
        assert_eq!(selection.skipped[0].reason, SkipReason::ZeroAmount);
    }

    #[test]
    fn test_unbucketable_apr_is_error() {
        let candidates = vec![Candidate::new(1, 10.0, -0.2, 1_000.0, "p")];
        let err = allocator().optimize(&candidates, 100.0, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnbucketableValue);
    }

    #[test]
    fn test_invalid_inputs() {
        let candidates = vec![Candidate::new(1, 10.0, 0.2, 1_000.0, "p")];
        assert_eq!(
            allocator()
                .optimize(&candidates, f64::NAN, None)
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            allocator().optimize(&[], 100.0, None).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );

        let dupes = vec![
            Candidate::new(1, 10.0, 0.2, 1_000.0, "p"),
            Candidate::new(1, 20.0, 0.2, 1_000.0, "q"),
        ];
        assert_eq!(
            allocator().optimize(&dupes, 100.0, None).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );

        let nan_score = vec![prescored(1, 10.0, f64::NAN)];
        assert!(allocator().select_scored(nan_score, 100.0, None).is_err());
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = AllocatorConfig {
            term_tolerance: -3,
            ..AllocatorConfig::default()
        };
        assert_eq!(
            Allocator::new(config).unwrap_err().kind(),
            ErrorKind::InvalidConfig
        );
    }

    #[test]
    fn test_row_fed_back_from_earlier_run_emits_each_column_once() {
        let row: RawCandidate = serde_json::from_value(serde_json::json!({
            "id": 1, "amount": 10.0, "apr": 0.3, "line": 1_000.0, "payer": "p",
            "score": 99, "selected": false, "apr_bucket": 1, "line_bucket": 1,
            "payer_bucket": 1, "selected_amount_cum": 0.0
        }))
        .unwrap();
        let selection = allocator().optimize_rows(vec![row], 100.0, None).unwrap();

        let json = serde_json::to_string(&selection.rows[0]).unwrap();
        for column in crate::allocation::candidate::OUTPUT_COLUMNS {
            let key = format!("\"{}\":", column);
            assert_eq!(json.matches(&key).count(), 1, "{column} in {json}");
        }
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["selected"], serde_json::json!(true));
        assert_eq!(value["selected_amount_cum"], serde_json::json!(10.0));
    }

    #[test]
    fn test_input_left_untouched() {
        let candidates = vec![
            Candidate::new(2, 60.0, 0.1, 1_000.0, "p"),
            Candidate::new(1, 60.0, 0.3, 1_000.0, "q"),
        ];
        let before = candidates.clone();
        let _ = allocator().optimize(&candidates, 100.0, None).unwrap();
        assert_eq!(candidates, before);
    }

    #[test]
    fn test_free_function_matches_allocator() {
        let candidates = vec![
            Candidate::new(1, 60.0, 0.1, 1_000.0, "p"),
            Candidate::new(2, 30.0, 0.3, 20_000.0, "q"),
        ];
        let config = AllocatorConfig::default();
        let a = optimize(&candidates, 100.0, None, &config).unwrap();
        let b = Allocator::new(config).unwrap().optimize(&candidates, 100.0, None).unwrap();
        assert_eq!(a, b);
    }
}
