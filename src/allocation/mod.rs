//! Allocation Module - AUM Capital Deployment
//!
//! This module handles:
//! 1. Boundary validation of candidate rows
//! 2. Risk, exposure and payer-concentration bucketing
//! 3. Composite scoring of bucket tiers
//! 4. Greedy first-fit selection under the AUM ceiling
//!
//! Data flows one way: rows -> candidates -> buckets -> scores -> selection.

pub mod bucket;
pub mod candidate;
pub mod report;
pub mod score;
pub mod selector;

pub use bucket::{assign_buckets, BucketAssignment, BucketEdges, BucketedCandidate, Tier};
pub use candidate::{candidates_from_rows, Candidate, CandidateId, RawCandidate};
pub use report::AllocationSummary;
pub use score::{compute_score, ScoreWeights, ScoredCandidate};
pub use selector::{
    optimize, Allocator, Selection, SelectedCandidate, SkipReason, SkippedCandidate, TieBreakKey,
};
