//! AUM Allocator Library
//!
//! Deterministic capital allocation over a book of loan candidates.
//! Exposes the allocation pipeline for the `allocate` binary and for
//! callers embedding it as a library.

pub mod allocation;
pub mod config;
pub mod error;

pub use allocation::{
    assign_buckets, compute_score, optimize, AllocationSummary, Allocator, Candidate,
    CandidateId, RawCandidate, Selection, TieBreakKey,
};
pub use config::AllocatorConfig;
pub use error::{AllocationError, ErrorKind, Result};
