//! Allocation error taxonomy

use thiserror::Error;

/// Coarse classification of an [`AllocationError`], for callers that only
/// need to branch on the kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    UnbucketableValue,
    InvalidConfig,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationError {
    /// Missing or malformed candidate data, or an unusable `aum_total`.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A candidate value sits below the first configured edge of a dimension.
    #[error("Unbucketable value: candidate {candidate_id} has {dimension} = {value} outside configured edges (first edge {lowest_edge})")]
    UnbucketableValue {
        candidate_id: String,
        dimension: &'static str,
        value: f64,
        lowest_edge: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl AllocationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AllocationError::InvalidInput(_) => ErrorKind::InvalidInput,
            AllocationError::UnbucketableValue { .. } => ErrorKind::UnbucketableValue,
            AllocationError::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        AllocationError::InvalidInput(msg.into())
    }

    pub(crate) fn invalid_config(msg: impl Into<String>) -> Self {
        AllocationError::InvalidConfig(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AllocationError>;
