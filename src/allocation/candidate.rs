//! Candidate records and the boundary check that produces them.
//!
//! Upstream ingestion hands over loosely typed rows ([`RawCandidate`]). They
//! are checked once here; everything past this module works with
//! [`Candidate`] and never looks at a column by name again.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::debug;

use crate::error::{AllocationError, Result};

/// Columns the allocator writes on every selected row. Pass-through columns
/// may not reuse them.
pub const OUTPUT_COLUMNS: [&str; 6] = [
    "apr_bucket",
    "line_bucket",
    "payer_bucket",
    "score",
    "selected",
    "selected_amount_cum",
];

/// Stable candidate identifier. Integer ids order numerically and sort ahead
/// of text ids, so mixed tables still have a total order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CandidateId {
    Int(i64),
    Text(String),
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateId::Int(v) => write!(f, "{}", v),
            CandidateId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for CandidateId {
    fn from(v: i64) -> Self {
        CandidateId::Int(v)
    }
}

impl From<&str> for CandidateId {
    fn from(s: &str) -> Self {
        CandidateId::Text(s.to_string())
    }
}

impl From<String> for CandidateId {
    fn from(s: String) -> Self {
        CandidateId::Text(s)
    }
}

/// One loan or facility eligible for funding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    /// Capital required to fund this candidate
    pub amount: f64,
    /// Annual rate, only read for bucketing
    pub apr: f64,
    /// Credit line / exposure size
    pub line: f64,
    /// Counterparty identifier
    pub payer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<i64>,
    /// Upstream columns the optimizer does not read; carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Candidate {
    pub fn new(
        id: impl Into<CandidateId>,
        amount: f64,
        apr: f64,
        line: f64,
        payer: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            amount,
            apr,
            line,
            payer: payer.into(),
            term: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_term(mut self, term: i64) -> Self {
        self.term = Some(term);
        self
    }

    /// Re-check the numeric columns the optimizer reads.
    pub fn validate(&self) -> Result<()> {
        if !(self.amount.is_finite() && self.amount >= 0.0) {
            return Err(AllocationError::invalid_input(format!(
                "candidate {}: amount must be a finite non-negative number, got {}",
                self.id, self.amount
            )));
        }
        if !self.apr.is_finite() {
            return Err(AllocationError::invalid_input(format!(
                "candidate {}: apr must be finite, got {}",
                self.id, self.apr
            )));
        }
        if !self.line.is_finite() {
            return Err(AllocationError::invalid_input(format!(
                "candidate {}: line must be finite, got {}",
                self.id, self.line
            )));
        }
        if let Some(column) = self.extra.keys().find(|k| OUTPUT_COLUMNS.contains(&k.as_str())) {
            return Err(AllocationError::invalid_input(format!(
                "candidate {}: extra column '{}' collides with an output column",
                self.id, column
            )));
        }
        Ok(())
    }

    /// Build a candidate from an untyped upstream row.
    pub fn try_from_raw(raw: RawCandidate) -> Result<Self> {
        let id = match raw.id {
            Some(Value::String(s)) => CandidateId::Text(s),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(v) => CandidateId::Int(v),
                None => {
                    return Err(AllocationError::invalid_input(format!(
                        "id must be an integer or string, got {}",
                        n
                    )))
                }
            },
            Some(other) => {
                return Err(AllocationError::invalid_input(format!(
                    "id must be an integer or string, got {}",
                    other
                )))
            }
            None => return Err(AllocationError::invalid_input("missing required column 'id'")),
        };

        let amount = numeric_column(&id, "amount", raw.amount)?;
        let apr = numeric_column(&id, "apr", raw.apr)?;
        let line = numeric_column(&id, "line", raw.line)?;

        let payer = match raw.payer {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(AllocationError::invalid_input(format!(
                    "candidate {}: payer must be a string, got {}",
                    id, other
                )))
            }
            None => {
                return Err(AllocationError::invalid_input(format!(
                    "candidate {}: missing required column 'payer'",
                    id
                )))
            }
        };

        let term = match raw.term {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_i64() {
                Some(v) => Some(v),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(f as i64),
                    _ => {
                        return Err(AllocationError::invalid_input(format!(
                            "candidate {}: term must be an integer, got {}",
                            id, n
                        )))
                    }
                },
            },
            Some(other) => {
                return Err(AllocationError::invalid_input(format!(
                    "candidate {}: term must be an integer, got {}",
                    id, other
                )))
            }
        };

        // stale outputs of an earlier run are dropped, the allocator rewrites them
        let mut extra = raw.extra;
        extra.retain(|column, _| {
            let stale = OUTPUT_COLUMNS.contains(&column.as_str());
            if stale {
                debug!(id = %id, column = %column, "dropping stale output column");
            }
            !stale
        });

        let candidate = Candidate {
            id,
            amount,
            apr,
            line,
            payer,
            term,
            extra,
        };
        candidate.validate()?;
        Ok(candidate)
    }
}

fn numeric_column(id: &CandidateId, column: &str, value: Option<Value>) -> Result<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| {
            AllocationError::invalid_input(format!(
                "candidate {}: column '{}' is not representable as f64",
                id, column
            ))
        }),
        Some(other) => Err(AllocationError::invalid_input(format!(
            "candidate {}: column '{}' must be numeric, got {}",
            id, column, other
        ))),
        None => Err(AllocationError::invalid_input(format!(
            "candidate {}: missing required column '{}'",
            id, column
        ))),
    }
}

/// One row as delivered by the ingestion layer. Every column is optional so
/// that missing data is reported by [`Candidate::try_from_raw`] with context
/// instead of failing inside the deserializer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCandidate {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub apr: Option<Value>,
    #[serde(default)]
    pub line: Option<Value>,
    #[serde(default)]
    pub payer: Option<Value>,
    #[serde(default)]
    pub term: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Convert a whole upstream table, failing on the first bad row.
pub fn candidates_from_rows(rows: Vec<RawCandidate>) -> Result<Vec<Candidate>> {
    if rows.is_empty() {
        return Err(AllocationError::invalid_input("candidate table is empty"));
    }

    let mut seen = HashSet::with_capacity(rows.len());
    let mut candidates = Vec::with_capacity(rows.len());
    for (row, raw) in rows.into_iter().enumerate() {
        let candidate = Candidate::try_from_raw(raw).map_err(|e| match e {
            AllocationError::InvalidInput(msg) => {
                AllocationError::InvalidInput(format!("row {}: {}", row, msg))
            }
            other => other,
        })?;
        if !seen.insert(candidate.id.clone()) {
            return Err(AllocationError::invalid_input(format!(
                "row {}: duplicate candidate id {}",
                row, candidate.id
            )));
        }
        candidates.push(candidate);
    }
    Ok(candidates)
}
