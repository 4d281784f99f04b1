//! Selection summary and audit digest

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::bucket::Tier;
use super::selector::Selection;

pub const SELECTION_DIGEST_SCHEMA: &str = "aum_selection_v1";

/// Aggregate view of one selection, for logs and reporting layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub aum_total: f64,
    pub deployed: f64,
    pub remaining: f64,
    /// deployed / aum_total, 0 when there was no capital
    pub utilization: f64,
    pub admitted_count: usize,
    pub skipped_count: usize,
    pub filtered_out: usize,
    /// Deployed capital per APR tier (only for bucketed rows)
    pub deployed_by_apr_bucket: BTreeMap<Tier, f64>,
    /// Deployed capital per line tier (only for bucketed rows)
    pub deployed_by_line_bucket: BTreeMap<Tier, f64>,
    pub deployed_by_payer: BTreeMap<String, f64>,
    /// Largest single-payer share of deployed capital
    pub max_payer_share: f64,
}

impl Selection {
    pub fn summary(&self) -> AllocationSummary {
        let deployed = self.deployed();

        let mut by_apr = BTreeMap::new();
        let mut by_line = BTreeMap::new();
        let mut by_payer: BTreeMap<String, f64> = BTreeMap::new();

        for row in &self.rows {
            let c = row.candidate();
            if let Some(b) = row.scored.buckets {
                *by_apr.entry(b.apr_bucket).or_insert(0.0) += c.amount;
                *by_line.entry(b.line_bucket).or_insert(0.0) += c.amount;
            }
            *by_payer.entry(c.payer.clone()).or_insert(0.0) += c.amount;
        }

        let max_payer_share = if deployed > 0.0 {
            by_payer.values().copied().fold(0.0, f64::max) / deployed
        } else {
            0.0
        };

        AllocationSummary {
            aum_total: self.aum_total,
            deployed,
            remaining: self.remaining(),
            utilization: if self.aum_total > 0.0 {
                deployed / self.aum_total
            } else {
                0.0
            },
            admitted_count: self.rows.len(),
            skipped_count: self.skipped.len(),
            filtered_out: self.filtered_out,
            deployed_by_apr_bucket: by_apr,
            deployed_by_line_bucket: by_line,
            deployed_by_payer: by_payer,
            max_payer_share,
        }
    }

    /// SHA-256 over the admitted rows in admission order. Identical inputs
    /// and configuration always reproduce the same digest.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();

        hasher.update(SELECTION_DIGEST_SCHEMA.as_bytes());
        hasher.update(self.aum_total.to_le_bytes());

        for row in &self.rows {
            let c = row.candidate();
            hasher.update(c.id.to_string().as_bytes());
            hasher.update([0u8]);
            hasher.update(c.amount.to_le_bytes());
            hasher.update(row.scored.score.to_le_bytes());
            hasher.update(row.selected_amount_cum.to_le_bytes());
        }

        hex::encode(hasher.finalize())
    }
}
