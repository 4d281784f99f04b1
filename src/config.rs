//! Allocator configuration
//!
//! Bucket edges, score weights and tie-break policy. Supplied externally
//! (TOML file or code), never read from global state.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::allocation::bucket::BucketEdges;
use crate::allocation::score::ScoreWeights;
use crate::allocation::selector::TieBreakKey;
use crate::error::{AllocationError, Result};

pub const CONFIG_PATH_ENV: &str = "ALLOCATOR_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "allocator.toml";

/// Policy driving bucketing, scoring and selection order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Lower edges of the APR (risk) tiers
    #[serde(default = "default_apr_edges")]
    pub apr_bucket_edges: BucketEdges,

    /// Lower edges of the credit-line (exposure size) tiers
    #[serde(default = "default_line_edges")]
    pub line_bucket_edges: BucketEdges,

    /// Lower edges of the payer concentration tiers, applied to the
    /// aggregate amount requested per payer
    #[serde(default = "default_payer_edges")]
    pub payer_bucket_edges: BucketEdges,

    /// Secondary sort key among equal scores; candidate id always breaks
    /// any remaining tie
    #[serde(default)]
    pub tie_break_key: TieBreakKey,

    /// Accepted distance from `target_term` when filtering
    #[serde(default)]
    pub term_tolerance: i64,

    #[serde(default)]
    pub score_weights: ScoreWeights,
}

fn default_apr_edges() -> BucketEdges {
    BucketEdges::from_sorted(vec![0.0, 0.12, 0.18, 0.24, 0.36])
}

fn default_line_edges() -> BucketEdges {
    BucketEdges::from_sorted(vec![0.0, 10_000.0, 50_000.0, 250_000.0])
}

fn default_payer_edges() -> BucketEdges {
    BucketEdges::from_sorted(vec![0.0, 100_000.0, 500_000.0, 2_000_000.0])
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            apr_bucket_edges: default_apr_edges(),
            line_bucket_edges: default_line_edges(),
            payer_bucket_edges: default_payer_edges(),
            tie_break_key: TieBreakKey::default(),
            term_tolerance: 0,
            score_weights: ScoreWeights::default(),
        }
    }
}

impl AllocatorConfig {
    /// Stronger concentration penalty; prefers spreading capital over payers
    /// even at some cost in APR.
    pub fn conservative() -> Self {
        Self {
            score_weights: ScoreWeights {
                apr: 1.0,
                line: 0.05,
                payer: -1.5,
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.apr_bucket_edges.validate("apr_bucket_edges")?;
        self.line_bucket_edges.validate("line_bucket_edges")?;
        self.payer_bucket_edges.validate("payer_bucket_edges")?;
        self.score_weights.validate()?;
        if self.term_tolerance < 0 {
            return Err(AllocationError::invalid_config(format!(
                "term_tolerance must be non-negative, got {}",
                self.term_tolerance
            )));
        }
        Ok(())
    }

    /// Parse and validate TOML text. Missing fields take their defaults.
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(contents).context("parsing allocator config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading allocator config {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("in {}", path.display()))
    }

    /// Config file named by `ALLOCATOR_CONFIG_PATH` (or `allocator.toml`),
    /// if one exists. Reads `.env` first.
    pub fn env_path() -> Option<PathBuf> {
        dotenv::dotenv().ok();

        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        if path.exists() {
            Some(path)
        } else {
            tracing::debug!("Using default allocator config ({} not found)", path.display());
            None
        }
    }

    /// Load from `ALLOCATOR_CONFIG_PATH` (or `allocator.toml`), falling back
    /// to defaults when no file is present.
    pub fn from_env() -> anyhow::Result<Self> {
        match Self::env_path() {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
