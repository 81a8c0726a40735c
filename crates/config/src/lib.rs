//! Configuration for the Strata memory engine.
//!
//! One explicit structure with enumerated, named fields and documented
//! defaults, passed to component constructors. Loadable from a TOML file;
//! every field has a serde default so a partial (or absent) file is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strata_core::{Error, Result};

/// The root engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Storage locations and SQLite tuning.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Compaction triggering and retry policy.
    #[serde(default)]
    pub compaction: CompactionConfig,

    /// Hybrid retrieval weights and floors.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Context assembly budgets and caps.
    #[serde(default)]
    pub assembly: AssemblyConfig,
}

impl EngineConfig {
    /// Load from a TOML file. A missing file yields pure defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::Config {
                    message: format!("failed to read {}: {e}", path.display()),
                });
            }
        };
        toml::from_str(&text).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {e}", path.display()),
        })
    }

    /// Validate cross-field invariants. Called by the engine constructor.
    pub fn validate(&self) -> Result<()> {
        if self.compaction.every_turns == 0 {
            return Err(Error::Config {
                message: "compaction.every_turns must be at least 1".into(),
            });
        }
        if self.retrieval.lexical_weight < 0.0 || self.retrieval.recency_weight < 0.0 {
            return Err(Error::Config {
                message: "retrieval weights must be non-negative".into(),
            });
        }
        if self.retrieval.lexical_weight + self.retrieval.recency_weight <= 0.0 {
            return Err(Error::Config {
                message: "at least one retrieval weight must be positive".into(),
            });
        }
        if self.assembly.short_term_cap == 0 {
            return Err(Error::Config {
                message: "assembly.short_term_cap must be at least 1".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path, created if missing.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Workspace directory holding daily logs (`memory/YYYY-MM-DD.md`)
    /// and the permanent memory document (`MEMORY.md`).
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// SQLite busy timeout in seconds; storage calls surface failure
    /// rather than hang.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,

    /// Connection pool size (one writer, the rest readers under WAL).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> String {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    format!("{home}/.strata/strata.db")
}
fn default_workspace() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".strata").join("workspace")
}
fn default_busy_timeout_secs() -> u64 {
    10
}
fn default_max_connections() -> u32 {
    4
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            workspace: default_workspace(),
            busy_timeout_secs: default_busy_timeout_secs(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Unsummarized-turn threshold that triggers compaction.
    #[serde(default = "default_every_turns")]
    pub every_turns: usize,

    /// Bounded retry attempts for the reindex step.
    #[serde(default = "default_reindex_retries")]
    pub reindex_retries: u32,

    /// Backoff between reindex retries, in milliseconds.
    #[serde(default = "default_reindex_backoff_ms")]
    pub reindex_backoff_ms: u64,
}

fn default_every_turns() -> usize {
    15
}
fn default_reindex_retries() -> u32 {
    3
}
fn default_reindex_backoff_ms() -> u64 {
    100
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            every_turns: default_every_turns(),
            reindex_retries: default_reindex_retries(),
            reindex_backoff_ms: default_reindex_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Weight of the normalized BM25 relevance term.
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,

    /// Weight of the recency term.
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,

    /// Half-life of the recency decay, in hours.
    #[serde(default = "default_recency_half_life_hours")]
    pub recency_half_life_hours: f32,

    /// Minimum combined score a candidate must reach to be returned.
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Lexical candidates fetched per index = limit × this factor,
    /// so recency re-ranking has room to work.
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
}

fn default_lexical_weight() -> f32 {
    0.7
}
fn default_recency_weight() -> f32 {
    0.3
}
fn default_recency_half_life_hours() -> f32 {
    24.0
}
fn default_min_score() -> f32 {
    0.05
}
fn default_overfetch_factor() -> usize {
    3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_weight: default_lexical_weight(),
            recency_weight: default_recency_weight(),
            recency_half_life_hours: default_recency_half_life_hours(),
            min_score: default_min_score(),
            overfetch_factor: default_overfetch_factor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Token budget used when the caller does not supply one.
    #[serde(default = "default_token_budget")]
    pub default_token_budget: usize,

    /// Maximum recent unsummarized turns in the short-term tier.
    #[serde(default = "default_short_term_cap")]
    pub short_term_cap: usize,

    /// How many daily-log days the mid-term tier loads (today counts).
    #[serde(default = "default_daily_log_days")]
    pub daily_log_days: usize,

    /// Maximum retrieved passages requested from the retriever.
    #[serde(default = "default_retrieved_limit")]
    pub retrieved_limit: usize,
}

fn default_token_budget() -> usize {
    4096
}
fn default_short_term_cap() -> usize {
    20
}
fn default_daily_log_days() -> usize {
    2
}
fn default_retrieved_limit() -> usize {
    5
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            default_token_budget: default_token_budget(),
            short_term_cap: default_short_term_cap(),
            daily_log_days: default_daily_log_days(),
            retrieved_limit: default_retrieved_limit(),
        }
    }
}
