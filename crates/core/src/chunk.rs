//! Retrievable units and search hits.
//!
//! A `MemoryChunk` is a segment of the permanent memory document prepared
//! for retrieval. Chunks are derived state: regenerated wholesale whenever
//! the document changes, never patched individually.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A retrievable segment of the permanent memory document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryChunk {
    /// Content-derived identifier (hex prefix of the section hash).
    pub id: String,

    /// The section heading this chunk came from, empty if none.
    pub heading: String,

    /// The chunk text, heading line included.
    pub text: String,
}

/// Where a search hit came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum SourceId {
    /// A conversation turn, by store id.
    Turn(i64),
    /// A permanent-memory chunk, by chunk id.
    Chunk(String),
}

/// One ranked retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredHit {
    pub source: SourceId,
    pub text: String,

    /// Combined lexical + recency score; higher is better.
    pub score: f32,

    /// Source timestamp. `None` for static permanent-memory chunks, which
    /// receive the neutral recency term instead of an age penalty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
}
