//! Turn and Summary domain types.
//!
//! A `Turn` is one message in a session; a `Summary` is a cached compaction
//! result covering a contiguous turn-id range. Turn ids are assigned by the
//! store and are strictly increasing within a session — that ordering is the
//! delivery order everywhere else in the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a session (one conversation thread).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role that emitted a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    /// Parse a persisted role string. Returns `None` for anything outside
    /// the enumerated domain — callers map that to a constraint violation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Store-assigned id; strictly increasing within a session.
    pub id: i64,

    /// The session this turn belongs to.
    pub session: SessionId,

    /// Who emitted the turn.
    pub role: Role,

    /// Emitting agent identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    /// The text content.
    pub content: String,

    /// Token count of `content` under the engine's token counter.
    pub tokens: usize,

    /// Whether this turn has been folded into a summary. Transitions
    /// false → true exactly once, set by the compactor.
    pub summarized: bool,

    /// Creation timestamp.
    pub ts: DateTime<Utc>,
}

/// An inclusive turn-id range, rendered as `first-last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRange {
    pub first: i64,
    pub last: i64,
}

impl TurnRange {
    pub fn new(first: i64, last: i64) -> Self {
        Self { first, last }
    }

    /// Range spanning a non-empty, id-ordered slice of turns.
    pub fn covering(turns: &[Turn]) -> Option<Self> {
        let first = turns.first()?.id;
        let last = turns.last()?.id;
        Some(Self { first, last })
    }

    pub fn contains(&self, id: i64) -> bool {
        self.first <= id && id <= self.last
    }

    /// Parse the persisted `first-last` form.
    pub fn parse(s: &str) -> Option<Self> {
        let (a, b) = s.split_once('-')?;
        Some(Self {
            first: a.trim().parse().ok()?,
            last: b.trim().parse().ok()?,
        })
    }
}

impl std::fmt::Display for TurnRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.first, self.last)
    }
}

/// A cached compaction result for a contiguous turn range within one
/// session. Immutable once created; superseded by later summaries, never
/// edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub session: SessionId,
    pub content: String,
    pub range: TurnRange,
    pub ts: DateTime<Utc>,
}
