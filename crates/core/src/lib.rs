//! # Strata Core
//!
//! Domain types, traits, and error definitions for the Strata context
//! memory engine. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Pluggable seams (token counting, fact extraction) are defined as traits
//! here or in the crate that owns the pipeline. Implementations live in
//! their respective crates. All crates depend inward on core.

pub mod chunk;
pub mod error;
pub mod fact;
pub mod token;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use chunk::{MemoryChunk, ScoredHit, SourceId};
pub use error::{AssemblyError, CompactError, Error, IndexError, Result, StoreError};
pub use fact::{ExtractedFacts, FactCategory};
pub use token::{HeuristicCounter, TokenCounter};
pub use turn::{Role, SessionId, Summary, Turn, TurnRange};
