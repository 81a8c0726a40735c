//! Strata engine: retrieval, compaction and context assembly over the
//! store and index crates, fronted by the [`MemoryEngine`] facade.
//!
//! The facade enforces the ordering contracts between components:
//! a turn is durable and indexed before `append_turn` returns, compaction
//! is single-flight per session and triggered by the unsummarized-turn
//! count, and context builds are pure reads over a snapshot.

pub mod assembler;
pub mod compactor;
pub mod engine;
pub mod extract;
pub mod retriever;

pub use assembler::{
    AssemblyInput, ContextAssembler, ContextPayload, DropRecord, TierStats,
};
pub use compactor::{CompactionOutcome, CompactionReport, Compactor};
pub use engine::{AppendOutcome, MemoryEngine};
pub use extract::{FactExtractor, RuleBasedExtractor};
pub use retriever::Retriever;
