//! Derived full-text index state for the Strata memory engine.
//!
//! Everything in this crate can be rebuilt from `strata-store` without data
//! loss. Index maintenance is explicit and ordered: the engine calls
//! `index_turn` right after a successful append, and `reindex_permanent`
//! after compaction or on an external document-changed notification.

pub mod chunker;
pub mod indexer;
pub mod watch;

pub use chunker::chunk_markdown;
pub use indexer::{ChunkHit, Indexer, TurnHit};
pub use watch::{DocumentChanged, spawn_watcher};
