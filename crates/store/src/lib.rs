//! Durable storage for the Strata memory engine.
//!
//! Three persistence surfaces, all owned exclusively by this crate:
//! - `SqliteStore` — turns and summaries in a WAL-mode SQLite database
//! - `DailyLog` — one append-only markdown file per calendar date (L2)
//! - `PermanentDocument` — the long-lived, human-editable memory file (L3)
//!
//! Index state is derived and lives in `strata-index`; it can always be
//! rebuilt from what this crate persists.

pub mod daily_log;
pub mod permanent;
pub mod sqlite;

pub use daily_log::{DailyLog, DailyLogEntry};
pub use permanent::{PermanentDocument, Section, STANDARD_SECTIONS};
pub use sqlite::SqliteStore;
