//! Daily log — the dated mid-term memory tier (L2).
//!
//! One markdown file per calendar date under `{workspace}/memory/`, named
//! `YYYY-MM-DD.md`. The compactor appends timestamped `## [HH:MM]` blocks;
//! files are never rewritten once their day has closed.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use strata_core::StoreError;
use tracing::debug;

/// One appended block in a daily log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyLogEntry {
    /// The `[HH:MM] Heading` line, brackets included.
    pub heading: String,
    /// Block body, trimmed.
    pub body: String,
}

/// Append-only, per-date markdown log files.
pub struct DailyLog {
    dir: PathBuf,
}

impl DailyLog {
    /// Logs live under `{workspace}/memory/`.
    pub fn new(workspace: &Path) -> Self {
        Self {
            dir: workspace.join("memory"),
        }
    }

    /// Stable external path convention: one file per calendar date.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{date}.md"))
    }

    /// Append one timestamped block to the log for `ts`'s date.
    /// Durable before return.
    pub fn append(&self, ts: DateTime<Utc>, heading: &str, content: &str) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| StoreError::Io(format!("create log dir: {e}")))?;

        let title = if heading.is_empty() {
            format!("[{}] Compaction", ts.format("%H:%M"))
        } else {
            format!("[{}] {heading}", ts.format("%H:%M"))
        };
        let entry = format!("\n## {title}\n\n{}\n", content.trim());

        let path = self.path_for(ts.date_naive());
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::Io(format!("open {}: {e}", path.display())))?;
        file.write_all(entry.as_bytes())
            .map_err(|e| StoreError::Io(format!("append {}: {e}", path.display())))?;
        file.sync_all()
            .map_err(|e| StoreError::Io(format!("sync {}: {e}", path.display())))?;

        debug!(date = %ts.date_naive(), heading = %title, "daily log block appended");
        Ok(())
    }

    /// Parsed blocks for one date. Empty (not an error) when no file exists.
    pub fn read(&self, date: NaiveDate) -> Result<Vec<DailyLogEntry>, StoreError> {
        let path = self.path_for(date);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(format!("read {}: {e}", path.display()))),
        };
        Ok(parse_blocks(&text))
    }

    /// The last `n_days` of logs (ending at `today`) stitched together,
    /// oldest first, with a per-day header. Empty string when nothing exists.
    pub fn load_recent(&self, today: NaiveDate, n_days: usize) -> Result<String, StoreError> {
        let mut parts = Vec::new();
        for offset in (0..n_days as i64).rev() {
            let date = today - Duration::days(offset);
            let path = self.path_for(date);
            let text = match std::fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::Io(format!("read {}: {e}", path.display()))),
            };
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                parts.push(format!("# Daily Log: {date}\n\n{trimmed}"));
            }
        }
        Ok(parts.join("\n\n---\n\n"))
    }
}

/// Split a log file into its `## ` blocks.
fn parse_blocks(text: &str) -> Vec<DailyLogEntry> {
    let mut entries = Vec::new();
    let mut heading: Option<String> = None;
    let mut body: Vec<&str> = Vec::new();

    let mut flush = |heading: &mut Option<String>, body: &mut Vec<&str>, out: &mut Vec<DailyLogEntry>| {
        if let Some(h) = heading.take() {
            out.push(DailyLogEntry {
                heading: h,
                body: body.join("\n").trim().to_string(),
            });
        }
        body.clear();
    };

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("## ") {
            flush(&mut heading, &mut body, &mut entries);
            heading = Some(rest.trim().to_string());
        } else if heading.is_some() {
            body.push(line);
        }
    }
    flush(&mut heading, &mut body, &mut entries);
    entries
}
