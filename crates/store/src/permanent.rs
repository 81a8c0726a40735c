//! The permanent memory document — the long-term tier (L3).
//!
//! A single human-editable markdown file (`{workspace}/MEMORY.md`) organized
//! into `## ` sections. The compactor merges extracted facts into it;
//! external edits are legal and trigger reindexing through the watch
//! channel in `strata-index`.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use strata_core::StoreError;
use tracing::debug;

/// Standard sections, kept first and in this order when the file is
/// rebuilt. Unknown sections follow in their existing order.
pub const STANDARD_SECTIONS: [&str; 4] =
    ["KEY FACTS", "USER PREFERENCES", "OPEN TASKS", "CONCLUSIONS"];

/// One `## ` section of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: String,
    pub content: String,
}

/// Handle on the permanent memory document.
pub struct PermanentDocument {
    path: PathBuf,
}

impl PermanentDocument {
    /// Fixed path convention: `{workspace}/MEMORY.md`.
    pub fn new(workspace: &Path) -> Self {
        Self {
            path: workspace.join("MEMORY.md"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole document text. Empty string when the file does not exist.
    pub fn read_text(&self) -> Result<String, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(t) => Ok(t),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(StoreError::Io(format!("read {}: {e}", self.path.display()))),
        }
    }

    /// Parsed sections in document order.
    pub fn sections(&self) -> Result<Vec<Section>, StoreError> {
        Ok(parse_sections(&self.read_text()?))
    }

    /// Upsert one section by heading. Content is compared by SHA-256:
    /// identical content skips the write entirely and returns `false`;
    /// a real change rebuilds the file and returns `true`.
    pub fn upsert_section(&self, heading: &str, content: &str) -> Result<bool, StoreError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(false);
        }

        let mut sections = self.sections()?;
        let existing = sections.iter_mut().find(|s| s.heading == heading);

        match existing {
            Some(section) => {
                if digest(&section.content) == digest(content) {
                    return Ok(false);
                }
                section.content = content.to_string();
            }
            None => sections.push(Section {
                heading: heading.to_string(),
                content: content.to_string(),
            }),
        }

        self.write(&sections)?;
        debug!(heading, "permanent section updated");
        Ok(true)
    }

    /// Rebuild and durably write the whole file from `sections`.
    fn write(&self, sections: &[Section]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create workspace dir: {e}")))?;
        }
        let text = render(sections);
        std::fs::write(&self.path, text)
            .map_err(|e| StoreError::Io(format!("write {}: {e}", self.path.display())))?;
        Ok(())
    }
}

/// Parse `## ` sections; nested `###` headings stay inside their parent's
/// content.
pub fn parse_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut heading: Option<String> = None;
    let mut body: Vec<&str> = Vec::new();

    let mut flush = |heading: &mut Option<String>, body: &mut Vec<&str>, out: &mut Vec<Section>| {
        if let Some(h) = heading.take() {
            out.push(Section {
                heading: h,
                content: body.join("\n").trim().to_string(),
            });
        }
        body.clear();
    };

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("## ") {
            flush(&mut heading, &mut body, &mut sections);
            heading = Some(rest.trim().to_string());
        } else if heading.is_some() {
            body.push(line);
        }
    }
    flush(&mut heading, &mut body, &mut sections);
    sections
}

/// Reassemble the document: title, last-updated stamp, standard sections
/// first, remaining sections after.
fn render(sections: &[Section]) -> String {
    let mut out = String::from("# Strata — Persistent Memory\n\n");
    out.push_str(&format!(
        "_Last updated: {}_\n",
        Utc::now().format("%Y-%m-%d %H:%M")
    ));

    let ordered = STANDARD_SECTIONS
        .iter()
        .filter_map(|h| sections.iter().find(|s| s.heading == *h))
        .chain(
            sections
                .iter()
                .filter(|s| !STANDARD_SECTIONS.contains(&s.heading.as_str())),
        );

    for section in ordered {
        let content = section.content.trim();
        if !content.is_empty() {
            out.push_str(&format!("\n## {}\n\n{}\n", section.heading, content));
        }
    }
    out
}

fn digest(text: &str) -> [u8; 32] {
    Sha256::digest(text.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let doc = PermanentDocument::new(dir.path());
        assert_eq!(doc.read_text().unwrap(), "");
        assert!(doc.sections().unwrap().is_empty());
    }

    #[test]
    fn upsert_creates_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let doc = PermanentDocument::new(dir.path());

        assert!(doc.upsert_section("KEY FACTS", "- uses Rust").unwrap());
        let sections = doc.sections().unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading, "KEY FACTS");
        assert_eq!(sections[0].content, "- uses Rust");
    }

    #[test]
    fn identical_content_skips_write() {
        let dir = TempDir::new().unwrap();
        let doc = PermanentDocument::new(dir.path());

        assert!(doc.upsert_section("USER PREFERENCES", "- prefers tabs").unwrap());
        assert!(!doc.upsert_section("USER PREFERENCES", "- prefers tabs").unwrap());
        // Content length unchanged after the no-op upsert
        let sections = doc.sections().unwrap();
        assert_eq!(sections[0].content, "- prefers tabs");
    }

    #[test]
    fn changed_content_replaces_section() {
        let dir = TempDir::new().unwrap();
        let doc = PermanentDocument::new(dir.path());

        doc.upsert_section("OPEN TASKS", "- task A").unwrap();
        assert!(doc.upsert_section("OPEN TASKS", "- task A\n- task B").unwrap());
        let sections = doc.sections().unwrap();
        assert_eq!(sections.len(), 1);
        assert!(sections[0].content.contains("task B"));
    }

    #[test]
    fn standard_sections_render_in_canonical_order() {
        let dir = TempDir::new().unwrap();
        let doc = PermanentDocument::new(dir.path());

        doc.upsert_section("CONCLUSIONS", "- done").unwrap();
        doc.upsert_section("Projects", "- strata").unwrap();
        doc.upsert_section("KEY FACTS", "- fact").unwrap();

        let text = doc.read_text().unwrap();
        let facts = text.find("## KEY FACTS").unwrap();
        let conclusions = text.find("## CONCLUSIONS").unwrap();
        let projects = text.find("## Projects").unwrap();
        assert!(facts < conclusions, "standard order first");
        assert!(conclusions < projects, "unknown sections last");
    }

    #[test]
    fn nested_headings_stay_in_section() {
        let text = "## KEY FACTS\n\n### Sub\n- detail\n\n## OPEN TASKS\n\n- t1\n";
        let sections = parse_sections(text);
        assert_eq!(sections.len(), 2);
        assert!(sections[0].content.contains("### Sub"));
    }

    #[test]
    fn empty_content_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let doc = PermanentDocument::new(dir.path());
        assert!(!doc.upsert_section("KEY FACTS", "   ").unwrap());
        assert!(doc.sections().unwrap().is_empty());
    }

    #[test]
    fn externally_edited_file_is_parsed() {
        let dir = TempDir::new().unwrap();
        let doc = PermanentDocument::new(dir.path());
        std::fs::write(
            doc.path(),
            "# My notes\n\n## USER PREFERENCES\n\n- hand-written bullet\n",
        )
        .unwrap();

        let sections = doc.sections().unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].content, "- hand-written bullet");
    }
}
