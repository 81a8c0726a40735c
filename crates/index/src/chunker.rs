//! Markdown chunking for the permanent memory document.
//!
//! Segments by heading (`#`, `##`, `###`), one chunk per section, heading
//! line included in the chunk text. Chunk ids are content-derived (hex
//! prefix of the section's SHA-256), so an unchanged section keeps its id
//! across reindexes.

use sha2::{Digest, Sha256};
use strata_core::MemoryChunk;

/// Segment a markdown document into retrievable chunks.
pub fn chunk_markdown(text: &str) -> Vec<MemoryChunk> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |lines: &mut Vec<&str>, out: &mut Vec<MemoryChunk>| {
        let section = lines.join("\n");
        let section = section.trim();
        if !section.is_empty() {
            out.push(make_chunk(section));
        }
        lines.clear();
    };

    for line in text.lines() {
        if is_heading(line) && !current.is_empty() {
            flush(&mut current, &mut chunks);
        }
        current.push(line);
    }
    flush(&mut current, &mut chunks);
    chunks
}

fn is_heading(line: &str) -> bool {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    (1..=3).contains(&hashes) && line.as_bytes().get(hashes) == Some(&b' ')
}

fn make_chunk(section: &str) -> MemoryChunk {
    let first_line = section.lines().next().unwrap_or_default();
    let heading = if first_line.starts_with('#') {
        first_line.trim_start_matches('#').trim().to_string()
    } else {
        String::new()
    };
    let id = hex_prefix(&Sha256::digest(section.as_bytes()));
    MemoryChunk {
        id,
        heading,
        text: section.to_string(),
    }
}

/// First 16 hex characters of the digest.
fn hex_prefix(digest: &[u8]) -> String {
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}
