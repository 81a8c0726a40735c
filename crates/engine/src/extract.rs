//! Fact extraction — the pluggable step of compaction.
//!
//! Production deployments back this trait with an external model call; the
//! engine only requires the contract. [`RuleBasedExtractor`] is the shipped
//! default: deterministic keyword heuristics over turn text, good enough to
//! keep the pipeline honest without a model in the loop.

use async_trait::async_trait;
use strata_core::{CompactError, ExtractedFacts, FactCategory, Role, Turn};

/// Distills a batch of turns into categorized facts.
#[async_trait]
pub trait FactExtractor: Send + Sync {
    /// Extract facts from `turns` (id-ordered, same session). An empty
    /// result is valid; an error aborts the compaction run before any
    /// write happens.
    async fn extract(&self, turns: &[Turn]) -> Result<ExtractedFacts, CompactError>;
}

/// Deterministic keyword-based extractor.
///
/// Classification is per sentence-like line:
/// - preference markers (`prefer`, `always`, `never`, `like`) from user
///   turns become user preferences
/// - task markers (`todo`, `need to`, `should`, `next step`) become open
///   tasks
/// - conclusion markers (`decided`, `conclusion`, `agreed`, `therefore`)
///   become conclusions
/// - remaining declarative statements (`is`, `are`, `uses`) become key facts
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedExtractor;

const MAX_STATEMENT_CHARS: usize = 200;

#[async_trait]
impl FactExtractor for RuleBasedExtractor {
    async fn extract(&self, turns: &[Turn]) -> Result<ExtractedFacts, CompactError> {
        let mut facts = ExtractedFacts::default();

        for turn in turns {
            if turn.role == Role::Tool {
                continue;
            }
            for line in turn.content.lines() {
                let statement = clean_statement(line);
                if statement.is_empty() {
                    continue;
                }
                if let Some(category) = classify(&statement, turn.role) {
                    push_unique(&mut facts, category, statement);
                }
            }
        }
        Ok(facts)
    }
}

fn classify(statement: &str, role: Role) -> Option<FactCategory> {
    let lower = statement.to_lowercase();

    let preference = ["prefer", "always ", "never ", "i like", "don't like"];
    let task = ["todo", "need to", "should ", "next step", "remaining"];
    let conclusion = ["decided", "conclusion", "agreed", "therefore", "turns out"];

    if role == Role::User && preference.iter().any(|m| lower.contains(m)) {
        return Some(FactCategory::UserPreferences);
    }
    if task.iter().any(|m| lower.contains(m)) {
        return Some(FactCategory::OpenTasks);
    }
    if conclusion.iter().any(|m| lower.contains(m)) {
        return Some(FactCategory::Conclusions);
    }
    let declarative = [" is ", " are ", " uses ", " was ", " has "];
    if declarative.iter().any(|m| lower.contains(m)) {
        return Some(FactCategory::KeyFacts);
    }
    None
}

fn clean_statement(line: &str) -> String {
    let trimmed = line.trim().trim_start_matches(['-', '*', ' ']).trim();
    if trimmed.len() <= MAX_STATEMENT_CHARS {
        return trimmed.to_string();
    }
    let mut cut = MAX_STATEMENT_CHARS;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    trimmed[..cut].to_string()
}

fn push_unique(facts: &mut ExtractedFacts, category: FactCategory, statement: String) {
    if !facts.statements(category).iter().any(|s| s == &statement) {
        facts.push(category, statement);
    }
}
