//! Context assembly: fill a token budget from five memory tiers.
//!
//! Tiers in priority order:
//!
//! 1. **Permanent memory** — document sections, canonical order
//! 2. **Daily logs** — per-day blocks, oldest day dropped first
//! 3. **Retrieved passages** — ranked hits, best first
//! 4. **Short-term buffer** — recent unsummarized turns, oldest dropped
//! 5. **Latest summary** — only when older turns were left out
//!
//! Trimming is whole-unit: a unit that does not fit is dropped entirely,
//! along with every lower-priority unit in its tier and every lower tier.
//! The output never exceeds the budget, and assembly of a fixed snapshot
//! is deterministic.

use serde::Serialize;
use std::sync::Arc;
use strata_core::{AssemblyError, ScoredHit, Summary, TokenCounter, Turn};
use strata_store::Section;
use tracing::debug;

/// Everything the assembler reads. A snapshot: assembly itself performs
/// no I/O and has no side effects.
pub struct AssemblyInput<'a> {
    pub permanent_sections: &'a [Section],
    /// Stitched recent daily logs, day blocks joined by `---` rules;
    /// empty string when none exist.
    pub daily_log: &'a str,
    /// Ranked retrieval hits, best first.
    pub retrieved: &'a [ScoredHit],
    /// Recent unsummarized turns, chronological, already capped.
    pub recent_turns: &'a [Turn],
    /// Whether older turns exist beyond `recent_turns`.
    pub turns_trimmed: bool,
    pub latest_summary: Option<&'a Summary>,
}

/// The assembled context and its accounting.
#[derive(Debug, Clone, Serialize)]
pub struct ContextPayload {
    pub text: String,
    /// Token cost actually charged against the budget.
    pub used_tokens: usize,
    pub budget: usize,
    pub tiers: Vec<TierStats>,
    pub drops: Vec<DropRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub name: String,
    pub tokens: usize,
    pub items_included: usize,
    pub items_total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DropRecord {
    pub tier: String,
    pub items_dropped: usize,
    pub reason: String,
}

const TIER_PERMANENT: &str = "permanent";
const TIER_DAILY_LOG: &str = "daily_log";
const TIER_RETRIEVED: &str = "retrieved";
const TIER_SHORT_TERM: &str = "short_term";
const TIER_SUMMARY: &str = "summary";

/// Stateless tier-filling assembler.
pub struct ContextAssembler {
    counter: Arc<dyn TokenCounter>,
}

/// Mutable fill state threaded through the tiers.
struct Fill {
    out: String,
    used: usize,
    budget: usize,
    /// Set once any unit is trimmed for budget; lower tiers are skipped.
    overflowed: bool,
    smallest_unit: Option<usize>,
    tiers: Vec<TierStats>,
    drops: Vec<DropRecord>,
}

impl ContextAssembler {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    pub fn assemble(
        &self,
        input: &AssemblyInput<'_>,
        budget: usize,
    ) -> Result<ContextPayload, AssemblyError> {
        let mut fill = Fill {
            out: String::new(),
            used: 0,
            budget,
            overflowed: false,
            smallest_unit: None,
            tiers: Vec::new(),
            drops: Vec::new(),
        };

        // Tier 1: permanent sections, trimmed from the end
        let units: Vec<String> = input
            .permanent_sections
            .iter()
            .map(|s| format!("## {}\n\n{}\n", s.heading, s.content.trim()))
            .collect();
        self.fill_tier(&mut fill, TIER_PERMANENT, "[Permanent Memory]\n", &units);

        // Tier 2: one unit per day block, oldest day trimmed first
        let units: Vec<String> = input
            .daily_log
            .split("\n\n---\n\n")
            .map(str::trim)
            .filter(|day| !day.is_empty())
            .map(|day| format!("{day}\n"))
            .collect();
        self.fill_newest_first(&mut fill, TIER_DAILY_LOG, "[Daily Log]\n", &units);

        // Tier 3: retrieved passages, lowest-ranked trimmed first
        let units: Vec<String> = input
            .retrieved
            .iter()
            .map(|h| format!("- {}\n", h.text.trim()))
            .collect();
        self.fill_tier(&mut fill, TIER_RETRIEVED, "[Retrieved]\n", &units);

        // Tier 4: short-term buffer. Units render chronologically but trim
        // from the oldest end, so fill newest-first and reverse.
        let turn_dropped_here = self.fill_turns(&mut fill, input.recent_turns);

        // Tier 5: only when the buffer does not reach back to the start
        let units: Vec<String> = match input.latest_summary {
            Some(s) if input.turns_trimmed || turn_dropped_here => {
                vec![format!("{}\n", s.content.trim())]
            }
            _ => Vec::new(),
        };
        self.fill_tier(&mut fill, TIER_SUMMARY, "[Earlier Summary]\n", &units);

        if fill.out.is_empty() {
            if let Some(smallest_unit) = fill.smallest_unit {
                // Content existed but not one unit fit
                return Err(AssemblyError::BudgetExceededBeforeAnyContent {
                    smallest_unit,
                    budget,
                });
            }
        }

        debug!(
            used = fill.used,
            budget,
            drops = fill.drops.len(),
            "context assembled"
        );
        Ok(ContextPayload {
            text: fill.out,
            used_tokens: fill.used,
            budget,
            tiers: fill.tiers,
            drops: fill.drops,
        })
    }

    /// Fill one tier front-to-back. The first unit that does not fit ends
    /// the tier: it and everything after it are dropped.
    fn fill_tier(&self, fill: &mut Fill, name: &str, header: &str, units: &[String]) {
        if units.is_empty() {
            fill.tiers.push(TierStats {
                name: name.into(),
                tokens: 0,
                items_included: 0,
                items_total: 0,
            });
            return;
        }
        if fill.overflowed {
            fill.skip_tier(name, units.len());
            return;
        }
        fill.note_units(&self.counter, header, units);

        // The first unit also pays for the tier header and, when this is
        // not the first tier in the output, the joining newline
        let separator = if fill.out.is_empty() { 0 } else { 1 };
        let header_tokens = self.counter.count(header) + separator;
        let mut tier_tokens = 0;
        let mut included = 0;
        let mut section = String::new();

        for unit in units {
            let unit_tokens = self.counter.count(unit);
            let cost = if included == 0 {
                header_tokens + unit_tokens
            } else {
                unit_tokens
            };
            if fill.used + tier_tokens + cost > fill.budget {
                break;
            }
            if included == 0 {
                section.push_str(header);
            }
            section.push_str(unit);
            tier_tokens += cost;
            included += 1;
        }

        fill.commit_tier(name, section, tier_tokens, included, units.len());
    }

    /// Fill a chronological tier from the newest end: the oldest units are
    /// the first trimmed, but the kept units still render in order.
    /// Returns whether anything was dropped for budget.
    fn fill_newest_first(
        &self,
        fill: &mut Fill,
        name: &str,
        header: &str,
        units: &[String],
    ) -> bool {
        if units.is_empty() {
            fill.tiers.push(TierStats {
                name: name.into(),
                tokens: 0,
                items_included: 0,
                items_total: 0,
            });
            return false;
        }
        if fill.overflowed {
            fill.skip_tier(name, units.len());
            return false;
        }
        fill.note_units(&self.counter, header, units);

        let separator = if fill.out.is_empty() { 0 } else { 1 };
        let header_tokens = self.counter.count(header) + separator;
        let mut tier_tokens = header_tokens;
        let mut kept: Vec<&String> = Vec::new();
        for unit in units.iter().rev() {
            let unit_tokens = self.counter.count(unit);
            if fill.used + tier_tokens + unit_tokens > fill.budget {
                break;
            }
            kept.push(unit);
            tier_tokens += unit_tokens;
        }

        if kept.is_empty() {
            // Not even the newest unit fit with its header
            fill.commit_tier(name, String::new(), 0, 0, units.len());
            return true;
        }

        let mut section = String::from(header);
        for unit in kept.iter().rev() {
            section.push_str(unit);
        }
        let included = kept.len();
        fill.commit_tier(name, section, tier_tokens, included, units.len());
        included < units.len()
    }

    fn fill_turns(&self, fill: &mut Fill, turns: &[Turn]) -> bool {
        let units: Vec<String> = turns
            .iter()
            .map(|t| format!("{}: {}\n", t.role, t.content.trim()))
            .collect();
        self.fill_newest_first(fill, TIER_SHORT_TERM, "[Recent Conversation]\n", &units)
    }
}

impl Fill {
    /// Track the cheapest payload any tier could have emitted: one unit
    /// plus the tier header that would have to accompany it.
    fn note_units(&mut self, counter: &Arc<dyn TokenCounter>, header: &str, units: &[String]) {
        let header_tokens = counter.count(header);
        for unit in units {
            let t = header_tokens + counter.count(unit);
            self.smallest_unit = Some(self.smallest_unit.map_or(t, |s| s.min(t)));
        }
    }

    fn commit_tier(
        &mut self,
        name: &str,
        section: String,
        tokens: usize,
        included: usize,
        total: usize,
    ) {
        if !section.is_empty() {
            if !self.out.is_empty() {
                self.out.push('\n');
            }
            self.out.push_str(&section);
            self.used += tokens;
        }
        self.tiers.push(TierStats {
            name: name.into(),
            tokens,
            items_included: included,
            items_total: total,
        });
        if included < total {
            self.overflowed = true;
            self.drops.push(DropRecord {
                tier: name.into(),
                items_dropped: total - included,
                reason: "budget exhausted".into(),
            });
        }
    }

    fn skip_tier(&mut self, name: &str, total: usize) {
        self.tiers.push(TierStats {
            name: name.into(),
            tokens: 0,
            items_included: 0,
            items_total: total,
        });
        self.drops.push(DropRecord {
            tier: name.into(),
            items_dropped: total,
            reason: "skipped after higher tier was trimmed".into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use strata_core::{HeuristicCounter, Role, SessionId, SourceId, TurnRange};

    fn assembler() -> ContextAssembler {
        ContextAssembler::new(Arc::new(HeuristicCounter))
    }

    fn section(heading: &str, content: &str) -> Section {
        Section {
            heading: heading.into(),
            content: content.into(),
        }
    }

    fn turn(id: i64, content: &str) -> Turn {
        Turn {
            id,
            session: SessionId::from("s1"),
            role: Role::User,
            agent: None,
            content: content.into(),
            tokens: 0,
            summarized: false,
            ts: Utc::now(),
        }
    }

    fn hit(text: &str, score: f32) -> ScoredHit {
        ScoredHit {
            source: SourceId::Chunk("c".into()),
            text: text.into(),
            score,
            ts: None,
        }
    }

    fn summary(content: &str) -> Summary {
        Summary {
            id: 1,
            session: SessionId::from("s1"),
            content: content.into(),
            range: TurnRange::new(1, 15),
            ts: Utc::now(),
        }
    }

    fn empty_input<'a>() -> AssemblyInput<'a> {
        AssemblyInput {
            permanent_sections: &[],
            daily_log: "",
            retrieved: &[],
            recent_turns: &[],
            turns_trimmed: false,
            latest_summary: None,
        }
    }

    #[test]
    fn empty_store_is_empty_payload_not_error() {
        let payload = assembler().assemble(&empty_input(), 100).unwrap();
        assert!(payload.text.is_empty());
        assert_eq!(payload.used_tokens, 0);
    }

    #[test]
    fn all_tiers_render_in_priority_order() {
        let sections = vec![section("KEY FACTS", "- uses rust")];
        let turns = vec![turn(16, "latest question")];
        let hits = vec![hit("a retrieved passage", 0.9)];
        let s = summary("earlier discussion summary");
        let input = AssemblyInput {
            permanent_sections: &sections,
            daily_log: "# Daily Log: 2026-08-27\n\n## [10:00] KEY FACTS\n\n- logged fact",
            retrieved: &hits,
            recent_turns: &turns,
            turns_trimmed: true,
            latest_summary: Some(&s),
        };

        let payload = assembler().assemble(&input, 4096).unwrap();
        let text = &payload.text;
        let perm = text.find("[Permanent Memory]").unwrap();
        let log = text.find("[Daily Log]").unwrap();
        let ret = text.find("[Retrieved]").unwrap();
        let conv = text.find("[Recent Conversation]").unwrap();
        let sum = text.find("[Earlier Summary]").unwrap();
        assert!(perm < log && log < ret && ret < conv && conv < sum);
        assert!(payload.used_tokens <= 4096);
        assert!(payload.drops.is_empty());
    }

    #[test]
    fn summary_omitted_when_buffer_is_complete() {
        let turns = vec![turn(1, "only turn")];
        let s = summary("should not appear");
        let input = AssemblyInput {
            recent_turns: &turns,
            turns_trimmed: false,
            latest_summary: Some(&s),
            ..empty_input()
        };
        let payload = assembler().assemble(&input, 4096).unwrap();
        assert!(!payload.text.contains("[Earlier Summary]"));
    }

    #[test]
    fn never_exceeds_budget() {
        let sections: Vec<Section> = (0..10)
            .map(|i| section(&format!("S{i}"), &"word ".repeat(10)))
            .collect();
        let input = AssemblyInput {
            permanent_sections: &sections,
            ..empty_input()
        };
        for budget in [50, 100, 200, 400] {
            let payload = assembler().assemble(&input, budget).unwrap();
            assert!(payload.used_tokens <= budget, "budget {budget} exceeded");
        }
    }

    #[test]
    fn overflow_trims_whole_units_and_skips_lower_tiers() {
        // Two permanent sections; only the first fits
        let sections = vec![
            section("KEY FACTS", &"fact ".repeat(10)),
            section("OPEN TASKS", &"task ".repeat(10)),
        ];
        let hits = vec![hit("never reached", 0.9)];
        let input = AssemblyInput {
            permanent_sections: &sections,
            retrieved: &hits,
            ..empty_input()
        };
        let payload = assembler().assemble(&input, 30).unwrap();

        assert!(payload.text.contains("KEY FACTS"));
        assert!(!payload.text.contains("OPEN TASKS"));
        assert!(!payload.text.contains("never reached"));
        assert!(payload.drops.iter().any(|d| d.tier == TIER_PERMANENT));
        assert!(
            payload
                .drops
                .iter()
                .any(|d| d.tier == TIER_RETRIEVED && d.reason.contains("skipped"))
        );
    }

    #[test]
    fn short_term_drops_oldest_first() {
        let turns: Vec<Turn> = (1..=5)
            .map(|i| turn(i, &format!("message number {i} with padding text")))
            .collect();
        let input = AssemblyInput {
            recent_turns: &turns,
            ..empty_input()
        };
        // Budget fits roughly two turns plus the header
        let payload = assembler().assemble(&input, 30).unwrap();
        assert!(payload.text.contains("message number 5"));
        assert!(!payload.text.contains("message number 1"));

        // Chronological order is preserved among the kept turns
        if let (Some(a), Some(b)) = (
            payload.text.find("message number 4"),
            payload.text.find("message number 5"),
        ) {
            assert!(a < b);
        }
    }

    #[test]
    fn daily_log_keeps_newest_day_when_an_older_day_overflows() {
        let old_bullets = (0..30)
            .map(|i| format!("- old item {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let log = format!(
            "# Daily Log: 2026-08-26\n\n## [09:00] KEY FACTS\n\n{old_bullets}\
             \n\n---\n\n\
             # Daily Log: 2026-08-27\n\n## [10:00] KEY FACTS\n\n- fresh item"
        );
        let input = AssemblyInput {
            daily_log: &log,
            ..empty_input()
        };

        let payload = assembler().assemble(&input, 60).unwrap();
        assert!(payload.text.contains("fresh item"));
        assert!(!payload.text.contains("old item"));
        assert!(payload.used_tokens <= 60);
        assert!(
            payload
                .drops
                .iter()
                .any(|d| d.tier == TIER_DAILY_LOG && d.items_dropped == 1)
        );
    }

    #[test]
    fn daily_log_days_render_in_order_when_all_fit() {
        let log = "# Daily Log: 2026-08-26\n\n- earlier\n\n---\n\n# Daily Log: 2026-08-27\n\n- later";
        let input = AssemblyInput {
            daily_log: log,
            ..empty_input()
        };
        let payload = assembler().assemble(&input, 4096).unwrap();
        let a = payload.text.find("earlier").unwrap();
        let b = payload.text.find("later").unwrap();
        assert!(a < b, "older day must still come first");
        assert!(payload.drops.is_empty());
    }

    #[test]
    fn reported_smallest_unit_includes_the_tier_header() {
        let sections = vec![section("S", "tiny")];
        let input = AssemblyInput {
            permanent_sections: &sections,
            ..empty_input()
        };
        // The bare section fits the budget; section plus header does not
        let bare = HeuristicCounter.count("## S\n\ntiny\n");
        let err = assembler().assemble(&input, bare + 1).unwrap_err();
        match err {
            AssemblyError::BudgetExceededBeforeAnyContent { smallest_unit, budget } => {
                assert!(smallest_unit > bare);
                assert_eq!(budget, bare + 1);
            }
        }
    }

    #[test]
    fn budget_smaller_than_any_unit_is_an_error() {
        let sections = vec![section("KEY FACTS", &"long content ".repeat(20))];
        let input = AssemblyInput {
            permanent_sections: &sections,
            ..empty_input()
        };
        let err = assembler().assemble(&input, 3).unwrap_err();
        match err {
            AssemblyError::BudgetExceededBeforeAnyContent { smallest_unit, budget } => {
                assert!(smallest_unit > budget);
                assert_eq!(budget, 3);
            }
        }
    }

    #[test]
    fn assembly_is_deterministic() {
        let sections = vec![section("KEY FACTS", "- stable fact")];
        let turns = vec![turn(1, "hello"), turn(2, "world")];
        let input = AssemblyInput {
            permanent_sections: &sections,
            recent_turns: &turns,
            ..empty_input()
        };
        let a = assembler().assemble(&input, 200).unwrap();
        let b = assembler().assemble(&input, 200).unwrap();
        assert_eq!(a.text, b.text);
        assert_eq!(a.used_tokens, b.used_tokens);
    }

    #[test]
    fn tier_stats_account_for_everything() {
        let sections = vec![section("KEY FACTS", "- a"), section("OPEN TASKS", "- b")];
        let input = AssemblyInput {
            permanent_sections: &sections,
            ..empty_input()
        };
        let payload = assembler().assemble(&input, 4096).unwrap();
        let perm = payload
            .tiers
            .iter()
            .find(|t| t.name == TIER_PERMANENT)
            .unwrap();
        assert_eq!(perm.items_included, 2);
        assert_eq!(perm.items_total, 2);
        let total: usize = payload.tiers.iter().map(|t| t.tokens).sum();
        assert_eq!(total, payload.used_tokens);
    }
}
