//! Structured facts produced by compaction.
//!
//! The compactor extracts four categories from recent turns. Empty
//! categories are valid and simply omitted downstream.

use serde::{Deserialize, Serialize};

/// The four fact categories the compactor extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    KeyFacts,
    UserPreferences,
    OpenTasks,
    Conclusions,
}

impl FactCategory {
    pub const ALL: [FactCategory; 4] = [
        FactCategory::KeyFacts,
        FactCategory::UserPreferences,
        FactCategory::OpenTasks,
        FactCategory::Conclusions,
    ];

    /// Section heading used in the daily log and the permanent document.
    pub fn heading(&self) -> &'static str {
        match self {
            FactCategory::KeyFacts => "KEY FACTS",
            FactCategory::UserPreferences => "USER PREFERENCES",
            FactCategory::OpenTasks => "OPEN TASKS",
            FactCategory::Conclusions => "CONCLUSIONS",
        }
    }
}

impl std::fmt::Display for FactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.heading())
    }
}

/// The output of one extraction pass: short statements per category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedFacts {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_facts: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_preferences: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub open_tasks: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conclusions: Vec<String>,
}

impl ExtractedFacts {
    pub fn is_empty(&self) -> bool {
        self.key_facts.is_empty()
            && self.user_preferences.is_empty()
            && self.open_tasks.is_empty()
            && self.conclusions.is_empty()
    }

    pub fn statements(&self, category: FactCategory) -> &[String] {
        match category {
            FactCategory::KeyFacts => &self.key_facts,
            FactCategory::UserPreferences => &self.user_preferences,
            FactCategory::OpenTasks => &self.open_tasks,
            FactCategory::Conclusions => &self.conclusions,
        }
    }

    pub fn push(&mut self, category: FactCategory, statement: impl Into<String>) {
        let list = match category {
            FactCategory::KeyFacts => &mut self.key_facts,
            FactCategory::UserPreferences => &mut self.user_preferences,
            FactCategory::OpenTasks => &mut self.open_tasks,
            FactCategory::Conclusions => &mut self.conclusions,
        };
        list.push(statement.into());
    }

    /// Non-empty categories, in canonical order.
    pub fn non_empty(&self) -> impl Iterator<Item = (FactCategory, &[String])> {
        FactCategory::ALL
            .into_iter()
            .map(|c| (c, self.statements(c)))
            .filter(|(_, s)| !s.is_empty())
    }

    /// Render one category as markdown bullets.
    pub fn render_category(&self, category: FactCategory) -> String {
        self.statements(category)
            .iter()
            .map(|s| format!("- {s}\n"))
            .collect()
    }
}
