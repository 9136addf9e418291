//! Review data model and the engine's thread-state document.
//!
//! `Need` and `UseCase` are the reviewer-facing shapes. The workflow engine
//! speaks a looser dialect (`theme`/`quotes`, `titre`/`ia_utilisee`), so
//! conversion in both directions lives here.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::deserializers::{de_string_lossy, de_string_or_list, split_list};

pub const USE_CASE_TITLE_PLACEHOLDER: &str = "Cas d'usage";

/// A proposed business need with its supporting quotes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Need {
    #[serde(default, deserialize_with = "de_string_lossy")]
    pub id: String,
    #[serde(default, alias = "theme", deserialize_with = "de_string_lossy")]
    pub title: String,
    #[serde(default, alias = "quotes", deserialize_with = "de_string_or_list")]
    pub citations: Vec<String>,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub edited: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCaseCategory {
    QuickWin,
    StructurationIa,
}

impl UseCaseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            UseCaseCategory::QuickWin => "quick_win",
            UseCaseCategory::StructurationIa => "structuration_ia",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            UseCaseCategory::QuickWin => "qw",
            UseCaseCategory::StructurationIa => "sia",
        }
    }

    /// Parse a path segment; accepts the serde names plus a few spellings seen in URLs.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "quick_win" | "quick_wins" | "qw" => Some(UseCaseCategory::QuickWin),
            "structuration_ia" | "structuration" | "sia" => {
                Some(UseCaseCategory::StructurationIa)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for UseCaseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed AI application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseCase {
    #[serde(default, deserialize_with = "de_string_lossy")]
    pub id: String,
    pub category: UseCaseCategory,
    #[serde(default, alias = "titre", deserialize_with = "de_string_lossy")]
    pub title: String,
    #[serde(default, deserialize_with = "de_string_lossy")]
    pub description: String,
    #[serde(
        default,
        alias = "ia_utilisee",
        deserialize_with = "de_string_or_list"
    )]
    pub ai_technologies: Vec<String>,
    #[serde(default)]
    pub selected: bool,
}

/// First non-empty string among `keys`
fn first_str(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn first_list(obj: &Value, keys: &[&str]) -> Vec<String> {
    for k in keys {
        match obj.get(*k) {
            Some(Value::Array(items)) => {
                return items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            Some(Value::String(s)) if !s.trim().is_empty() => return split_list(s),
            _ => {}
        }
    }
    Vec::new()
}

impl Need {
    /// Build from an engine `identified_needs` item; `index` is 0-based.
    pub fn from_engine(item: &Value, index: usize) -> Option<Self> {
        if !item.is_object() {
            return None;
        }
        Some(Self {
            id: first_str(item, &["id"]).unwrap_or_else(|| format!("need_{}", index + 1)),
            title: first_str(item, &["theme", "title"]).unwrap_or_default(),
            citations: first_list(item, &["quotes", "citations"]),
            selected: false,
            edited: false,
        })
    }

    pub fn to_engine(&self) -> Value {
        json!({
            "id": self.id,
            "theme": self.title,
            "quotes": self.citations,
        })
    }
}

impl UseCase {
    /// Build from an engine proposal item; `index` is 0-based.
    pub fn from_engine(item: &Value, category: UseCaseCategory, index: usize) -> Option<Self> {
        if !item.is_object() {
            return None;
        }
        Some(Self {
            id: first_str(item, &["id"])
                .unwrap_or_else(|| format!("{}_{}", category.id_prefix(), index + 1)),
            category,
            title: first_str(item, &["titre", "title"])
                .unwrap_or_else(|| USE_CASE_TITLE_PLACEHOLDER.to_string()),
            description: first_str(item, &["description"]).unwrap_or_default(),
            ai_technologies: first_list(item, &["ai_technologies", "ia_utilisee"]),
            selected: false,
        })
    }

    /// Engine shape; both title spellings are sent so either node reader finds it.
    pub fn to_engine(&self) -> Value {
        json!({
            "id": self.id,
            "titre": self.title,
            "title": self.title,
            "description": self.description,
            "ia_utilisee": self.ai_technologies.join(", "),
            "ai_technologies": self.ai_technologies,
            "category": self.category,
        })
    }
}

/// The engine's thread state document (`GET /threads/{id}/state`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadState {
    #[serde(default)]
    pub values: Value,
    #[serde(default)]
    pub next: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl ThreadState {
    pub fn from_values(values: Value) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    fn list(&self, key: &str) -> &[Value] {
        self.values
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn identified_needs(&self) -> Vec<Need> {
        self.list("identified_needs")
            .iter()
            .enumerate()
            .filter_map(|(i, v)| Need::from_engine(v, i))
            .collect()
    }

    pub fn proposed_use_cases(&self, category: UseCaseCategory) -> Vec<UseCase> {
        let key = match category {
            UseCaseCategory::QuickWin => "proposed_quick_wins",
            UseCaseCategory::StructurationIa => "proposed_structuration_ia",
        };
        self.list(key)
            .iter()
            .enumerate()
            .filter_map(|(i, v)| UseCase::from_engine(v, category, i))
            .collect()
    }

    pub fn validated_needs_count(&self) -> usize {
        self.list("validated_needs").len()
    }

    pub fn validated_use_cases_count(&self) -> usize {
        self.list("validated_quick_wins").len() + self.list("validated_structuration_ia").len()
    }
}

/// Stable identity of a proposal set, used to detect regeneration.
pub fn fingerprint<'a, I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut keys: Vec<String> = items
        .into_iter()
        .map(|(id, title)| format!("{}|{}", id, title.trim().to_lowercase()))
        .collect();
    keys.sort();
    keys
}

pub fn needs_fingerprint(needs: &[Need]) -> Vec<String> {
    fingerprint(needs.iter().map(|n| (n.id.as_str(), n.title.as_str())))
}

pub fn use_cases_fingerprint(use_cases: &[UseCase]) -> Vec<String> {
    fingerprint(use_cases.iter().map(|u| (u.id.as_str(), u.title.as_str())))
}
