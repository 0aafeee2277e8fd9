//! Core data models used throughout the engine.
//!
//! These types represent the indexed items, prompt templates, usage events,
//! and query results that flow between the indexer, the store, and the
//! retrieval layers.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What an [`IndexedItem`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Document,
    CodeEntity,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Document => "document",
            ItemKind::CodeEntity => "code_entity",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "document" | "doc" | "docs" => Ok(ItemKind::Document),
            "code_entity" | "code" => Ok(ItemKind::CodeEntity),
            other => Err(Error::validation(format!(
                "unknown item kind '{}': use document or code",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Module,
    Class,
    Function,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Module => "module",
            EntityType::Class => "class",
            EntityType::Function => "function",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "module" => Some(EntityType::Module),
            "class" => Some(EntityType::Class),
            "function" => Some(EntityType::Function),
            _ => None,
        }
    }
}

/// Structural details attached to code-entity items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEntity {
    pub entity_type: EntityType,
    pub name: String,
    /// Declared name plus parameter names, e.g. `call(self, func)`.
    pub signature: String,
    pub description: String,
    pub owner_path: String,
    /// Id of the enclosing entity; `None` only for module entities.
    pub parent_id: Option<String>,
    pub dependency_refs: Vec<String>,
}

/// A persisted, searchable record derived from one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedItem {
    pub id: String,
    /// Project-relative path of the source file, `/`-separated.
    pub path: String,
    /// SHA-256 of the source file bytes.
    pub fingerprint: String,
    pub kind: ItemKind,
    pub title: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub indexed_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeEntity>,
}

impl IndexedItem {
    /// File extension of the source path, lowercased (`"md"`, `"py"`).
    pub fn doc_type(&self) -> String {
        std::path::Path::new(&self.path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    /// Document section records stored in metadata, in source order.
    pub fn sections(&self) -> Vec<Section> {
        self.metadata
            .get("sections")
            .and_then(|s| serde_json::from_value(s.clone()).ok())
            .unwrap_or_default()
    }
}

/// Stable id of the document item for `path`.
pub fn document_id(path: &str) -> String {
    format!("doc:{}", path)
}

/// Stable id of a code entity. `qualified_name` is empty for the module.
pub fn code_entity_id(path: &str, qualified_name: &str) -> String {
    if qualified_name.is_empty() {
        format!("code:{}", path)
    } else {
        format!("code:{}::{}", path, qualified_name)
    }
}

/// A heading-delimited part of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub level: u32,
    /// Byte offset of the heading in the source file.
    pub byte_offset: usize,
    /// Byte offset where this section starts in the stripped `content`.
    pub content_offset: usize,
}

/// Input handed to parsers: one file's bytes plus run-level stamps.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
    pub fingerprint: String,
    pub size_bytes: u64,
    pub indexed_at: i64,
}

/// Prompt categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    CodeQuality,
    Architecture,
    Documentation,
    Testing,
    Refactoring,
    Api,
    Security,
    Custom,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::CodeQuality,
        Category::Architecture,
        Category::Documentation,
        Category::Testing,
        Category::Refactoring,
        Category::Api,
        Category::Security,
        Category::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::CodeQuality => "code-quality",
            Category::Architecture => "architecture",
            Category::Documentation => "documentation",
            Category::Testing => "testing",
            Category::Refactoring => "refactoring",
            Category::Api => "api",
            Category::Security => "security",
            Category::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                Error::validation(format!(
                    "unknown category '{}': expected one of {}",
                    s,
                    Category::ALL
                        .iter()
                        .map(|c| c.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: Category,
    pub template_text: String,
    /// Declared placeholder names, in declaration order.
    pub variables: Vec<String>,
    pub tags: Vec<String>,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields for creating a prompt. `id` is generated when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPrompt {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    pub template_text: String,
    /// Declared placeholders; inferred from the template when empty.
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Partial update for an existing prompt. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub template_text: Option<String>,
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub subject_id: String,
    pub timestamp: i64,
    pub context_snippet: String,
    pub outcome_score: Option<f64>,
}

/// Aggregated usage for one subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub count: u64,
    /// Mean of the recorded outcome scores, if any were recorded.
    pub mean_score: Option<f64>,
    #[serde(skip)]
    pub(crate) scored: u64,
}

impl UsageStats {
    pub fn observe(&mut self, outcome_score: Option<f64>) {
        self.count += 1;
        if let Some(score) = outcome_score {
            let total = self.mean_score.unwrap_or(0.0) * self.scored as f64 + score;
            self.scored += 1;
            self.mean_score = Some(total / self.scored as f64);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexSummary {
    pub files_scanned: u64,
    /// Items inserted.
    pub added: u64,
    /// Items whose content was replaced.
    pub updated: u64,
    /// Items deleted, including tombstoned paths.
    pub removed: u64,
    /// Files whose fingerprint was unchanged.
    pub skipped: u64,
    /// Files that failed to read or parse.
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub path: String,
    pub kind: ItemKind,
    pub title: String,
    pub score: f64,
    pub match_kind: MatchKind,
    pub snippet: String,
    /// Title of the document section containing the first match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub doc_type: String,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeEntity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_path_and_kind() {
        assert_eq!(document_id("docs/guide.md"), "doc:docs/guide.md");
        assert_eq!(code_entity_id("a/utils.py", ""), "code:a/utils.py");
        assert_eq!(
            code_entity_id("a/utils.py", "CircuitBreaker.call"),
            "code:a/utils.py::CircuitBreaker.call"
        );
    }

    #[test]
    fn category_round_trips_through_kebab_names() {
        for c in Category::ALL {
            assert_eq!(Category::parse(c.as_str()).unwrap(), c);
        }
        assert!(matches!(
            Category::parse("nonsense"),
            Err(Error::Validation(_))
        ));
        assert_eq!(
            serde_json::to_value(Category::CodeQuality).unwrap(),
            serde_json::json!("code-quality")
        );
    }

    #[test]
    fn usage_stats_mean_ignores_unscored_events() {
        let mut stats = UsageStats::default();
        stats.observe(Some(4.0));
        stats.observe(None);
        stats.observe(Some(2.0));
        assert_eq!(stats.count, 3);
        assert_eq!(stats.mean_score, Some(3.0));
    }
}
