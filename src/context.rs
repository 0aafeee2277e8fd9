//! Context matching on top of search.
//!
//! Three lookups feed callers that need project context rather than raw
//! hits: reusable code for a piece of functionality (biased toward the
//! caller's own service), prompt suggestions for a task description, and the
//! documents that describe the system's architecture.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::{Category, EntityType, IndexedItem, ItemKind, PromptTemplate, SearchHit, UsageStats};
use crate::prompts::{compare_usage, prompt_terms};
use crate::search::{Ranking, SearchIndex, SearchOptions};
use crate::tokenize::query_terms;

/// Service name for paths under `services/<name>/`; everything else is shared.
pub const SHARED_SERVICE: &str = "shared";

/// Task words that point at a prompt category.
const CATEGORY_HINTS: &[(&str, &[Category])] = &[
    ("review", &[Category::CodeQuality]),
    ("test", &[Category::Testing]),
    ("api", &[Category::Api, Category::Documentation]),
    ("security", &[Category::Security]),
    ("refactor", &[Category::Refactoring]),
    ("architecture", &[Category::Architecture]),
    ("document", &[Category::Documentation]),
];
const CATEGORY_HINT_WEIGHT: f64 = 2.0;

#[derive(Debug, Clone, Serialize)]
pub struct ReuseCandidate {
    #[serde(flatten)]
    pub hit: SearchHit,
    pub service: String,
    pub code_type: String,
    pub import_path: String,
    pub reuse_suggestion: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptSuggestion {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: Category,
    pub score: f64,
    pub usage_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchitectureDoc {
    #[serde(flatten)]
    pub hit: SearchHit,
    /// Configured keywords this document matches, in configuration order.
    pub keywords: Vec<String>,
}

pub fn service_of(path: &str) -> String {
    path.split_once("services/")
        .and_then(|(_, rest)| rest.split('/').next())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| SHARED_SERVICE.to_string())
}

/// True when `path` lies in the service or directory named by `context`
/// (already lowercased): its `services/<name>/` owner matches, or one of its
/// directory segments does.
fn in_context(path: &str, context: &str) -> bool {
    let path = path.to_lowercase();
    if service_of(&path) == context {
        return true;
    }
    let dirs = match path.rsplit_once('/') {
        Some((dirs, _)) => dirs,
        None => return false,
    };
    dirs.split('/').any(|segment| segment == context)
}

/// Code search biased toward `service_context`.
///
/// Entities in that service or directory score `1 + same_service_boost`
/// times higher, those in other `services/*` entries `1 + sibling_service_boost`;
/// everything else is left alone. Nothing is filtered out.
pub fn find_reusable_code(
    index: &SearchIndex,
    ranking: &Ranking<'_>,
    functionality: &str,
    service_context: Option<&str>,
    limit: usize,
) -> Vec<ReuseCandidate> {
    let cfg = ranking.retrieval;
    let context = service_context
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let boost = |item: &IndexedItem| -> f64 {
        let Some(context) = context.as_deref() else {
            return 1.0;
        };
        if in_context(&item.path, context) {
            1.0 + cfg.same_service_boost
        } else if service_of(&item.path) != SHARED_SERVICE {
            1.0 + cfg.sibling_service_boost
        } else {
            1.0
        }
    };

    let opts = SearchOptions::new(limit).kind(ItemKind::CodeEntity);
    index
        .search_boosted(functionality, &opts, ranking, &boost)
        .into_iter()
        .map(|hit| annotate(hit, functionality, context.as_deref()))
        .collect()
}

fn annotate(hit: SearchHit, functionality: &str, context: Option<&str>) -> ReuseCandidate {
    let service = service_of(&hit.path);
    let path_lower = hit.path.to_lowercase();

    let code_type = match hit.code.as_ref().map(|c| c.entity_type) {
        Some(EntityType::Class) => "Class",
        Some(EntityType::Function) => "Function",
        _ if path_lower.contains("utils") || path_lower.contains("utilities") => "Utility Module",
        _ if path_lower.contains("handler") => "Handler",
        _ => "Module",
    }
    .to_string();

    let mut reuse_suggestion = match context {
        Some(ctx) if in_context(&hit.path, ctx) => format!("Direct import from {}", hit.path),
        _ => format!("Import from {} (consider service abstraction)", hit.path),
    };
    reuse_suggestion.push_str(functionality_hint(functionality));

    let qualified = hit
        .metadata
        .get("qualified_name")
        .and_then(|q| q.as_str())
        .unwrap_or_default();
    let language = hit
        .metadata
        .get("language")
        .and_then(|l| l.as_str())
        .unwrap_or_default();
    let import_path = import_path(&hit.path, qualified, language);

    ReuseCandidate {
        hit,
        service,
        code_type,
        import_path,
        reuse_suggestion,
    }
}

fn functionality_hint(functionality: &str) -> &'static str {
    match functionality.trim().to_lowercase().as_str() {
        "logging" | "log" => " - Standardize logging across services",
        "validation" | "validate" => " - Use consistent validation patterns",
        "circuit_breaker" | "circuit breaker" => " - Implement resilient service calls",
        "metrics" | "monitoring" => " - Centralize observability",
        _ => "",
    }
}

/// Import path built from the owning file and the entity's qualified name.
///
/// Python: `services.api-gateway.utils.CircuitBreaker`.
/// Rust: `crate::store::ContentStore::apply`.
pub fn import_path(path: &str, qualified_name: &str, language: &str) -> String {
    let stem = path.rsplit_once('.').map(|(s, _)| s).unwrap_or(path);
    // Duplicate declarations carry a `~N` suffix that is not part of the name
    let qualified = qualified_name.split('~').next().unwrap_or_default();

    if language == "rust" {
        let mut parts: Vec<&str> = vec!["crate"];
        parts.extend(
            stem.trim_start_matches("src/")
                .split('/')
                .filter(|p| !matches!(*p, "lib" | "main" | "mod" | "src")),
        );
        let mut out = parts.join("::");
        if !qualified.is_empty() {
            out.push_str("::");
            out.push_str(&qualified.replace('.', "::"));
        }
        out
    } else {
        let mut out = stem.trim_end_matches("/__init__").replace('/', ".");
        if !qualified.is_empty() {
            out.push('.');
            out.push_str(qualified);
        }
        out
    }
}

/// Rank prompts for a free-text task description.
///
/// Each prompt scores one point per description word found in its name,
/// description, tags or category, plus a bonus when a task word hints at its
/// category. With no match at all the most-used prompts are returned.
pub fn suggest_prompts(
    prompts: &[PromptTemplate],
    usage: &HashMap<String, UsageStats>,
    task_context: &str,
    limit: usize,
) -> Vec<PromptSuggestion> {
    let terms = query_terms(task_context);
    let lowered = task_context.to_lowercase();
    let hinted: HashSet<Category> = CATEGORY_HINTS
        .iter()
        .filter(|(word, _)| lowered.contains(word))
        .flat_map(|(_, cats)| cats.iter().copied())
        .collect();

    let mut scored: Vec<(f64, &PromptTemplate)> = prompts
        .iter()
        .map(|p| {
            let words = prompt_terms(p);
            let overlap = terms.iter().filter(|t| words.contains(t)).count() as f64;
            let hint = if hinted.contains(&p.category) {
                CATEGORY_HINT_WEIGHT
            } else {
                0.0
            };
            (overlap + hint, p)
        })
        .filter(|(score, _)| *score > 0.0)
        .collect();

    if scored.is_empty() {
        scored = prompts.iter().map(|p| (0.0, p)).collect();
    }

    scored.sort_by(|(sa, a), (sb, b)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| compare_usage(usage, &a.id, &b.id))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(limit);

    scored
        .into_iter()
        .map(|(score, p)| {
            let stats = usage.get(&p.id).copied().unwrap_or_default();
            PromptSuggestion {
                id: p.id.clone(),
                name: p.name.clone(),
                description: p.description.clone(),
                category: p.category,
                score,
                usage_count: stats.count,
                mean_score: stats.mean_score,
            }
        })
        .collect()
}

/// Documents matching the architecture keywords.
///
/// Ranked by how many distinct keywords a document matches, then by the sum
/// of its per-keyword search scores, then path.
pub fn architecture_info(
    index: &SearchIndex,
    ranking: &Ranking<'_>,
    keywords: &[String],
    limit: usize,
) -> Vec<ArchitectureDoc> {
    let mut found: BTreeMap<String, (SearchHit, Vec<String>, f64)> = BTreeMap::new();
    let opts = SearchOptions::new(index.len().max(1)).kind(ItemKind::Document);

    for keyword in keywords {
        let terms = query_terms(keyword);
        if terms.is_empty() {
            continue;
        }
        for hit in index.search(keyword, &opts, ranking) {
            if !index.item_has_terms(&hit.id, &terms) {
                continue;
            }
            let score = hit.score;
            let entry = found
                .entry(hit.id.clone())
                .or_insert_with(|| (hit, Vec::new(), 0.0));
            if !entry.1.contains(keyword) {
                entry.1.push(keyword.clone());
                entry.2 += score;
            }
        }
    }

    let mut docs: Vec<(SearchHit, Vec<String>, f64)> = found.into_values().collect();
    docs.sort_by(|a, b| {
        b.1.len()
            .cmp(&a.1.len())
            .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.0.path.cmp(&b.0.path))
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
    docs.truncate(limit);

    docs.into_iter()
        .map(|(mut hit, keywords, total)| {
            hit.score = total;
            ArchitectureDoc { hit, keywords }
        })
        .collect()
}
