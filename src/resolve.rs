//! Prompt resolution.
//!
//! Every placeholder of a template is bound from, in order: an explicit
//! value, then (when auto-fill is on) the best matching document for a query
//! derived from the placeholder name and the task. Resolution is
//! all-or-nothing: any placeholder left unbound fails the whole call.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::models::{ItemKind, PromptTemplate};
use crate::search::{Ranking, SearchIndex, SearchOptions};
use crate::template;

/// Placeholders that receive the caller's content in `apply_prompt_with_context`.
pub const CONTENT_PLACEHOLDERS: &[&str] = &["content", "code_content", "implementation_code", "api_code"];

/// Search phrases for well-known placeholder names.
const CONTEXT_QUERIES: &[(&str, &str)] = &[
    ("architecture_info", "architecture patterns"),
    ("coding_standards", "coding standards best practices"),
    ("security_requirements", "security requirements guidelines"),
    ("api_patterns", "api design patterns"),
    ("testing_guidelines", "testing strategy guidelines"),
    ("architecture_docs", "architecture patterns design"),
    ("design_patterns", "design patterns microservice architecture"),
    ("integration_guidelines", "integration patterns event-driven"),
    ("scalability_requirements", "scalability performance requirements"),
    ("implementation_code", "implementation patterns"),
    ("event_driven_patterns", "event-driven architecture patterns"),
    ("service_independence", "microservice independence patterns"),
    ("kafka_patterns", "kafka integration patterns"),
    ("security_guidelines", "security authentication"),
    ("threat_model", "security threat model"),
    ("compliance_requirements", "security compliance"),
    ("coverage_requirements", "test coverage requirements"),
    ("testing_framework", "testing framework patterns"),
    ("quality_guidelines", "code quality guidelines"),
    ("performance_requirements", "performance requirements optimization"),
    ("existing_api_patterns", "api design patterns"),
    ("architecture_style", "api architecture style"),
    ("auth_method", "authentication authorization patterns"),
];

const CONTEXTUAL_DOCS: usize = 3;

/// Where a placeholder's value came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ValueSource {
    Explicit,
    Context { item_id: String, query: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub prompt_id: String,
    pub version: i64,
    pub text: String,
    pub sources: BTreeMap<String, ValueSource>,
}

impl Resolution {
    /// Items whose content was pulled in by auto-fill, by placeholder name.
    pub fn context_items(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for source in self.sources.values() {
            if let ValueSource::Context { item_id, .. } = source {
                if !ids.contains(&item_id.as_str()) {
                    ids.push(item_id);
                }
            }
        }
        ids
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextSource {
    pub id: String,
    pub path: String,
    pub title: String,
}

/// A one-off template built from project documentation. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedPrompt {
    pub task: String,
    pub docs_query: String,
    pub template_text: String,
    pub variables: Vec<String>,
    pub sources: Vec<ContextSource>,
}

/// Search phrase used to auto-fill `placeholder`.
pub fn context_query(placeholder: &str, task: Option<&str>) -> String {
    let base = CONTEXT_QUERIES
        .iter()
        .find(|(name, _)| *name == placeholder)
        .map(|(_, query)| query.to_string())
        .unwrap_or_else(|| placeholder.replace('_', " "));
    match task.map(str::trim).filter(|t| !t.is_empty()) {
        Some(task) => format!("{} {}", base, task),
        None => base,
    }
}

pub fn resolve(
    prompt: &PromptTemplate,
    explicit: &HashMap<String, String>,
    auto_fill: bool,
    task: Option<&str>,
    index: &SearchIndex,
    ranking: &Ranking<'_>,
) -> Result<Resolution> {
    let mut names = prompt.variables.clone();
    for name in template::placeholders(&prompt.template_text) {
        if !names.contains(&name) {
            names.push(name);
        }
    }

    let mut values: HashMap<String, String> = HashMap::new();
    let mut sources: BTreeMap<String, ValueSource> = BTreeMap::new();
    let mut unresolved: Vec<String> = Vec::new();

    for name in names {
        if let Some(value) = explicit.get(&name) {
            values.insert(name.clone(), value.clone());
            sources.insert(name, ValueSource::Explicit);
            continue;
        }
        if auto_fill {
            let query = context_query(&name, task);
            if let Some((item_id, value)) = fill_from_context(index, ranking, &query) {
                values.insert(name.clone(), value);
                sources.insert(name, ValueSource::Context { item_id, query });
                continue;
            }
        }
        unresolved.push(name);
    }

    if !unresolved.is_empty() {
        return Err(Error::validation(format!(
            "prompt {} has unresolved placeholders: {}",
            prompt.id,
            unresolved.join(", ")
        )));
    }

    Ok(Resolution {
        prompt_id: prompt.id.clone(),
        version: prompt.version,
        text: template::render(&prompt.template_text, &values)?,
        sources,
    })
}

/// Content of the top document for `query`, truncated to `context_snippet_chars`.
fn fill_from_context(index: &SearchIndex, ranking: &Ranking<'_>, query: &str) -> Option<(String, String)> {
    let opts = SearchOptions::new(1).kind(ItemKind::Document);
    let hit = index.search(query, &opts, ranking).into_iter().next()?;
    let item = index.get(&hit.id)?;
    let value = truncate_chars(item.content.trim(), ranking.retrieval.context_snippet_chars);
    Some((hit.id, value))
}

/// Explicit values that bind `content` to every content-like placeholder.
pub fn content_bindings(prompt: &PromptTemplate, content: &str) -> HashMap<String, String> {
    prompt
        .variables
        .iter()
        .filter(|v| CONTENT_PLACEHOLDERS.contains(&v.as_str()))
        .map(|v| (v.clone(), content.to_string()))
        .collect()
}

/// Build a template around the top documents for `docs_query`.
pub fn generate_contextual_prompt(
    task: &str,
    docs_query: &str,
    index: &SearchIndex,
    ranking: &Ranking<'_>,
) -> Result<GeneratedPrompt> {
    let task = task.trim();
    if task.is_empty() {
        return Err(Error::validation("task must not be empty"));
    }

    let opts = SearchOptions::new(CONTEXTUAL_DOCS).kind(ItemKind::Document);
    let hits = index.search(docs_query, &opts, ranking);

    let context = hits
        .iter()
        .map(|hit| format!("**{}**: {}", escape_braces(&hit.title), escape_braces(&hit.snippet)))
        .collect::<Vec<_>>()
        .join("\n");

    let template_text = format!(
        "Based on the following project documentation:\n\n{}\n\nPlease {} the following content:\n{{content}}\n\nConsider the documented patterns, guidelines, and architecture when providing your analysis.",
        context,
        escape_braces(task)
    );

    Ok(GeneratedPrompt {
        task: task.to_string(),
        docs_query: docs_query.to_string(),
        variables: template::placeholders(&template_text),
        template_text,
        sources: hits
            .into_iter()
            .map(|h| ContextSource {
                id: h.id,
                path: h.path,
                title: h.title,
            })
            .collect(),
    })
}

fn escape_braces(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
