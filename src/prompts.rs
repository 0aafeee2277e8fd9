//! Persisted prompt templates.
//!
//! Templates are created explicitly or bootstrapped into an empty store, and
//! only change through [`PromptStore::edit`], which bumps `version` with a
//! compare-and-swap so two concurrent edits never silently overwrite each
//! other.

use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{Category, NewPrompt, PromptChanges, PromptTemplate, UsageStats};
use crate::template;
use crate::tokenize::{query_terms, tokenize};

const DEFAULT_PROMPTS: &str = include_str!("../prompts/default_prompts.toml");
const MAX_EDIT_ATTEMPTS: usize = 5;

#[derive(Debug, Deserialize)]
struct PromptFile {
    #[serde(default)]
    prompt: Vec<NewPrompt>,
}

#[derive(Clone)]
pub struct PromptStore {
    pool: SqlitePool,
}

const SELECT_PROMPT: &str = r#"
    SELECT id, name, description, category, template_text, variables_json, tags_json,
           version, created_at, updated_at
    FROM prompts
"#;

impl PromptStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewPrompt) -> Result<PromptTemplate> {
        let category = match new.category.as_deref() {
            Some(c) if !c.trim().is_empty() => Category::parse(c.trim())?,
            _ => Category::Custom,
        };
        let variables = declared_variables(&new.template_text, new.variables)?;
        validate_fields(&new.name, &new.template_text, &variables)?;

        let id = match new.id {
            Some(id) if id.trim().is_empty() => {
                return Err(Error::validation("prompt id must not be blank"))
            }
            Some(id) => id.trim().to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let now = chrono::Utc::now().timestamp();
        let prompt = PromptTemplate {
            id,
            name: new.name.trim().to_string(),
            description: new.description,
            category,
            template_text: new.template_text,
            variables,
            tags: new.tags,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO prompts (id, name, description, category, template_text, variables_json,
                                 tags_json, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&prompt.id)
        .bind(&prompt.name)
        .bind(&prompt.description)
        .bind(prompt.category.as_str())
        .bind(&prompt.template_text)
        .bind(serde_json::to_string(&prompt.variables)?)
        .bind(serde_json::to_string(&prompt.tags)?)
        .bind(prompt.version)
        .bind(prompt.created_at)
        .bind(prompt.updated_at)
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(Error::validation(format!(
                "prompt id already exists: {}",
                prompt.id
            )));
        }

        debug!(id = %prompt.id, "created prompt");
        Ok(prompt)
    }

    pub async fn find(&self, id: &str) -> Result<Option<PromptTemplate>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_PROMPT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_prompt).transpose()
    }

    pub async fn get(&self, id: &str) -> Result<PromptTemplate> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::not_found("prompt", id))
    }

    /// Every prompt, optionally in one category, ordered by name then id.
    pub async fn list(&self, category: Option<Category>) -> Result<Vec<PromptTemplate>> {
        let rows = match category {
            Some(c) => {
                sqlx::query(&format!("{} WHERE category = ? ORDER BY name, id", SELECT_PROMPT))
                    .bind(c.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&format!("{} ORDER BY name, id", SELECT_PROMPT))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_prompt).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM prompts")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Apply `changes` and bump the version.
    ///
    /// With `expected_version`, a mismatch is rejected. Without it, a lost
    /// race is retried against the fresh record.
    pub async fn edit(
        &self,
        id: &str,
        changes: PromptChanges,
        expected_version: Option<i64>,
    ) -> Result<PromptTemplate> {
        for _ in 0..MAX_EDIT_ATTEMPTS {
            let current = self.get(id).await?;
            if let Some(expected) = expected_version {
                if expected != current.version {
                    return Err(version_mismatch(id, expected, current.version));
                }
            }

            let updated = apply_changes(&current, &changes)?;

            let result = sqlx::query(
                r#"
                UPDATE prompts
                SET name = ?, description = ?, category = ?, template_text = ?,
                    variables_json = ?, tags_json = ?, version = ?, updated_at = ?
                WHERE id = ? AND version = ?
                "#,
            )
            .bind(&updated.name)
            .bind(&updated.description)
            .bind(updated.category.as_str())
            .bind(&updated.template_text)
            .bind(serde_json::to_string(&updated.variables)?)
            .bind(serde_json::to_string(&updated.tags)?)
            .bind(updated.version)
            .bind(updated.updated_at)
            .bind(id)
            .bind(current.version)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                debug!(id, version = updated.version, "edited prompt");
                return Ok(updated);
            }
            if let Some(expected) = expected_version {
                let found = self.get(id).await?.version;
                return Err(version_mismatch(id, expected, found));
            }
        }

        Err(Error::validation(format!(
            "prompt {} is being edited concurrently; retry",
            id
        )))
    }

    /// Prompts matching `query` by name, description, tags or category,
    /// restricted to `category` and to prompts carrying every tag in `tags`.
    ///
    /// Ordered by matched word count, then usage count, then mean outcome
    /// score. An empty query lists everything in that usage order.
    pub async fn search(
        &self,
        query: &str,
        category: Option<Category>,
        tags: &[String],
        usage: &HashMap<String, UsageStats>,
        limit: usize,
    ) -> Result<Vec<PromptTemplate>> {
        let terms = query_terms(query);
        let mut scored: Vec<(usize, PromptTemplate)> = self
            .list(category)
            .await?
            .into_iter()
            .filter(|p| {
                tags.iter()
                    .all(|t| p.tags.iter().any(|pt| pt.eq_ignore_ascii_case(t.trim())))
            })
            .filter_map(|p| {
                if terms.is_empty() {
                    return Some((0, p));
                }
                let words = prompt_terms(&p);
                let hits = words.iter().filter(|w| terms.contains(w)).count();
                (hits > 0).then_some((hits, p))
            })
            .collect();

        scored.sort_by(|(ha, a), (hb, b)| {
            hb.cmp(ha)
                .then_with(|| compare_usage(usage, &a.id, &b.id))
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, p)| p).collect())
    }

    /// Load default templates when the store is empty. Returns how many were added.
    pub async fn bootstrap(&self, file: Option<&Path>) -> Result<usize> {
        if self.count().await? > 0 {
            return Ok(0);
        }

        let (source, text) = match file {
            Some(path) => (path.display().to_string(), std::fs::read_to_string(path)?),
            None => ("built-in defaults".to_string(), DEFAULT_PROMPTS.to_string()),
        };
        let parsed: PromptFile = toml::from_str(&text)
            .map_err(|e| Error::validation(format!("invalid prompt file {}: {}", source, e)))?;

        let mut added = 0;
        for prompt in parsed.prompt {
            self.create(prompt).await?;
            added += 1;
        }
        info!(added, source = %source, "bootstrapped prompt templates");
        Ok(added)
    }
}

/// Higher usage count first, then higher mean outcome score.
pub fn compare_usage(
    usage: &HashMap<String, UsageStats>,
    a: &str,
    b: &str,
) -> std::cmp::Ordering {
    let sa = usage.get(a).copied().unwrap_or_default();
    let sb = usage.get(b).copied().unwrap_or_default();
    sb.count.cmp(&sa.count).then_with(|| {
        sb.mean_score
            .unwrap_or(0.0)
            .partial_cmp(&sa.mean_score.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

/// Searchable words of a prompt: name, description, tags, category.
pub fn prompt_terms(p: &PromptTemplate) -> Vec<String> {
    let mut words = tokenize(&p.name);
    words.extend(tokenize(&p.description));
    for tag in &p.tags {
        words.extend(tokenize(tag));
    }
    words.extend(tokenize(p.category.as_str()));
    words.push(p.id.to_lowercase());
    words
}

fn version_mismatch(id: &str, expected: i64, found: i64) -> Error {
    Error::validation(format!(
        "version mismatch for prompt {}: expected {}, found {}",
        id, expected, found
    ))
}

/// Declared variables, inferred from the template when none are given.
fn declared_variables(template_text: &str, declared: Vec<String>) -> Result<Vec<String>> {
    if declared.is_empty() {
        return Ok(template::placeholders(template_text));
    }
    let mut out: Vec<String> = Vec::with_capacity(declared.len());
    for name in declared {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(Error::validation("variable names must not be blank"));
        }
        if !out.contains(&name) {
            out.push(name);
        }
    }
    Ok(out)
}

fn validate_fields(name: &str, template_text: &str, variables: &[String]) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("prompt name must not be empty"));
    }
    if template_text.trim().is_empty() {
        return Err(Error::validation("prompt template must not be empty"));
    }
    let undeclared = template::undeclared(template_text, variables);
    if !undeclared.is_empty() {
        return Err(Error::validation(format!(
            "template references undeclared variables: {}",
            undeclared.join(", ")
        )));
    }
    Ok(())
}

fn apply_changes(current: &PromptTemplate, changes: &PromptChanges) -> Result<PromptTemplate> {
    let template_text = changes
        .template_text
        .clone()
        .unwrap_or_else(|| current.template_text.clone());

    let variables = match (&changes.variables, &changes.template_text) {
        (Some(vars), _) => declared_variables(&template_text, vars.clone())?,
        // A new template without explicit variables declares what it uses
        (None, Some(_)) => template::placeholders(&template_text),
        (None, None) => current.variables.clone(),
    };

    let category = match changes.category.as_deref() {
        Some(c) => Category::parse(c.trim())?,
        None => current.category,
    };

    let updated = PromptTemplate {
        id: current.id.clone(),
        name: changes
            .name
            .as_deref()
            .map(|n| n.trim().to_string())
            .unwrap_or_else(|| current.name.clone()),
        description: changes
            .description
            .clone()
            .unwrap_or_else(|| current.description.clone()),
        category,
        template_text,
        variables,
        tags: changes.tags.clone().unwrap_or_else(|| current.tags.clone()),
        version: current.version + 1,
        created_at: current.created_at,
        updated_at: chrono::Utc::now().timestamp(),
    };
    validate_fields(&updated.name, &updated.template_text, &updated.variables)?;
    Ok(updated)
}

fn row_to_prompt(row: &SqliteRow) -> Result<PromptTemplate> {
    let category: String = row.get("category");
    let variables_json: String = row.get("variables_json");
    let tags_json: String = row.get("tags_json");

    Ok(PromptTemplate {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        category: Category::parse(&category)?,
        template_text: row.get("template_text"),
        variables: serde_json::from_str(&variables_json)?,
        tags: serde_json::from_str(&tags_json)?,
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};

    async fn store() -> (tempfile::TempDir, PromptStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::for_project(tmp.path());
        let pool = db::connect(&config).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, PromptStore::new(pool))
    }

    fn new_prompt(id: &str, template_text: &str) -> NewPrompt {
        NewPrompt {
            id: Some(id.to_string()),
            name: "Review".to_string(),
            description: "Review some code".to_string(),
            category: Some("code-quality".to_string()),
            template_text: template_text.to_string(),
            variables: Vec::new(),
            tags: vec!["review".to_string()],
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (_tmp, store) = store().await;
        let created = store
            .create(new_prompt("p1", "Review {code_content}"))
            .await
            .unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.variables, vec!["code_content"]);

        let fetched = store.get("p1").await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let (_tmp, store) = store().await;

        let mut blank_name = new_prompt("a", "x");
        blank_name.name = "  ".to_string();
        assert!(matches!(store.create(blank_name).await, Err(Error::Validation(_))));

        assert!(matches!(
            store.create(new_prompt("b", "   ")).await,
            Err(Error::Validation(_))
        ));

        let mut undeclared = new_prompt("c", "{a} {b}");
        undeclared.variables = vec!["a".to_string()];
        assert!(matches!(store.create(undeclared).await, Err(Error::Validation(_))));

        let mut bad_category = new_prompt("d", "x");
        bad_category.category = Some("misc".to_string());
        assert!(matches!(store.create(bad_category).await, Err(Error::Validation(_))));

        store.create(new_prompt("e", "x")).await.unwrap();
        assert!(matches!(
            store.create(new_prompt("e", "x")).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn racing_creates_with_one_id_leave_one_winner() {
        let (_tmp, store) = store().await;
        let (a, b) = tokio::join!(
            store.create(new_prompt("dup", "first {x}")),
            store.create(new_prompt("dup", "second {x}")),
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.into_iter().find_map(|r| r.err()).unwrap();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("already exists")));
        assert_eq!(store.get("dup").await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn generated_ids_are_unique() {
        let (_tmp, store) = store().await;
        let mut a = new_prompt("", "x");
        a.id = None;
        let b = a.clone();
        let a = store.create(a).await.unwrap();
        let b = store.create(b).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (_tmp, store) = store().await;
        assert!(matches!(store.get("nope").await, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn edit_bumps_version_and_checks_expected() {
        let (_tmp, store) = store().await;
        store.create(new_prompt("p1", "Review {code_content}")).await.unwrap();

        let changes = PromptChanges {
            template_text: Some("Check {code_content} with {coding_standards}".to_string()),
            ..Default::default()
        };
        let edited = store.edit("p1", changes, Some(1)).await.unwrap();
        assert_eq!(edited.version, 2);
        assert_eq!(edited.variables, vec!["code_content", "coding_standards"]);

        let stale = PromptChanges {
            name: Some("Other".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            store.edit("p1", stale.clone(), Some(1)).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(store.edit("p1", stale, None).await.unwrap().version, 3);
    }

    #[tokio::test]
    async fn concurrent_edits_never_lose_a_version() {
        let (_tmp, store) = store().await;
        store.create(new_prompt("p1", "x")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let changes = PromptChanges {
                    description: Some(format!("edit {}", i)),
                    ..Default::default()
                };
                store.edit("p1", changes, None).await
            }));
        }
        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap().unwrap().version);
        }
        versions.sort();
        assert_eq!(versions, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn bootstrap_loads_defaults_once() {
        let (_tmp, store) = store().await;
        assert_eq!(store.bootstrap(None).await.unwrap(), 6);
        assert_eq!(store.bootstrap(None).await.unwrap(), 0);

        let review = store.get("code_review").await.unwrap();
        assert_eq!(review.category, Category::CodeQuality);
        assert!(review.variables.contains(&"code_content".to_string()));
        assert!(review.template_text.starts_with("Review the following code"));
    }

    #[tokio::test]
    async fn search_matches_words_and_orders_by_usage() {
        let (_tmp, store) = store().await;
        store.bootstrap(None).await.unwrap();

        let mut usage = HashMap::new();
        let none = store.search("security", None, &[], &usage, 10).await.unwrap();
        assert_eq!(none[0].id, "security_analysis");

        let all = store.search("", None, &[], &usage, 10).await.unwrap();
        assert_eq!(all.len(), 6);

        let tagged = store
            .search("", None, &["patterns".to_string()], &usage, 10)
            .await
            .unwrap();
        let ids: Vec<&str> = tagged.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["architecture_review", "refactoring_analysis"]);

        let mut stats = UsageStats::default();
        stats.observe(Some(5.0));
        usage.insert("test_generation".to_string(), stats);
        let all = store.search("", None, &[], &usage, 10).await.unwrap();
        assert_eq!(all[0].id, "test_generation");

        let testing = store
            .search("", Some(Category::Testing), &[], &usage, 10)
            .await
            .unwrap();
        assert_eq!(testing.len(), 1);
    }
}
