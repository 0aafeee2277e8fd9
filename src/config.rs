//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults, so a
//! minimal config is just:
//!
//! ```toml
//! [db]
//! path = "./data/harness.sqlite"
//! ```
//!
//! See `config/harness.example.toml` for every key.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Keywords that mark a document as architecture material.
    #[serde(default = "default_architecture_keywords")]
    pub architecture_keywords: Vec<String>,
    pub db: DbConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    /// Directories to walk, relative to `project_root`.
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    /// Extra excludes; the built-in excludes always apply.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Run an incremental reindex whenever the engine is opened.
    #[serde(default)]
    pub index_on_open: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            roots: default_roots(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            max_file_size_bytes: default_max_file_size_bytes(),
            follow_symlinks: false,
            index_on_open: false,
        }
    }
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}
fn default_include_globs() -> Vec<String> {
    [
        "**/*.md",
        "**/*.markdown",
        "**/*.rst",
        "**/*.txt",
        "**/*.yaml",
        "**/*.yml",
        "**/*.json",
        "**/*.toml",
        "**/*.py",
        "**/*.rs",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_file_size_bytes() -> u64 {
    10 * 1024 * 1024
}

/// Directory names never worth indexing.
pub const BUILTIN_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/target/**",
    "**/node_modules/**",
    "**/__pycache__/**",
    "**/.venv/**",
    "**/venv/**",
    "**/dist/**",
    "**/build/**",
    "**/.docs-harness/**",
];

impl IndexingConfig {
    /// User excludes merged after the built-in ones.
    pub fn effective_excludes(&self) -> Vec<String> {
        let mut excludes: Vec<String> = BUILTIN_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(self.exclude_globs.iter().cloned());
        excludes
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,
    #[serde(default = "default_fuzzy_max_distance")]
    pub fuzzy_max_distance: usize,
    #[serde(default = "default_title_boost")]
    pub title_boost: f64,
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
    #[serde(default = "default_recency_half_life_days")]
    pub recency_half_life_days: f64,
    #[serde(default = "default_usage_weight")]
    pub usage_weight: f64,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    #[serde(default = "default_context_snippet_chars")]
    pub context_snippet_chars: usize,
    #[serde(default = "default_same_service_boost")]
    pub same_service_boost: f64,
    #[serde(default = "default_sibling_service_boost")]
    pub sibling_service_boost: f64,
    /// Share of the final score taken from a similarity signal, when one is installed.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            min_query_chars: default_min_query_chars(),
            fuzzy_max_distance: default_fuzzy_max_distance(),
            title_boost: default_title_boost(),
            recency_weight: default_recency_weight(),
            recency_half_life_days: default_recency_half_life_days(),
            usage_weight: default_usage_weight(),
            snippet_chars: default_snippet_chars(),
            context_snippet_chars: default_context_snippet_chars(),
            same_service_boost: default_same_service_boost(),
            sibling_service_boost: default_sibling_service_boost(),
            semantic_weight: default_semantic_weight(),
        }
    }
}

fn default_limit() -> usize {
    10
}
fn default_min_query_chars() -> usize {
    2
}
fn default_fuzzy_max_distance() -> usize {
    1
}
fn default_title_boost() -> f64 {
    2.0
}
fn default_recency_weight() -> f64 {
    0.1
}
fn default_recency_half_life_days() -> f64 {
    30.0
}
fn default_usage_weight() -> f64 {
    0.05
}
fn default_snippet_chars() -> usize {
    200
}
fn default_context_snippet_chars() -> usize {
    500
}
fn default_same_service_boost() -> f64 {
    1.0
}
fn default_sibling_service_boost() -> f64 {
    0.25
}
fn default_semantic_weight() -> f64 {
    0.3
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PromptsConfig {
    /// TOML file with `[[prompt]]` entries loaded into an empty prompt table.
    /// The built-in templates are used when unset.
    #[serde(default)]
    pub bootstrap_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

fn default_architecture_keywords() -> Vec<String> {
    [
        "architecture",
        "design",
        "pattern",
        "microservice",
        "api",
        "endpoint",
        "service",
        "component",
        "module",
        "database",
        "schema",
        "model",
        "workflow",
        "deployment",
        "infrastructure",
        "system",
        "integration",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    /// Config for indexing `project_root` with every other setting at its
    /// default. The database lives under `<project_root>/.docs-harness/`.
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let db_path = project_root.join(".docs-harness").join("index.sqlite");
        Self {
            architecture_keywords: default_architecture_keywords(),
            db: DbConfig { path: db_path },
            indexing: IndexingConfig {
                project_root,
                ..IndexingConfig::default()
            },
            retrieval: RetrievalConfig::default(),
            prompts: PromptsConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Absolute-or-cwd-relative directories to walk.
    pub fn resolved_roots(&self) -> Vec<PathBuf> {
        self.indexing
            .roots
            .iter()
            .map(|r| self.indexing.project_root.join(r))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.indexing.roots.is_empty() {
            anyhow::bail!("indexing.roots must list at least one directory");
        }
        if self.indexing.include_globs.is_empty() {
            anyhow::bail!("indexing.include_globs must not be empty");
        }
        if self.indexing.max_file_size_bytes == 0 {
            anyhow::bail!("indexing.max_file_size_bytes must be > 0");
        }
        for pattern in self
            .indexing
            .include_globs
            .iter()
            .chain(self.indexing.exclude_globs.iter())
        {
            globset::Glob::new(pattern)
                .with_context(|| format!("invalid glob in indexing config: '{}'", pattern))?;
        }

        let r = &self.retrieval;
        if r.default_limit < 1 {
            anyhow::bail!("retrieval.default_limit must be >= 1");
        }
        if r.min_query_chars < 1 {
            anyhow::bail!("retrieval.min_query_chars must be >= 1");
        }
        if r.snippet_chars == 0 || r.context_snippet_chars == 0 {
            anyhow::bail!("retrieval snippet lengths must be > 0");
        }
        if r.recency_half_life_days <= 0.0 {
            anyhow::bail!("retrieval.recency_half_life_days must be > 0");
        }
        if !(0.0..=1.0).contains(&r.semantic_weight) {
            anyhow::bail!("retrieval.semantic_weight must be in [0.0, 1.0]");
        }
        for (name, value) in [
            ("title_boost", r.title_boost),
            ("recency_weight", r.recency_weight),
            ("usage_weight", r.usage_weight),
            ("same_service_boost", r.same_service_boost),
            ("sibling_service_boost", r.sibling_service_boost),
        ] {
            if value < 0.0 || !value.is_finite() {
                anyhow::bail!("retrieval.{} must be a finite value >= 0", name);
            }
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: Config = toml::from_str("[db]\npath = \"x.sqlite\"\n").unwrap();
        config.validate().unwrap();
        assert_eq!(config.retrieval.fuzzy_max_distance, 1);
        assert_eq!(config.retrieval.snippet_chars, 200);
        assert_eq!(config.indexing.max_file_size_bytes, 10 * 1024 * 1024);
        assert!(config
            .architecture_keywords
            .contains(&"microservice".to_string()));
    }

    #[test]
    fn excludes_always_include_builtins() {
        let config: Config = toml::from_str(
            "[db]\npath = \"x.sqlite\"\n[indexing]\nexclude_globs = [\"**/vendor/**\"]\n",
        )
        .unwrap();
        let excludes = config.indexing.effective_excludes();
        assert!(excludes.contains(&"**/.git/**".to_string()));
        assert_eq!(excludes.last().map(String::as_str), Some("**/vendor/**"));
    }

    #[test]
    fn rejects_out_of_range_semantic_weight() {
        let config: Config =
            toml::from_str("[db]\npath = \"x.sqlite\"\n[retrieval]\nsemantic_weight = 1.5\n")
                .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_glob() {
        let config: Config =
            toml::from_str("[db]\npath = \"x.sqlite\"\n[indexing]\ninclude_globs = [\"a/[\"]\n")
                .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn for_project_places_db_under_hidden_dir() {
        let config = Config::for_project("/tmp/project");
        assert!(config.db.path.starts_with("/tmp/project/.docs-harness"));
        assert_eq!(config.resolved_roots(), vec![PathBuf::from("/tmp/project/.")]);
    }
}
