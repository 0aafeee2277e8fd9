//! The engine handle.
//!
//! [`Engine`] owns the database pool, the content and prompt stores, the
//! usage recorder and the current search snapshot. Every query runs against
//! an `Arc<SearchIndex>` taken at call time, so reads never wait on a
//! reindex; a successful reindex builds a fresh snapshot and swaps it in.
//!
//! ```text
//! open ──► migrate ──► load usage ──► bootstrap prompts ──► build snapshot
//!                                                               │
//! reindex ──► scan / parse / apply (one tx) ──► rebuild ──► swap ┘
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::context::{self, ArchitectureDoc, PromptSuggestion, ReuseCandidate};
use crate::error::{Error, Result};
use crate::get::ItemResponse;
use crate::ingest;
use crate::models::{
    Category, IndexedItem, ItemKind, NewPrompt, PromptChanges, PromptTemplate, ReindexSummary,
    SearchHit, UsageEvent, UsageStats,
};
use crate::parser::ParserRegistry;
use crate::progress::{NoProgress, ReindexProgressReporter};
use crate::prompts::PromptStore;
use crate::resolve::{self, GeneratedPrompt, Resolution, ValueSource};
use crate::search::{Ranking, SearchIndex, SearchOptions, SimilaritySignal};
use crate::stats::{self, EngineStats};
use crate::store::ContentStore;
use crate::usage::UsageRecorder;
use crate::{db, migrate};

const DEFAULT_REUSE_LIMIT: usize = 5;
const DEFAULT_SUGGEST_LIMIT: usize = 5;

/// Filters for [`Engine::search_docs`].
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub kind: Option<ItemKind>,
    pub doc_type: Option<String>,
    pub path_prefix: Option<String>,
    pub limit: Option<usize>,
}

pub struct Engine {
    config: Config,
    pool: SqlitePool,
    store: ContentStore,
    prompts: PromptStore,
    usage: UsageRecorder,
    parsers: Arc<ParserRegistry>,
    snapshot: RwLock<Arc<SearchIndex>>,
    reindex_guard: Mutex<()>,
    /// Set while the committed store is ahead of the snapshot.
    snapshot_stale: AtomicBool,
    similarity: Option<Arc<dyn SimilaritySignal>>,
}

impl Engine {
    /// Open with the built-in parsers and no similarity signal.
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with(config, Arc::new(ParserRegistry::with_builtins()), None).await
    }

    pub async fn open_with(
        config: Config,
        parsers: Arc<ParserRegistry>,
        similarity: Option<Arc<dyn SimilaritySignal>>,
    ) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;

        let store = ContentStore::new(pool.clone());
        let prompts = PromptStore::new(pool.clone());
        let usage = UsageRecorder::load(pool.clone()).await?;
        prompts
            .bootstrap(config.prompts.bootstrap_file.as_deref())
            .await?;

        let index = build_snapshot(&store).await?;
        info!(
            db = %config.db.path.display(),
            items = index.len(),
            parsers = parsers.len(),
            "engine opened"
        );

        let engine = Self {
            config,
            pool,
            store,
            prompts,
            usage,
            parsers,
            snapshot: RwLock::new(Arc::new(index)),
            reindex_guard: Mutex::new(()),
            snapshot_stale: AtomicBool::new(false),
            similarity,
        };

        if engine.config.indexing.index_on_open {
            engine.reindex(false, &CancellationToken::new()).await?;
        }
        Ok(engine)
    }

    /// Close the database pool. Pending writes finish first.
    pub async fn close(self) {
        self.pool.close().await;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The current search snapshot.
    pub fn snapshot(&self) -> Arc<SearchIndex> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn swap_snapshot(&self, index: SearchIndex) {
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(index);
    }

    // ── Indexing ─────────────────────────────────────────────────────────

    pub async fn reindex(&self, force: bool, cancel: &CancellationToken) -> Result<ReindexSummary> {
        self.reindex_with_progress(force, cancel, Arc::new(NoProgress))
            .await
    }

    /// Run one incremental reindex. Rejected while another run holds the guard.
    pub async fn reindex_with_progress(
        &self,
        force: bool,
        cancel: &CancellationToken,
        progress: Arc<dyn ReindexProgressReporter>,
    ) -> Result<ReindexSummary> {
        let _guard = self
            .reindex_guard
            .try_lock()
            .map_err(|_| Error::ConcurrentReindexRejected)?;

        let summary = ingest::run_reindex(
            &self.config,
            &self.store,
            self.parsers.clone(),
            force,
            cancel,
            progress,
        )
        .await?;

        if summary.added + summary.updated + summary.removed > 0 {
            self.snapshot_stale.store(true, Ordering::SeqCst);
        }
        // A failed rebuild leaves the flag set so the next run retries it
        // even when nothing on disk changed.
        if self.snapshot_stale.load(Ordering::SeqCst) {
            let index = build_snapshot(&self.store).await?;
            debug!(items = index.len(), "swapping search snapshot");
            self.swap_snapshot(index);
            self.snapshot_stale.store(false, Ordering::SeqCst);
        }
        Ok(summary)
    }

    pub fn is_reindexing(&self) -> bool {
        self.reindex_guard.try_lock().is_err()
    }

    /// Parse one file with the registered parsers without indexing it.
    pub async fn parse_file(&self, path: &Path) -> Result<Vec<IndexedItem>> {
        let parsers = self.parsers.clone();
        let root = self.config.indexing.project_root.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || ingest::parse_single(&parsers, &root, &path)).await?
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn search_docs(&self, query: &str, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let opts = SearchOptions {
            kind: request.kind,
            path_prefix: request.path_prefix.clone(),
            doc_type: request.doc_type.as_ref().map(|d| d.to_lowercase()),
            limit: self.limit(request.limit, self.config.retrieval.default_limit)?,
        };
        let index = self.snapshot();
        let usage = self.usage.read();
        Ok(index.search(query, &opts, &self.ranking(Some(&*usage))))
    }

    /// Documents only, optionally restricted to one doc type.
    pub fn find_documents(
        &self,
        query: &str,
        doc_type: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        self.search_docs(
            query,
            &SearchRequest {
                kind: Some(ItemKind::Document),
                doc_type: doc_type.map(str::to_string),
                path_prefix: None,
                limit,
            },
        )
    }

    pub fn find_code_reuse(
        &self,
        functionality: &str,
        service_context: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ReuseCandidate>> {
        let limit = self.limit(limit, DEFAULT_REUSE_LIMIT)?;
        let index = self.snapshot();
        let usage = self.usage.read();
        Ok(context::find_reusable_code(
            &index,
            &self.ranking(Some(&*usage)),
            functionality,
            service_context,
            limit,
        ))
    }

    pub fn architecture_info(&self, limit: Option<usize>) -> Result<Vec<ArchitectureDoc>> {
        let limit = self.limit(limit, self.config.retrieval.default_limit)?;
        let index = self.snapshot();
        let usage = self.usage.read();
        Ok(context::architecture_info(
            &index,
            &self.ranking(Some(&*usage)),
            &self.config.architecture_keywords,
            limit,
        ))
    }

    pub async fn get_item(&self, id: &str) -> Result<ItemResponse> {
        if let Some(item) = self.snapshot().get(id) {
            return Ok(ItemResponse::from(item));
        }
        self.store
            .get(id)
            .await?
            .map(|item| ItemResponse::from(&item))
            .ok_or_else(|| Error::not_found("item", id))
    }

    // ── Prompts ──────────────────────────────────────────────────────────

    pub async fn create_prompt(&self, new: NewPrompt) -> Result<PromptTemplate> {
        self.prompts.create(new).await
    }

    pub async fn get_prompt(&self, id: &str) -> Result<PromptTemplate> {
        self.prompts.get(id).await
    }

    pub async fn edit_prompt(
        &self,
        id: &str,
        changes: PromptChanges,
        expected_version: Option<i64>,
    ) -> Result<PromptTemplate> {
        self.prompts.edit(id, changes, expected_version).await
    }

    pub async fn list_prompts(&self, category: Option<&str>) -> Result<Vec<PromptTemplate>> {
        let category = category.map(Category::parse).transpose()?;
        self.prompts.list(category).await
    }

    pub async fn search_prompts(
        &self,
        query: &str,
        category: Option<&str>,
        tags: &[String],
        limit: Option<usize>,
    ) -> Result<Vec<PromptTemplate>> {
        let limit = self.limit(limit, self.config.retrieval.default_limit)?;
        let category = category.map(Category::parse).transpose()?;
        let usage = self.usage_snapshot();
        self.prompts
            .search(query, category, tags, &usage, limit)
            .await
    }

    pub async fn suggest_prompts(
        &self,
        task_context: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PromptSuggestion>> {
        let limit = self.limit(limit, DEFAULT_SUGGEST_LIMIT)?;
        let prompts = self.prompts.list(None).await?;
        let usage = self.usage_snapshot();
        Ok(context::suggest_prompts(&prompts, &usage, task_context, limit))
    }

    /// Fill a prompt's placeholders and render it.
    ///
    /// Records one usage event for the prompt and one for every item whose
    /// content was used to fill a placeholder.
    pub async fn resolve_prompt(
        &self,
        id: &str,
        explicit: &HashMap<String, String>,
        auto_fill: bool,
        task: Option<&str>,
    ) -> Result<Resolution> {
        let prompt = self.prompts.get(id).await?;
        let resolution = self.resolve_loaded(&prompt, explicit, auto_fill, task)?;

        let snippet = task
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("resolved")
            .to_string();
        self.record_resolution(&resolution, &snippet).await;
        Ok(resolution)
    }

    /// Bind `content` to the prompt's content placeholders and resolve the rest.
    pub async fn apply_prompt_with_context(
        &self,
        id: &str,
        content: &str,
        auto_fill: bool,
    ) -> Result<Resolution> {
        let prompt = self.prompts.get(id).await?;
        let explicit = resolve::content_bindings(&prompt, content);
        let resolution = self.resolve_loaded(&prompt, &explicit, auto_fill, None)?;

        let snippet = format!("Applied to content length: {}", content.chars().count());
        self.record_resolution(&resolution, &snippet).await;
        Ok(resolution)
    }

    pub fn generate_contextual_prompt(&self, task: &str, docs_query: &str) -> Result<GeneratedPrompt> {
        let index = self.snapshot();
        let usage = self.usage.read();
        resolve::generate_contextual_prompt(task, docs_query, &index, &self.ranking(Some(&*usage)))
    }

    fn resolve_loaded(
        &self,
        prompt: &PromptTemplate,
        explicit: &HashMap<String, String>,
        auto_fill: bool,
        task: Option<&str>,
    ) -> Result<Resolution> {
        let index = self.snapshot();
        let usage = self.usage.read();
        resolve::resolve(
            prompt,
            explicit,
            auto_fill,
            task,
            &index,
            &self.ranking(Some(&*usage)),
        )
    }

    async fn record_resolution(&self, resolution: &Resolution, snippet: &str) {
        self.usage
            .record(&resolution.prompt_id, snippet, None)
            .await;
        for source in resolution.sources.values() {
            if let ValueSource::Context { item_id, query } = source {
                self.usage.record(item_id, query, None).await;
            }
        }
    }

    // ── Usage and stats ──────────────────────────────────────────────────

    pub async fn record_usage(
        &self,
        subject_id: &str,
        context_snippet: &str,
        outcome_score: Option<f64>,
    ) -> Result<()> {
        if subject_id.trim().is_empty() {
            return Err(Error::validation("subject_id must not be empty"));
        }
        if let Some(score) = outcome_score {
            if !score.is_finite() {
                return Err(Error::validation("outcome_score must be a finite number"));
            }
        }
        self.usage
            .record(subject_id, context_snippet, outcome_score)
            .await;
        Ok(())
    }

    pub fn usage_stats(&self, subject_id: &str) -> UsageStats {
        self.usage.stats(subject_id)
    }

    pub async fn usage_events(&self, subject_id: &str) -> Result<Vec<UsageEvent>> {
        self.usage.events_for(subject_id).await
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        let mut stats = stats::collect(&self.snapshot());
        stats.db_path = self.config.db.path.display().to_string();
        stats.db_size_bytes = std::fs::metadata(&self.config.db.path)
            .map(|m| m.len())
            .unwrap_or(0);
        stats.prompts = self.prompts.count().await?;
        stats.usage_events = self.usage.total_events().await?;
        Ok(stats)
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn ranking<'a>(&'a self, usage: Option<&'a HashMap<String, UsageStats>>) -> Ranking<'a> {
        Ranking {
            retrieval: &self.config.retrieval,
            usage,
            similarity: self.similarity.as_deref(),
        }
    }

    /// Owned copy of the usage aggregate for use across `.await` points.
    fn usage_snapshot(&self) -> HashMap<String, UsageStats> {
        self.usage.read().clone()
    }

    fn limit(&self, requested: Option<usize>, default: usize) -> Result<usize> {
        match requested {
            Some(0) => Err(Error::validation("limit must be >= 1")),
            Some(n) => Ok(n),
            None => Ok(default),
        }
    }
}

async fn build_snapshot(store: &ContentStore) -> Result<SearchIndex> {
    let items = store.load_all().await?;
    Ok(tokio::task::spawn_blocking(move || SearchIndex::build(items)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    async fn open_project(files: &[(&str, &str)]) -> (TempDir, Engine) {
        let tmp = TempDir::new().unwrap();
        for (path, content) in files {
            let abs = tmp.path().join(path);
            fs::create_dir_all(abs.parent().unwrap()).unwrap();
            fs::write(abs, content).unwrap();
        }
        let engine = Engine::open(Config::for_project(tmp.path())).await.unwrap();
        (tmp, engine)
    }

    #[tokio::test]
    async fn open_bootstraps_prompts_and_starts_empty() {
        let (_tmp, engine) = open_project(&[("a.md", "# A\n\nalpha\n")]).await;
        assert!(engine.snapshot().is_empty());
        assert_eq!(engine.stats().await.unwrap().prompts, 6);
    }

    #[tokio::test]
    async fn reindex_swaps_snapshot() {
        let (_tmp, engine) = open_project(&[("a.md", "# A\n\nalpha beta\n")]).await;
        let summary = engine.reindex(false, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.added, 1);
        let hits = engine
            .search_docs("alpha", &SearchRequest::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "a.md");
    }

    #[tokio::test]
    async fn stale_snapshot_is_rebuilt_on_unchanged_run() {
        let (_tmp, engine) = open_project(&[("a.md", "# A\n\nalpha beta\n")]).await;
        engine.reindex(false, &CancellationToken::new()).await.unwrap();

        // Store committed, rebuild never landed.
        engine.swap_snapshot(SearchIndex::build(Vec::new()));
        engine.snapshot_stale.store(true, Ordering::SeqCst);

        let summary = engine.reindex(false, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.added + summary.updated + summary.removed, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(engine.snapshot().len(), 1);
        assert!(!engine.snapshot_stale.load(Ordering::SeqCst));

        let hits = engine
            .search_docs("alpha", &SearchRequest::default())
            .unwrap();
        assert_eq!(hits[0].path, "a.md");
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let (_tmp, engine) = open_project(&[]).await;
        let request = SearchRequest {
            limit: Some(0),
            ..SearchRequest::default()
        };
        assert!(matches!(
            engine.search_docs("alpha", &request),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn get_item_unknown_is_not_found() {
        let (_tmp, engine) = open_project(&[]).await;
        let err = engine.get_item("doc:missing.md").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn resolve_records_prompt_and_context_usage() {
        let (_tmp, engine) = open_project(&[(
            "docs/security.md",
            "# Security\n\nAlways validate authentication tokens and security headers.\n",
        )])
        .await;
        engine.reindex(false, &CancellationToken::new()).await.unwrap();

        engine
            .create_prompt(NewPrompt {
                id: Some("sec".to_string()),
                name: "Sec".to_string(),
                template_text: "Check {code}\n\n{security_guidelines}".to_string(),
                ..NewPrompt::default()
            })
            .await
            .unwrap();

        let explicit = HashMap::from([("code".to_string(), "fn main() {}".to_string())]);
        let resolution = engine
            .resolve_prompt("sec", &explicit, true, None)
            .await
            .unwrap();
        assert!(resolution.text.contains("validate authentication"));
        assert_eq!(engine.usage_stats("sec").count, 1);
        assert_eq!(engine.usage_stats("doc:docs/security.md").count, 1);
    }

    #[tokio::test]
    async fn record_usage_rejects_empty_subject() {
        let (_tmp, engine) = open_project(&[]).await;
        assert!(matches!(
            engine.record_usage(" ", "x", None).await,
            Err(Error::Validation(_))
        ));
        engine.record_usage("p", "x", Some(0.5)).await.unwrap();
        assert_eq!(engine.usage_stats("p").count, 1);
    }
}
