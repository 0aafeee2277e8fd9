//! Reindex pipeline.
//!
//! Coordinates one incremental run: scan → fingerprint → parse → reconcile.
//! Files whose SHA-256 matches the stored fingerprint are skipped unless the
//! run is forced. Stored paths that were not seen this run are tombstoned.
//! The resulting change set lands in a single transaction; swapping the
//! in-memory snapshot afterwards is the caller's job.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{IndexedItem, ReindexSummary, SourceFile};
use crate::parser::ParserRegistry;
use crate::progress::{ReindexProgressEvent, ReindexProgressReporter};
use crate::scan::{relative_path, scan_project, ScannedFile};
use crate::store::{ChangeSet, ContentStore};

const PROGRESS_EVERY: u64 = 100;

/// Outcome of the parse phase, before anything is written.
#[derive(Debug, Default)]
struct ParsePass {
    replace: Vec<(String, Vec<IndexedItem>)>,
    /// Paths whose stored records stay live (changed, unchanged, or failed).
    seen: HashSet<String>,
    skipped: u64,
    failed: u64,
}

pub async fn run_reindex(
    config: &Config,
    store: &ContentStore,
    parsers: Arc<ParserRegistry>,
    force: bool,
    cancel: &CancellationToken,
    progress: Arc<dyn ReindexProgressReporter>,
) -> Result<ReindexSummary> {
    progress.report(ReindexProgressEvent::Scanning);

    let scan = {
        let config = config.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || scan_project(&config, &cancel)).await??
    };
    let files_scanned = scan.files.len() as u64;
    for path in &scan.oversized {
        debug!(path = %path, "skipping oversized file");
    }

    let stored = store.fingerprints().await?;

    let pass = {
        let stored = stored.clone();
        let cancel = cancel.clone();
        let progress = progress.clone();
        let indexed_at = chrono::Utc::now().timestamp();
        tokio::task::spawn_blocking(move || {
            parse_files(
                scan.files,
                &stored,
                &parsers,
                force,
                indexed_at,
                &cancel,
                progress.as_ref(),
            )
        })
        .await??
    };

    let mut remove_paths: Vec<String> = stored
        .keys()
        .filter(|path| !pass.seen.contains(*path))
        .cloned()
        .collect();
    remove_paths.sort();

    let changes = ChangeSet {
        replace: pass.replace,
        remove_paths,
    };

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    progress.report(ReindexProgressEvent::Committing {
        changed_paths: changes.replace.len() as u64,
        removed_paths: changes.remove_paths.len() as u64,
    });
    let counts = store.apply(&changes, cancel).await?;

    let summary = ReindexSummary {
        files_scanned,
        added: counts.added,
        updated: counts.updated,
        removed: counts.removed,
        skipped: pass.skipped,
        failed: pass.failed,
    };

    info!(
        files_scanned = summary.files_scanned,
        added = summary.added,
        updated = summary.updated,
        removed = summary.removed,
        skipped = summary.skipped,
        failed = summary.failed,
        force,
        "reindex complete"
    );

    Ok(summary)
}

fn parse_files(
    files: Vec<ScannedFile>,
    stored: &HashMap<String, String>,
    parsers: &ParserRegistry,
    force: bool,
    indexed_at: i64,
    cancel: &CancellationToken,
    progress: &dyn ReindexProgressReporter,
) -> Result<ParsePass> {
    let mut pass = ParsePass::default();
    let total = files.len() as u64;

    for (n, file) in files.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let n = n as u64 + 1;
        if n % PROGRESS_EVERY == 0 || n == total {
            progress.report(ReindexProgressEvent::Parsing { n, total });
        }

        // No parser means the file is not indexable content
        if parsers.find(&file.path).is_none() {
            continue;
        }

        let bytes = match std::fs::read(&file.abs_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %file.path, error = %e, "failed to read file");
                pass.failed += 1;
                pass.seen.insert(file.path);
                continue;
            }
        };
        let fingerprint = fingerprint(&bytes);
        pass.seen.insert(file.path.clone());

        if !force && stored.get(&file.path) == Some(&fingerprint) {
            pass.skipped += 1;
            continue;
        }

        let content = match String::from_utf8(bytes) {
            Ok(content) => content,
            Err(_) => {
                warn!(path = %file.path, "file is not valid UTF-8");
                pass.failed += 1;
                continue;
            }
        };

        let source = SourceFile {
            path: file.path.clone(),
            content,
            fingerprint,
            size_bytes: file.size_bytes,
            indexed_at,
        };
        match parsers.parse(&source) {
            Ok(items) => pass.replace.push((file.path, items)),
            Err(e) => {
                warn!(path = %file.path, error = %e, "parse failed; keeping previous records");
                pass.failed += 1;
            }
        }
    }

    Ok(pass)
}

/// Hex SHA-256 of the file bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Parse a single file without touching the store.
///
/// Unlike a reindex run, a file no parser recognises is an error here.
pub fn parse_single(
    parsers: &ParserRegistry,
    project_root: &Path,
    path: &Path,
) -> Result<Vec<IndexedItem>> {
    let abs_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    };
    let bytes = std::fs::read(&abs_path)?;
    let rel = relative_path(&abs_path, project_root);

    let content = String::from_utf8(bytes)
        .map_err(|_| Error::parse_failure(rel.clone(), "file is not valid UTF-8"))?;
    let source = SourceFile {
        fingerprint: fingerprint(content.as_bytes()),
        size_bytes: content.len() as u64,
        path: rel,
        content,
        indexed_at: chrono::Utc::now().timestamp(),
    };
    parsers.parse(&source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::{db, migrate};
    use std::fs;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Config, ContentStore) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs/guide.md"), "# Guide\n\nRetry things.\n").unwrap();
        fs::write(root.join("notes.txt"), "plain notes\n").unwrap();
        fs::write(root.join("mod.py"), "def handler(event):\n    return event\n").unwrap();

        let config = Config::for_project(root);
        let pool = db::connect(&config).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, config, ContentStore::new(pool))
    }

    async fn run(config: &Config, store: &ContentStore, force: bool) -> Result<ReindexSummary> {
        run_reindex(
            config,
            store,
            Arc::new(ParserRegistry::with_builtins()),
            force,
            &CancellationToken::new(),
            Arc::new(NoProgress),
        )
        .await
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn second_run_skips_everything() {
        let (_tmp, config, store) = setup().await;

        let first = run(&config, &store, false).await.unwrap();
        assert_eq!(first.files_scanned, 3);
        assert!(first.added >= 4, "two docs, a module and a function");
        assert_eq!(first.failed, 0);

        let second = run(&config, &store, false).await.unwrap();
        assert_eq!(second.skipped, 3);
        assert_eq!((second.added, second.updated, second.removed), (0, 0, 0));
    }

    #[tokio::test]
    async fn force_reparses_unchanged_files() {
        let (_tmp, config, store) = setup().await;
        let first = run(&config, &store, false).await.unwrap();
        let forced = run(&config, &store, true).await.unwrap();
        assert_eq!(forced.skipped, 0);
        assert_eq!(forced.updated, first.added);
        assert_eq!(forced.added, 0);
    }

    #[tokio::test]
    async fn deleted_files_are_tombstoned() {
        let (tmp, config, store) = setup().await;
        run(&config, &store, false).await.unwrap();

        fs::remove_file(tmp.path().join("notes.txt")).unwrap();
        let summary = run(&config, &store, false).await.unwrap();
        assert_eq!(summary.removed, 1);
        assert!(store.get("doc:notes.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn parse_failure_keeps_previous_records() {
        let (tmp, config, store) = setup().await;
        run(&config, &store, false).await.unwrap();

        fs::write(tmp.path().join("mod.py"), "def broken(:\n").unwrap();
        let summary = run(&config, &store, false).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.removed, 0);
        assert!(store.get("code:mod.py::handler").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancelled_run_writes_nothing() {
        let (_tmp, config, store) = setup().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_reindex(
            &config,
            &store,
            Arc::new(ParserRegistry::with_builtins()),
            false,
            &cancel,
            Arc::new(NoProgress),
        )
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[test]
    fn parse_single_rejects_unknown_types() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("image.bin"), [0u8, 1]).unwrap();
        fs::write(tmp.path().join("readme.md"), "# Hi\n").unwrap();
        let parsers = ParserRegistry::with_builtins();

        assert!(matches!(
            parse_single(&parsers, tmp.path(), Path::new("image.bin")),
            Err(Error::ParseFailure { .. })
        ));
        let items = parse_single(&parsers, tmp.path(), Path::new("readme.md")).unwrap();
        assert_eq!(items[0].id, "doc:readme.md");
    }
}
