//! Project tree enumeration.
//!
//! Walks every configured root, keeps files that match an include glob and
//! no exclude glob (matched against the project-relative path), and sets
//! aside files over the size limit. Results are sorted by path so every run
//! sees the same order.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Project-relative, `/`-separated.
    pub path: String,
    pub abs_path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: Vec<ScannedFile>,
    /// Matching files skipped for exceeding `max_file_size_bytes`.
    pub oversized: Vec<String>,
}

pub fn scan_project(config: &Config, cancel: &CancellationToken) -> Result<ScanResult> {
    let indexing = &config.indexing;
    let project_root = &indexing.project_root;

    let include_set = build_globset(&indexing.include_globs)?;
    let exclude_set = build_globset(&indexing.effective_excludes())?;

    let mut found: BTreeMap<String, ScannedFile> = BTreeMap::new();
    let mut oversized = Vec::new();

    for root in config.resolved_roots() {
        if !root.exists() {
            return Err(Error::validation(format!(
                "index root does not exist: {}",
                root.display()
            )));
        }

        let walker = WalkDir::new(&root).follow_links(indexing.follow_symlinks);
        for entry in walker {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable path");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let rel_str = relative_path(entry.path(), project_root);

            // Apply exclude patterns
            if exclude_set.is_match(&rel_str) {
                continue;
            }

            // Apply include patterns
            if !include_set.is_match(&rel_str) {
                continue;
            }

            let size_bytes = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!(path = %rel_str, error = %e, "cannot stat file");
                    continue;
                }
            };
            if size_bytes > indexing.max_file_size_bytes {
                debug!(path = %rel_str, size_bytes, "file exceeds size limit");
                oversized.push(rel_str);
                continue;
            }

            found.entry(rel_str.clone()).or_insert(ScannedFile {
                path: rel_str,
                abs_path: entry.path().to_path_buf(),
                size_bytes,
            });
        }
    }

    oversized.sort();
    oversized.dedup();

    Ok(ScanResult {
        files: found.into_values().collect(),
        oversized,
    })
}

/// `/`-joined path of `path` relative to `base` (or `path` itself when unrelated).
pub fn relative_path(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> (TempDir, Config) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join("services/api-gateway")).unwrap();
        fs::write(root.join("docs/guide.md"), "# Guide").unwrap();
        fs::write(root.join("docs/logo.png"), [0u8, 1, 2]).unwrap();
        fs::write(root.join("node_modules/pkg/readme.md"), "# Vendored").unwrap();
        fs::write(root.join("services/api-gateway/utils.py"), "x = 1\n").unwrap();
        fs::write(root.join("README.md"), "# Readme").unwrap();

        let config = Config::for_project(root);
        (tmp, config)
    }

    #[test]
    fn include_and_builtin_excludes_apply() {
        let (_tmp, config) = project();
        let result = scan_project(&config, &CancellationToken::new()).unwrap();
        let paths: Vec<&str> = result.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["README.md", "docs/guide.md", "services/api-gateway/utils.py"]
        );
    }

    #[test]
    fn user_excludes_and_size_limit() {
        let (_tmp, mut config) = project();
        config.indexing.exclude_globs = vec!["docs/**".to_string()];
        config.indexing.max_file_size_bytes = 7;

        let result = scan_project(&config, &CancellationToken::new()).unwrap();
        let paths: Vec<&str> = result.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["services/api-gateway/utils.py"]);
        assert_eq!(result.oversized, vec!["README.md"]);
    }

    #[test]
    fn overlapping_roots_do_not_duplicate() {
        let (_tmp, mut config) = project();
        config.indexing.roots = vec![PathBuf::from("."), PathBuf::from("docs")];
        let result = scan_project(&config, &CancellationToken::new()).unwrap();
        assert_eq!(
            result.files.iter().filter(|f| f.path == "docs/guide.md").count(),
            1
        );
    }

    #[test]
    fn cancelled_scan_returns_cancelled() {
        let (_tmp, config) = project();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            scan_project(&config, &token),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn missing_root_is_rejected() {
        let (_tmp, mut config) = project();
        config.indexing.roots = vec![PathBuf::from("nope")];
        assert!(matches!(
            scan_project(&config, &CancellationToken::new()),
            Err(Error::Validation(_))
        ));
    }
}
