//! Capability-based parser registry.
//!
//! Each [`Parser`] declares which paths it can handle and turns one
//! [`SourceFile`] into zero or more [`IndexedItem`]s. The indexer asks the
//! [`ParserRegistry`] for the first parser that accepts a path; files with no
//! parser are skipped.
//!
//! # Example
//!
//! ```rust
//! use docs_harness::parser::ParserRegistry;
//!
//! let registry = ParserRegistry::with_builtins();
//! assert!(registry.find("docs/guide.md").is_some());
//! assert!(registry.find("image.png").is_none());
//! ```

use crate::code::CodeParser;
use crate::error::{Error, Result};
use crate::markdown::MarkdownParser;
use crate::models::{IndexedItem, SourceFile};
use crate::plaintext::PlainTextParser;

pub trait Parser: Send + Sync {
    /// Short identifier used in logs (`"markdown"`, `"python"`).
    fn name(&self) -> &str;

    fn can_handle(&self, path: &str) -> bool;

    /// Parse one file. Must be all-or-nothing: on error no items are produced.
    fn parse(&self, file: &SourceFile) -> Result<Vec<IndexedItem>>;
}

pub struct ParserRegistry {
    parsers: Vec<Box<dyn Parser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// Markdown, plain text, Python and Rust.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(MarkdownParser));
        registry.register(Box::new(PlainTextParser));
        registry.register(Box::new(CodeParser::python()));
        registry.register(Box::new(CodeParser::rust()));
        registry
    }

    /// Later registrations are consulted after earlier ones.
    pub fn register(&mut self, parser: Box<dyn Parser>) {
        self.parsers.push(parser);
    }

    pub fn find(&self, path: &str) -> Option<&dyn Parser> {
        self.parsers
            .iter()
            .find(|p| p.can_handle(path))
            .map(|p| p.as_ref())
    }

    /// Parse a file explicitly. Unlike indexing, an unrecognised file is an error.
    pub fn parse(&self, file: &SourceFile) -> Result<Vec<IndexedItem>> {
        let parser = self.find(&file.path).ok_or_else(|| {
            Error::parse_failure(&file.path, "no parser registered for this file type")
        })?;
        parser.parse(file)
    }

    pub fn names(&self) -> Vec<&str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Lowercased extension of a `/`-separated path.
pub(crate) fn extension(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

/// File name without extension.
pub(crate) fn file_stem(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

/// Metadata every parser records.
pub(crate) fn base_metadata(file: &SourceFile) -> serde_json::Map<String, serde_json::Value> {
    let mut meta = serde_json::Map::new();
    meta.insert(
        "doc_type".to_string(),
        serde_json::Value::String(extension(&file.path).unwrap_or_default()),
    );
    meta.insert("size_bytes".to_string(), serde_json::json!(file.size_bytes));
    meta.insert(
        "line_count".to_string(),
        serde_json::json!(file.content.lines().count()),
    );
    meta
}

#[cfg(test)]
pub(crate) fn source(path: &str, content: &str) -> SourceFile {
    SourceFile {
        path: path.to_string(),
        content: content.to_string(),
        fingerprint: "f".repeat(64),
        size_bytes: content.len() as u64,
        indexed_at: 1_700_000_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_expected_extensions() {
        let registry = ParserRegistry::with_builtins();
        assert_eq!(registry.find("a/b.md").map(|p| p.name()), Some("markdown"));
        assert_eq!(registry.find("notes.txt").map(|p| p.name()), Some("text"));
        assert_eq!(registry.find("cfg.yaml").map(|p| p.name()), Some("text"));
        assert_eq!(registry.find("svc/utils.py").map(|p| p.name()), Some("python"));
        assert_eq!(registry.find("src/lib.rs").map(|p| p.name()), Some("rust"));
        assert!(registry.find("logo.png").is_none());
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn explicit_parse_of_unknown_type_fails() {
        let registry = ParserRegistry::with_builtins();
        let err = registry.parse(&source("logo.png", "")).unwrap_err();
        assert!(matches!(err, Error::ParseFailure { .. }));
    }

    #[test]
    fn file_stem_and_extension() {
        assert_eq!(file_stem("docs/Guide.MD"), "Guide");
        assert_eq!(extension("docs/Guide.MD").as_deref(), Some("md"));
        assert_eq!(extension("Makefile"), None);
    }
}
