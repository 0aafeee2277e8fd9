//! Index statistics and health overview.
//!
//! Provides a quick summary of what's indexed: item counts by kind and
//! language, prompt and usage totals, and database size. Used by `dh stats`
//! and the `stats` tool to give confidence that reindexing is working.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::ItemKind;
use crate::search::SearchIndex;

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub db_path: String,
    pub db_size_bytes: u64,
    pub files: u64,
    pub documents: u64,
    pub code_entities: u64,
    /// Items per language (code) or doc type (documents).
    pub by_language: BTreeMap<String, u64>,
    pub terms: u64,
    pub prompts: i64,
    pub usage_events: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_indexed_at: Option<i64>,
}

/// Snapshot-derived counts. Store-level totals are filled in by the caller.
pub fn collect(index: &SearchIndex) -> EngineStats {
    let mut stats = EngineStats {
        terms: index.term_count() as u64,
        ..EngineStats::default()
    };
    let mut last_path: Option<&str> = None;

    for item in index.items() {
        if last_path != Some(item.path.as_str()) {
            stats.files += 1;
            last_path = Some(item.path.as_str());
        }
        match item.kind {
            ItemKind::Document => stats.documents += 1,
            ItemKind::CodeEntity => stats.code_entities += 1,
        }

        let language = item
            .metadata
            .get("language")
            .and_then(|l| l.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| item.doc_type());
        *stats.by_language.entry(language).or_default() += 1;

        stats.last_indexed_at = Some(
            stats
                .last_indexed_at
                .map_or(item.indexed_at, |t| t.max(item.indexed_at)),
        );
    }

    stats
}

/// Print a stats summary to stdout.
pub fn print_stats(stats: &EngineStats) {
    println!("Docs Harness Index Stats");
    println!("========================");
    println!();
    println!("  Database:      {}", stats.db_path);
    println!("  Size:          {}", format_bytes(stats.db_size_bytes));
    println!(
        "  Last indexed:  {}",
        stats
            .last_indexed_at
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("  Files:         {}", stats.files);
    println!("  Documents:     {}", stats.documents);
    println!("  Code entities: {}", stats.code_entities);
    println!("  Terms:         {}", stats.terms);
    println!("  Prompts:       {}", stats.prompts);
    println!("  Usage events:  {}", stats.usage_events);

    if !stats.by_language.is_empty() {
        println!();
        println!("  By language:");
        println!("  {:<16} {:>8}", "LANGUAGE", "ITEMS");
        println!("  {}", "-".repeat(25));
        for (language, count) in &stats.by_language {
            let label = if language.is_empty() { "(none)" } else { language };
            println!("  {:<16} {:>8}", label, count);
        }
    }
    println!();
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts(ts)
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndexedItem;

    fn item(id: &str, path: &str, kind: ItemKind, language: Option<&str>, at: i64) -> IndexedItem {
        IndexedItem {
            id: id.to_string(),
            path: path.to_string(),
            fingerprint: "f".to_string(),
            kind,
            title: "t".to_string(),
            content: "some words".to_string(),
            metadata: match language {
                Some(l) => serde_json::json!({ "language": l }),
                None => serde_json::json!({}),
            },
            indexed_at: at,
            code: None,
        }
    }

    #[test]
    fn counts_files_kinds_and_languages() {
        let index = SearchIndex::build(vec![
            item("doc:a.md", "a.md", ItemKind::Document, None, 5),
            item("code:m.py", "m.py", ItemKind::CodeEntity, Some("python"), 7),
            item("code:m.py::f", "m.py", ItemKind::CodeEntity, Some("python"), 7),
        ]);
        let stats = collect(&index);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.code_entities, 2);
        assert_eq!(stats.by_language["python"], 2);
        assert_eq!(stats.by_language["md"], 1);
        assert_eq!(stats.last_indexed_at, Some(7));
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
