//! Item retrieval by ID.
//!
//! Shapes a stored [`IndexedItem`] for output. Used by both the `dh get` CLI
//! command and the `get_item` tool.

use serde::Serialize;

use crate::models::{CodeEntity, IndexedItem, Section};

/// Full item with its timestamp rendered as ISO 8601.
#[derive(Debug, Clone, Serialize)]
pub struct ItemResponse {
    pub id: String,
    pub path: String,
    pub kind: String,
    pub title: String,
    pub fingerprint: String,
    pub indexed_at: String,
    pub content: String,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeEntity>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<Section>,
}

impl From<&IndexedItem> for ItemResponse {
    fn from(item: &IndexedItem) -> Self {
        Self {
            id: item.id.clone(),
            path: item.path.clone(),
            kind: item.kind.as_str().to_string(),
            title: item.title.clone(),
            fingerprint: item.fingerprint.clone(),
            indexed_at: format_ts_iso(item.indexed_at),
            content: item.content.clone(),
            metadata: item.metadata.clone(),
            code: item.code.clone(),
            sections: item.sections(),
        }
    }
}

/// Print an item to stdout.
pub fn print_item(item: &ItemResponse) {
    println!("--- Item ---");
    println!("id:          {}", item.id);
    println!("kind:        {}", item.kind);
    println!("title:       {}", item.title);
    println!("path:        {}", item.path);
    println!("fingerprint: {}", item.fingerprint);
    println!("indexed_at:  {}", item.indexed_at);

    if let Some(code) = &item.code {
        println!("entity:      {}", code.entity_type.as_str());
        println!("signature:   {}", code.signature);
        if let Some(parent) = &code.parent_id {
            println!("parent:      {}", parent);
        }
        if !code.dependency_refs.is_empty() {
            println!("imports:     {}", code.dependency_refs.join(", "));
        }
    }
    println!();

    if !item.sections.is_empty() {
        println!("--- Sections ({}) ---", item.sections.len());
        for section in &item.sections {
            println!(
                "{}{} (byte {})",
                "  ".repeat(section.level.saturating_sub(1) as usize),
                section.title,
                section.byte_offset
            );
        }
        println!();
    }

    println!("--- Content ---");
    println!("{}", item.content);
    println!();
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemKind;

    #[test]
    fn response_renders_iso_timestamp() {
        let item = IndexedItem {
            id: "doc:a.md".to_string(),
            path: "a.md".to_string(),
            fingerprint: "f".to_string(),
            kind: ItemKind::Document,
            title: "A".to_string(),
            content: "body".to_string(),
            metadata: serde_json::json!({}),
            indexed_at: 0,
            code: None,
        };
        let response = ItemResponse::from(&item);
        assert_eq!(response.indexed_at, "1970-01-01T00:00:00Z");
        assert_eq!(response.kind, "document");
        assert!(response.sections.is_empty());
    }
}
