//! Persisted content store.
//!
//! The `items` table is the source of truth for everything the search index
//! serves. Writes only happen through [`ContentStore::apply`], which lands a
//! whole reindex run in one transaction.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::models::{CodeEntity, EntityType, IndexedItem, ItemKind};

/// Reconciliation produced by one reindex run.
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// Paths whose stored items are replaced by the given set.
    pub replace: Vec<(String, Vec<IndexedItem>)>,
    /// Paths whose items are deleted outright.
    pub remove_paths: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.replace.is_empty() && self.remove_paths.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyCounts {
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
}

#[derive(Clone)]
pub struct ContentStore {
    pool: SqlitePool,
}

const SELECT_ITEM: &str = r#"
    SELECT id, path, fingerprint, kind, title, content, metadata_json, indexed_at,
           entity_type, entity_name, signature, description, owner_path, parent_id,
           dependency_refs_json
    FROM items
"#;

impl ContentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Every stored item, ordered by path then id.
    pub async fn load_all(&self) -> Result<Vec<IndexedItem>> {
        let rows = sqlx::query(&format!("{} ORDER BY path, id", SELECT_ITEM))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_item).collect()
    }

    pub async fn get(&self, id: &str) -> Result<Option<IndexedItem>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_ITEM))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    /// Stored fingerprint per path.
    pub async fn fingerprints(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT DISTINCT path, fingerprint FROM items")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("path"), row.get("fingerprint")))
            .collect())
    }

    pub async fn count_by_kind(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query("SELECT kind, COUNT(*) AS n FROM items GROUP BY kind ORDER BY kind")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| (r.get("kind"), r.get("n"))).collect())
    }

    /// Apply a change set atomically. Nothing is written if `cancel` fires first.
    pub async fn apply(&self, changes: &ChangeSet, cancel: &CancellationToken) -> Result<ApplyCounts> {
        let mut counts = ApplyCounts::default();
        if changes.is_empty() {
            return Ok(counts);
        }

        let mut tx = self.pool.begin().await?;

        for (path, items) in &changes.replace {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let existing: HashSet<String> =
                sqlx::query_scalar::<_, String>("SELECT id FROM items WHERE path = ?")
                    .bind(path)
                    .fetch_all(&mut *tx)
                    .await?
                    .into_iter()
                    .collect();

            let mut kept: HashSet<&str> = HashSet::new();
            for item in items {
                if existing.contains(&item.id) {
                    counts.updated += 1;
                } else {
                    counts.added += 1;
                }
                kept.insert(item.id.as_str());
                upsert_item(&mut tx, item).await?;
            }

            for stale in existing.iter().filter(|id| !kept.contains(id.as_str())) {
                sqlx::query("DELETE FROM items WHERE id = ?")
                    .bind(stale)
                    .execute(&mut *tx)
                    .await?;
                counts.removed += 1;
            }
        }

        for path in &changes.remove_paths {
            let result = sqlx::query("DELETE FROM items WHERE path = ?")
                .bind(path)
                .execute(&mut *tx)
                .await?;
            counts.removed += result.rows_affected();
        }

        if cancel.is_cancelled() {
            // Dropping the transaction rolls it back
            return Err(Error::Cancelled);
        }
        tx.commit().await?;

        Ok(counts)
    }
}

async fn upsert_item(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, item: &IndexedItem) -> Result<()> {
    let code = item.code.as_ref();
    let refs_json = match code {
        Some(c) => Some(serde_json::to_string(&c.dependency_refs)?),
        None => None,
    };

    sqlx::query(
        r#"
        INSERT INTO items (id, path, fingerprint, kind, title, content, metadata_json, indexed_at,
                           entity_type, entity_name, signature, description, owner_path, parent_id,
                           dependency_refs_json)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            path = excluded.path,
            fingerprint = excluded.fingerprint,
            kind = excluded.kind,
            title = excluded.title,
            content = excluded.content,
            metadata_json = excluded.metadata_json,
            indexed_at = excluded.indexed_at,
            entity_type = excluded.entity_type,
            entity_name = excluded.entity_name,
            signature = excluded.signature,
            description = excluded.description,
            owner_path = excluded.owner_path,
            parent_id = excluded.parent_id,
            dependency_refs_json = excluded.dependency_refs_json
        "#,
    )
    .bind(&item.id)
    .bind(&item.path)
    .bind(&item.fingerprint)
    .bind(item.kind.as_str())
    .bind(&item.title)
    .bind(&item.content)
    .bind(item.metadata.to_string())
    .bind(item.indexed_at)
    .bind(code.map(|c| c.entity_type.as_str()))
    .bind(code.map(|c| c.name.as_str()))
    .bind(code.map(|c| c.signature.as_str()))
    .bind(code.map(|c| c.description.as_str()))
    .bind(code.map(|c| c.owner_path.as_str()))
    .bind(code.and_then(|c| c.parent_id.as_deref()))
    .bind(refs_json)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn row_to_item(row: &SqliteRow) -> Result<IndexedItem> {
    let kind_str: String = row.get("kind");
    let kind = ItemKind::parse(&kind_str)?;
    let metadata_json: String = row.get("metadata_json");
    let metadata: serde_json::Value =
        serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({}));

    let code = match row
        .get::<Option<String>, _>("entity_type")
        .as_deref()
        .and_then(EntityType::parse)
    {
        Some(entity_type) => {
            let refs_json: Option<String> = row.get("dependency_refs_json");
            Some(CodeEntity {
                entity_type,
                name: row.get::<Option<String>, _>("entity_name").unwrap_or_default(),
                signature: row.get::<Option<String>, _>("signature").unwrap_or_default(),
                description: row.get::<Option<String>, _>("description").unwrap_or_default(),
                owner_path: row.get::<Option<String>, _>("owner_path").unwrap_or_default(),
                parent_id: row.get("parent_id"),
                dependency_refs: refs_json
                    .and_then(|j| serde_json::from_str(&j).ok())
                    .unwrap_or_default(),
            })
        }
        None => None,
    };

    Ok(IndexedItem {
        id: row.get("id"),
        path: row.get("path"),
        fingerprint: row.get("fingerprint"),
        kind,
        title: row.get("title"),
        content: row.get("content"),
        metadata,
        indexed_at: row.get("indexed_at"),
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};

    async fn store() -> (tempfile::TempDir, ContentStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::for_project(tmp.path());
        let pool = db::connect(&config).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, ContentStore::new(pool))
    }

    fn doc(path: &str, fingerprint: &str) -> IndexedItem {
        IndexedItem {
            id: format!("doc:{}", path),
            path: path.to_string(),
            fingerprint: fingerprint.to_string(),
            kind: ItemKind::Document,
            title: path.to_string(),
            content: "body".to_string(),
            metadata: serde_json::json!({"doc_type": "md"}),
            indexed_at: 1,
            code: None,
        }
    }

    fn entity(path: &str, name: &str) -> IndexedItem {
        IndexedItem {
            id: format!("code:{}::{}", path, name),
            path: path.to_string(),
            fingerprint: "f1".to_string(),
            kind: ItemKind::CodeEntity,
            title: name.to_string(),
            content: name.to_string(),
            metadata: serde_json::json!({}),
            indexed_at: 1,
            code: Some(CodeEntity {
                entity_type: EntityType::Function,
                name: name.to_string(),
                signature: format!("{}()", name),
                description: String::new(),
                owner_path: path.to_string(),
                parent_id: Some(format!("code:{}", path)),
                dependency_refs: Vec::new(),
            }),
        }
    }

    #[tokio::test]
    async fn apply_counts_adds_updates_and_removals() {
        let (_tmp, store) = store().await;
        let cancel = CancellationToken::new();

        let first = ChangeSet {
            replace: vec![
                ("a.md".to_string(), vec![doc("a.md", "f1")]),
                ("m.py".to_string(), vec![entity("m.py", "one"), entity("m.py", "two")]),
            ],
            remove_paths: vec![],
        };
        let counts = store.apply(&first, &cancel).await.unwrap();
        assert_eq!(counts, ApplyCounts { added: 3, updated: 0, removed: 0 });

        let second = ChangeSet {
            replace: vec![("m.py".to_string(), vec![entity("m.py", "one")])],
            remove_paths: vec!["a.md".to_string()],
        };
        let counts = store.apply(&second, &cancel).await.unwrap();
        assert_eq!(counts, ApplyCounts { added: 0, updated: 1, removed: 2 });

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], entity("m.py", "one"));
    }

    #[tokio::test]
    async fn cancelled_apply_writes_nothing() {
        let (_tmp, store) = store().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let changes = ChangeSet {
            replace: vec![("a.md".to_string(), vec![doc("a.md", "f1")])],
            remove_paths: vec![],
        };
        assert!(matches!(
            store.apply(&changes, &cancel).await,
            Err(Error::Cancelled)
        ));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_and_fingerprints() {
        let (_tmp, store) = store().await;
        let changes = ChangeSet {
            replace: vec![("a.md".to_string(), vec![doc("a.md", "abc")])],
            remove_paths: vec![],
        };
        store.apply(&changes, &CancellationToken::new()).await.unwrap();

        assert_eq!(store.get("doc:a.md").await.unwrap(), Some(doc("a.md", "abc")));
        assert!(store.get("doc:zzz.md").await.unwrap().is_none());
        assert_eq!(
            store.fingerprints().await.unwrap().get("a.md").map(String::as_str),
            Some("abc")
        );
    }
}
