//! Append-only usage recording.
//!
//! Every event is written to `usage_events` and folded into an in-memory
//! aggregate that ranking reads without touching the database. Recording
//! never fails the caller: storage errors are logged and dropped.

use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard};
use tracing::warn;

use crate::error::Result;
use crate::models::{UsageEvent, UsageStats};

const MAX_SNIPPET_CHARS: usize = 200;

pub struct UsageRecorder {
    pool: SqlitePool,
    stats: RwLock<HashMap<String, UsageStats>>,
}

impl UsageRecorder {
    /// Build the recorder, aggregating everything already stored.
    pub async fn load(pool: SqlitePool) -> Result<Self> {
        let rows = sqlx::query(
            r#"
            SELECT subject_id,
                   COUNT(*) AS n,
                   COUNT(outcome_score) AS scored,
                   AVG(outcome_score) AS mean_score
            FROM usage_events
            GROUP BY subject_id
            "#,
        )
        .fetch_all(&pool)
        .await?;

        let stats = rows
            .iter()
            .map(|row| {
                let count: i64 = row.get("n");
                let scored: i64 = row.get("scored");
                let stats = UsageStats {
                    count: count.max(0) as u64,
                    mean_score: row.get("mean_score"),
                    scored: scored.max(0) as u64,
                };
                (row.get::<String, _>("subject_id"), stats)
            })
            .collect();

        Ok(Self {
            pool,
            stats: RwLock::new(stats),
        })
    }

    pub async fn record(&self, subject_id: &str, context_snippet: &str, outcome_score: Option<f64>) {
        let outcome_score = outcome_score.filter(|s| s.is_finite());
        let snippet: String = context_snippet.chars().take(MAX_SNIPPET_CHARS).collect();
        let now = chrono::Utc::now().timestamp();

        let inserted = sqlx::query(
            "INSERT INTO usage_events (subject_id, timestamp, context_snippet, outcome_score) VALUES (?, ?, ?, ?)",
        )
        .bind(subject_id)
        .bind(now)
        .bind(&snippet)
        .bind(outcome_score)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {
                let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
                stats
                    .entry(subject_id.to_string())
                    .or_default()
                    .observe(outcome_score);
            }
            Err(e) => warn!(subject_id, error = %e, "failed to record usage event"),
        }
    }

    pub fn stats(&self, subject_id: &str) -> UsageStats {
        self.read().get(subject_id).copied().unwrap_or_default()
    }

    /// Read access to the whole aggregate. Do not hold across `.await`.
    pub fn read(&self) -> RwLockReadGuard<'_, HashMap<String, UsageStats>> {
        self.stats.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Stored events for one subject, oldest first.
    pub async fn events_for(&self, subject_id: &str) -> Result<Vec<UsageEvent>> {
        let rows = sqlx::query(
            "SELECT subject_id, timestamp, context_snippet, outcome_score FROM usage_events WHERE subject_id = ? ORDER BY seq",
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| UsageEvent {
                subject_id: row.get("subject_id"),
                timestamp: row.get("timestamp"),
                context_snippet: row.get("context_snippet"),
                outcome_score: row.get("outcome_score"),
            })
            .collect())
    }

    pub async fn total_events(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
