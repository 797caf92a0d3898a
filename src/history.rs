//! Analysis history.
//!
//! A bounded, newest-first record of completed analyses. Two backends
//! implement [`HistoryStore`]:
//!
//! | Backend | Durability | Notes |
//! |---------|------------|-------|
//! | `sqlite` | survives restarts | WAL journal, insert and eviction in one transaction |
//! | `memory` | process lifetime | single lock around a ring of entries |
//!
//! Both keep at most `capacity` entries and evict the oldest on insert.
//! Listing returns a snapshot; concurrent appends never produce a torn or
//! duplicated view.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::HistoryConfig;
use crate::models::{AnalysisResult, FileMetadata, HistoryEntry};
use crate::{db, migrate};

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Records a completed analysis under a fresh id and timestamp.
    async fn append(&self, file: FileMetadata, analysis: AnalysisResult) -> Result<HistoryEntry>;

    /// All retained entries, newest first.
    async fn list_all(&self) -> Result<Vec<HistoryEntry>>;

    fn capacity(&self) -> usize;
}

fn new_entry(file: FileMetadata, analysis: AnalysisResult) -> HistoryEntry {
    HistoryEntry {
        id: Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        file,
        analysis,
    }
}

/// Opens the backend named in the configuration.
pub async fn create_store(config: &HistoryConfig) -> Result<Arc<dyn HistoryStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryHistory::new(config.capacity))),
        "sqlite" => Ok(Arc::new(
            SqliteHistory::open(&config.path, config.capacity).await?,
        )),
        other => bail!("Unknown history backend: {}", other),
    }
}

// ============ Memory ============

pub struct MemoryHistory {
    entries: RwLock<VecDeque<HistoryEntry>>,
    capacity: usize,
}

impl MemoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, file: FileMetadata, analysis: AnalysisResult) -> Result<HistoryEntry> {
        let entry = new_entry(file, analysis);
        let mut entries = self.entries.write().await;
        entries.push_front(entry.clone());
        entries.truncate(self.capacity);
        Ok(entry)
    }

    async fn list_all(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.entries.read().await.iter().cloned().collect())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

// ============ SQLite ============

pub struct SqliteHistory {
    pool: SqlitePool,
    capacity: usize,
}

impl SqliteHistory {
    pub async fn open(path: &Path, capacity: usize) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("Failed to open history database: {}", path.display()))?;
        migrate::run_migrations(&pool).await?;
        info!(path = %path.display(), capacity, "History database ready");
        Ok(Self { pool, capacity })
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    async fn append(&self, file: FileMetadata, analysis: AnalysisResult) -> Result<HistoryEntry> {
        let entry = new_entry(file, analysis);
        let file_json = serde_json::to_string(&entry.file)?;
        let analysis_json = serde_json::to_string(&entry.analysis)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO history (id, created_at, file_json, analysis_json) VALUES (?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(entry.timestamp.to_rfc3339())
        .bind(&file_json)
        .bind(&analysis_json)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM history WHERE seq NOT IN (SELECT seq FROM history ORDER BY seq DESC LIMIT ?)",
        )
        .bind(self.capacity as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(entry)
    }

    async fn list_all(&self) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT id, created_at, file_json, analysis_json FROM history ORDER BY seq DESC LIMIT ?",
        )
        .bind(self.capacity as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            match decode_row(&row) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(id = %id, error = %e, "Skipping unreadable history row"),
            }
        }
        Ok(entries)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<HistoryEntry> {
    let created_at: String = row.try_get("created_at")?;
    let file_json: String = row.try_get("file_json")?;
    let analysis_json: String = row.try_get("analysis_json")?;

    Ok(HistoryEntry {
        id: row.try_get("id")?,
        timestamp: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        file: serde_json::from_str(&file_json)?,
        analysis: serde_json::from_str(&analysis_json)?,
    })
}
