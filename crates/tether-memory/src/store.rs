use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use tether_core::{ScheduleId, TetherError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::memory::{Memory, MemoryMetadata, Recollection, ScheduleEntry};

fn db_err(e: rusqlite::Error) -> TetherError {
    TetherError::Memory(e.to_string())
}

/// Timestamps are stored in one fixed RFC 3339 shape so text order equals time order.
fn stamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_stamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2)
        .map(String::from)
        .collect()
}

/// SQLite-backed memory collaborator.
pub struct SqliteMemory {
    db: Arc<Mutex<Connection>>,
}

impl SqliteMemory {
    /// Open or create the memory database at the given path.
    pub fn open(path: &Path) -> tether_core::Result<Self> {
        info!(?path, "opening memory store");

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                source TEXT NOT NULL,
                tags TEXT DEFAULT '[]',
                request_id TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                task TEXT NOT NULL,
                due_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
            CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules(due_at);
            ",
        )
        .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> tether_core::Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Number of stored memories.
    pub fn memory_count(&self) -> tether_core::Result<usize> {
        let db = self.db.lock();
        let n: i64 = db
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(n as usize)
    }

    /// Pending schedules, earliest first, without consuming them.
    pub fn pending_schedules(&self) -> tether_core::Result<Vec<ScheduleEntry>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT id, task, due_at, created_at FROM schedules ORDER BY due_at ASC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect::<Vec<_>>();
        Ok(rows.into_iter().filter_map(Self::schedule_from_row).collect())
    }

    fn schedule_from_row(
        (id, task, due_at, created_at): (String, String, String, String),
    ) -> Option<ScheduleEntry> {
        let entry = Uuid::parse_str(&id).ok().and_then(|id| {
            Some(ScheduleEntry {
                id,
                task,
                due_at: parse_stamp(&due_at)?,
                created_at: parse_stamp(&created_at)?,
            })
        });
        if entry.is_none() {
            warn!(id = %id, "skipping malformed schedule row");
        }
        entry
    }
}

#[async_trait]
impl Memory for SqliteMemory {
    async fn recall(&self, query: &str, limit: usize) -> tether_core::Result<Vec<Recollection>> {
        let rows: Vec<(String, String, String)> = {
            let db = self.db.lock();
            let mut stmt = db
                .prepare("SELECT text, source, tags FROM memories ORDER BY created_at DESC")
                .map_err(db_err)?;
            stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect()
        };

        let terms = query_terms(query);
        if terms.is_empty() {
            // No usable terms: most recent memories, unranked.
            return Ok(rows
                .into_iter()
                .take(limit)
                .map(|(text, source, _)| Recollection {
                    text,
                    score: 0.0,
                    source,
                })
                .collect());
        }

        let mut scored: Vec<Recollection> = rows
            .into_iter()
            .filter_map(|(text, source, tags)| {
                let haystack = format!("{} {}", text.to_lowercase(), tags.to_lowercase());
                let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (hits > 0).then(|| Recollection {
                    text,
                    score: hits as f64 / terms.len() as f64,
                    source,
                })
            })
            .collect();

        // Stable sort keeps newer memories first among equal scores.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        debug!(query, results = scored.len(), "memory recall");
        Ok(scored)
    }

    async fn memorize(&self, text: &str, metadata: MemoryMetadata) -> tether_core::Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TetherError::Memory("refusing to store an empty memory".into()));
        }
        let tags = serde_json::to_string(&metadata.tags)?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO memories (id, text, source, tags, request_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                text,
                metadata.source,
                tags,
                metadata.request_id.map(|id| id.to_string()),
                stamp(Utc::now()),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn add_schedule(
        &self,
        task: &str,
        due_at: DateTime<Utc>,
    ) -> tether_core::Result<ScheduleId> {
        let id = Uuid::new_v4();
        let db = self.db.lock();
        db.execute(
            "INSERT INTO schedules (id, task, due_at, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id.to_string(), task, stamp(due_at), stamp(Utc::now())],
        )
        .map_err(db_err)?;
        info!(schedule_id = %id, %due_at, "task scheduled");
        Ok(id)
    }

    async fn check_due_tasks(&self, now: DateTime<Utc>) -> tether_core::Result<Vec<ScheduleEntry>> {
        let mut db = self.db.lock();
        let tx = db.transaction().map_err(db_err)?;
        let rows: Vec<(String, String, String, String)> = {
            let mut stmt = tx
                .prepare(
                    "SELECT id, task, due_at, created_at FROM schedules
                     WHERE due_at <= ?1 ORDER BY due_at ASC",
                )
                .map_err(db_err)?;
            stmt.query_map(rusqlite::params![stamp(now)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect()
        };
        for (id, ..) in &rows {
            tx.execute("DELETE FROM schedules WHERE id = ?1", rusqlite::params![id])
                .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;

        Ok(rows.into_iter().filter_map(Self::schedule_from_row).collect())
    }
}
