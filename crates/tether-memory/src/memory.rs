use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_core::{RequestId, ScheduleId};

/// One recalled memory, ranked against a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recollection {
    pub text: String,
    /// Fraction of query terms found in the text, 0.0-1.0.
    pub score: f64,
    /// Who imprinted it, e.g. "session" or "operator".
    pub source: String,
}

/// Metadata attached to a memory when it is imprinted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

impl MemoryMetadata {
    pub fn from_session(request_id: RequestId, tags: Vec<String>) -> Self {
        Self {
            source: "session".into(),
            tags,
            request_id: Some(request_id),
        }
    }
}

/// A task with a due time. Read and consumed by the due-task watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: ScheduleId,
    pub task: String,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// The memory collaborator interface.
///
/// Storage layout and ranking are left to implementations.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Memories relevant to `query`, best first, at most `limit`.
    async fn recall(&self, query: &str, limit: usize) -> tether_core::Result<Vec<Recollection>>;

    /// Imprint one memory.
    async fn memorize(&self, text: &str, metadata: MemoryMetadata) -> tether_core::Result<()>;

    /// Register a task due at `due_at`.
    async fn add_schedule(
        &self,
        task: &str,
        due_at: DateTime<Utc>,
    ) -> tether_core::Result<ScheduleId>;

    /// Remove and return every task due at or before `now`, oldest first.
    ///
    /// A returned entry is never returned again.
    async fn check_due_tasks(&self, now: DateTime<Utc>) -> tether_core::Result<Vec<ScheduleEntry>>;
}
