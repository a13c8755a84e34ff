use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::sync::Arc;
use tokio::sync::broadcast;

/// Events flowing through the relay. Every component publishes here instead
/// of writing to a process-wide output channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Queue lifecycle ────────────────────────────────────────
    RequestEnqueued {
        request_id: Uuid,
        origin: String,
        depth: usize,
    },
    TurnStarted {
        request_id: Uuid,
        waited_ms: u64,
    },
    TurnCompleted {
        request_id: Uuid,
        follow_ups: u8,
        degraded: bool,
    },
    TurnFailed {
        request_id: Uuid,
        error: String,
    },

    // ── Session lifecycle ──────────────────────────────────────
    LeaseAcquired {
        lease_id: Uuid,
    },
    LeaseReleased {
        lease_id: Uuid,
        held_ms: u64,
    },
    SessionRecovered {
        attempts: u32,
    },
    SessionRecoveryFailed {
        attempts: u32,
        error: String,
    },

    // ── Dispatch lifecycle ─────────────────────────────────────
    ToolInvoked {
        request_id: Uuid,
        tool_name: String,
        invocation_id: Uuid,
    },
    ToolDenied {
        request_id: Uuid,
        tool_name: String,
        reason: String,
    },
    ToolFinished {
        request_id: Uuid,
        invocation_id: Uuid,
        is_error: bool,
    },
    MemoryImprinted {
        request_id: Uuid,
        count: usize,
    },

    // ── Autonomy lifecycle ─────────────────────────────────────
    WakeScheduled {
        at: DateTime<Utc>,
        deferred: bool,
    },
    WakeFired {
        action: String,
    },
    DueTaskEnqueued {
        schedule_id: Uuid,
        task: String,
    },

    // ── Patch lifecycle ────────────────────────────────────────
    PatchProposed {
        patch_id: Uuid,
        target: String,
    },
    PatchRejected {
        target: String,
        reason: String,
    },
    PatchDeployed {
        patch_id: Uuid,
        target: String,
    },
    PatchDropped {
        patch_id: Uuid,
        target: String,
    },

    // ── System ─────────────────────────────────────────────────
    Shutdown,
}

/// A broadcast-based event bus for system-wide pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
