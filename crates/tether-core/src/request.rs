use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::context::OriginContext;
use crate::tool::ToolOutcome;

/// Why the relay itself originated a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemTrigger {
    Reflection,
    Outreach,
    PassiveChat,
    DueTask { schedule_id: Uuid, task: String },
}

/// Where a request came from. Inbound and system requests share one FIFO
/// and carry no priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestOrigin {
    Inbound { platform: String },
    System { trigger: SystemTrigger },
}

impl RequestOrigin {
    pub fn inbound(platform: impl Into<String>) -> Self {
        Self::Inbound {
            platform: platform.into(),
        }
    }

    pub fn system(trigger: SystemTrigger) -> Self {
        Self::System { trigger }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    /// Whether this request came from the self-reflection wake action.
    pub fn is_reflection(&self) -> bool {
        matches!(
            self,
            Self::System {
                trigger: SystemTrigger::Reflection
            }
        )
    }
}

impl fmt::Display for RequestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound { platform } => write!(f, "inbound:{platform}"),
            Self::System { trigger } => match trigger {
                SystemTrigger::Reflection => write!(f, "system:reflection"),
                SystemTrigger::Outreach => write!(f, "system:outreach"),
                SystemTrigger::PassiveChat => write!(f, "system:passive_chat"),
                SystemTrigger::DueTask { .. } => write!(f, "system:due_task"),
            },
        }
    }
}

/// A conversation request waiting for (or holding) the reasoning session.
#[derive(Clone)]
pub struct ConversationRequest {
    pub id: Uuid,
    pub origin: RequestOrigin,
    pub context: Arc<dyn OriginContext>,
    pub prompt: String,
    pub enqueued_at: DateTime<Utc>,
}

impl ConversationRequest {
    pub fn new(
        context: Arc<dyn OriginContext>,
        origin: RequestOrigin,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin,
            context,
            prompt: prompt.into(),
            enqueued_at: Utc::now(),
        }
    }
}

impl fmt::Debug for ConversationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationRequest")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("platform", &self.context.platform_id())
            .field("prompt_len", &self.prompt.len())
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// What a completed turn produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnReport {
    pub request_id: Uuid,
    /// Reply text delivered to the origin, across all hops.
    pub reply: Option<String>,
    /// Tool outcomes in listed order, across all hops.
    pub outcomes: Vec<ToolOutcome>,
    /// Memory imprints forwarded to the memory collaborator.
    pub memories_stored: usize,
    /// Whether the action plan was unparseable and the turn fell back to reply-only.
    pub degraded: bool,
    /// Number of tool-result follow-up hops taken.
    pub follow_ups: u8,
}

/// Resolves a [`TurnHandle`] once the turn finishes.
#[derive(Debug)]
pub struct TurnResolver {
    tx: oneshot::Sender<crate::Result<TurnReport>>,
}

impl TurnResolver {
    pub fn resolve(self, result: crate::Result<TurnReport>) {
        // The submitter may have stopped waiting.
        let _ = self.tx.send(result);
    }
}

/// Handle returned by `enqueue`, resolved when the turn completes.
#[derive(Debug)]
pub struct TurnHandle {
    request_id: Uuid,
    rx: oneshot::Receiver<crate::Result<TurnReport>>,
}

impl TurnHandle {
    /// Create a linked resolver/handle pair for a request.
    pub fn channel(request_id: Uuid) -> (TurnResolver, TurnHandle) {
        let (tx, rx) = oneshot::channel();
        (TurnResolver { tx }, TurnHandle { request_id, rx })
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Wait for the turn to finish.
    pub async fn wait(self) -> crate::Result<TurnReport> {
        match self.rx.await {
            Ok(result) => result,
            // The consumer dropped the request without resolving it (shutdown).
            Err(_) => Err(crate::TetherError::QueueClosed),
        }
    }
}

/// Anything that admits conversation requests. Producers (bot adapters,
/// scheduler timers, the HTTP surface) only ever reach the session through this.
pub trait RequestSink: Send + Sync {
    fn submit(
        &self,
        context: Arc<dyn OriginContext>,
        origin: RequestOrigin,
        prompt: String,
    ) -> crate::Result<TurnHandle>;
}
