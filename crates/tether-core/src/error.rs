use thiserror::Error;
use uuid::Uuid;

/// Unified error type for the entire Tether runtime.
#[derive(Error, Debug)]
pub enum TetherError {
    // ── Session errors ─────────────────────────────────────────
    #[error("session response did not stabilize within {waited_ms}ms")]
    SessionTimeout { waited_ms: u64 },

    #[error("session crashed: {0}")]
    SessionCrash(String),

    // ── Queue errors ───────────────────────────────────────────
    #[error("request queue is full: depth {depth}, capacity {capacity}")]
    QueueFull { depth: usize, capacity: usize },

    #[error("request queue closed")]
    QueueClosed,

    // ── Protocol errors ────────────────────────────────────────
    #[error("protocol parse error: {0}")]
    Parse(String),

    // ── Tool errors ────────────────────────────────────────────
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("invalid arguments for {tool}: {reason}")]
    ToolArguments { tool: String, reason: String },

    #[error("tool execution failed: {tool}: {reason}")]
    ToolExecution { tool: String, reason: String },

    #[error("tool timed out: {tool} after {timeout_secs}s")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("permission denied: {tool}: {reason}")]
    PermissionDenied { tool: String, reason: String },

    // ── Patch errors ───────────────────────────────────────────
    #[error("a patch proposal is already pending: {pending}")]
    PatchBusy { pending: Uuid },

    #[error("patch proposal not found: {0}")]
    PatchNotFound(Uuid),

    #[error("unknown patch target: {0}")]
    PatchTargetUnknown(String),

    #[error("patch validation failed: {0}")]
    PatchValidation(String),

    // ── Collaborator errors ────────────────────────────────────
    #[error("memory error: {0}")]
    Memory(String),

    #[error("channel error: {channel}: {reason}")]
    Channel { channel: String, reason: String },

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TetherError {
    /// Whether this error ends the whole turn rather than a single tool invocation.
    pub fn is_turn_fatal(&self) -> bool {
        matches!(
            self,
            Self::SessionTimeout { .. } | Self::SessionCrash(_) | Self::QueueClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, TetherError>;
