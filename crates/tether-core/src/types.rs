use uuid::Uuid;

/// Unique identifier for a conversation request.
pub type RequestId = Uuid;

/// Unique identifier for a session lease.
pub type LeaseId = Uuid;

/// Unique identifier for a patch proposal.
pub type PatchId = Uuid;

/// Unique identifier for a schedule entry.
pub type ScheduleId = Uuid;

/// Platform identifier of an origin context (e.g. "telegram", "http", "system").
pub type PlatformId = String;
