//! # tether-memory
//!
//! The memory collaborator behind a Tether runtime:
//!
//! - **Recollections**: free-text memories imprinted by the session, recalled
//!   by term overlap with a query.
//! - **Schedules**: tasks with a due time, consumed once by the due-task watcher.
//!
//! The runtime only talks to the [`Memory`] trait; [`SqliteMemory`] is the
//! default persistent implementation.

pub mod memory;
pub mod store;

pub use memory::{Memory, MemoryMetadata, Recollection, ScheduleEntry};
pub use store::SqliteMemory;
