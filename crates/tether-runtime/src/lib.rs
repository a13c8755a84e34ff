//! # tether-runtime
//!
//! The relay itself. Producers enqueue [`ConversationRequest`]s on the
//! [`RequestQueue`]; a single [`TurnRunner`] drains it, holds the session lease
//! for one whole turn, and hands the raw reply to the [`ProtocolDispatcher`],
//! which splits it into reply, action-plan, and memory streams.
//!
//! [`Runtime`] wires everything together from a [`TetherConfig`]; the
//! [`RuntimeHandle`] it hands out is what the HTTP surface talks to.
//!
//! [`ConversationRequest`]: tether_core::ConversationRequest
//! [`TetherConfig`]: tether_config::TetherConfig

pub mod context;
pub mod dispatch;
pub mod events;
pub mod protocol;
pub mod queue;
pub mod runner;
pub mod runtime;
pub mod tools;

pub use context::SystemContext;
pub use dispatch::{DispatchReport, ProtocolDispatcher};
pub use protocol::{MemoryImprint, ProtocolEnvelope};
pub use queue::{QueueReceiver, QueuedRequest, RequestQueue};
pub use runner::TurnRunner;
pub use runtime::{Runtime, RuntimeHandle, RuntimeStatus};
pub use tools::{ToolContext, ToolExecutor, ToolHandler, ToolOutput, ToolRegistry};
