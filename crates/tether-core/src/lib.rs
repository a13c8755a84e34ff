//! # tether-core
//!
//! Shared vocabulary for the Tether relay: the error taxonomy, the event bus,
//! conversation requests and their turn handles, the origin-context boundary
//! toward bot adapters, and the tool invocation types.

pub mod context;
pub mod error;
pub mod event;
pub mod request;
pub mod tool;
pub mod types;

pub use context::{OriginContext, ReplyOptions};
pub use error::{Result, TetherError};
pub use event::{Event, EventBus};
pub use request::{
    ConversationRequest, RequestOrigin, RequestSink, SystemTrigger, TurnHandle, TurnReport,
};
pub use tool::{Authorization, ToolErrorKind, ToolInvocation, ToolOutcome, ToolSpec};
pub use types::*;
