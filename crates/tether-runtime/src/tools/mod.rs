//! Tools the session may invoke through an action plan.

pub mod builtin;
pub mod executor;
pub mod registry;

pub use builtin::{BuiltinServices, register_builtins};
pub use executor::ToolExecutor;
pub use registry::{ToolContext, ToolHandler, ToolOutput, ToolRegistry, check_arguments};
