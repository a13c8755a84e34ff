//! # tether-config
//!
//! Configuration system for the Tether relay. Reads from `tether.toml` and
//! environment variables, in that precedence order.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::TetherConfig;
pub use schema::{ConfigWarning, WarningSeverity};
