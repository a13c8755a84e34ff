//! # tether-cli
//!
//! Command-line interface for the Tether relay.
//!
//! ## Commands
//!
//! - `tether start`: run the relay and its HTTP surface until Ctrl+C or SIGTERM
//! - `tether status`: show queue depth, session lease, and the pending patch
//! - `tether send <text>`: send one message through the running relay
//! - `tether patch list|deploy|drop`: review and approve patch proposals
//! - `tether config`: print the resolved configuration

pub mod commands;

pub use commands::Cli;
