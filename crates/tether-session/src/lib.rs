//! # tether-session
//!
//! Serialized access to the reasoning session. The [`SessionGate`] hands out
//! at most one [`SessionLease`] at a time; a lease submits a prompt and polls
//! the transcript until the [`StabilityDetector`] judges the reply complete.
//!
//! Transports implement [`SessionTransport`]: [`BrowserTransport`] drives a
//! chat page over the Chrome DevTools Protocol, and [`mock::ScriptedTransport`]
//! plays back canned snapshots for tests.

pub mod browser;
pub mod detector;
pub mod gate;
pub mod mock;
pub mod transport;

pub use browser::BrowserTransport;
pub use detector::{Fingerprint, StabilityDetector, Verdict};
pub use gate::{GateStatus, SessionGate, SessionLease};
pub use transport::SessionTransport;
