//! # tether-autonomy
//!
//! Everything in Tether that acts without a human in the loop, and the
//! boundaries around it:
//!
//! - [`SecurityGate`]: deny-by-default authorization of tool invocations.
//! - [`AutonomyScheduler`]: randomized wake-ups and the due-task watcher, both
//!   producing system-originated requests.
//! - [`PatchPipeline`]: single-slot proposals against configured target files,
//!   deployed only by an explicit operator action.
//!
//! Time and randomness come in through [`Clock`] and [`Entropy`] so wake timing
//! can be tested deterministically.

pub mod clock;
pub mod patch;
pub mod quiet;
pub mod scheduler;
pub mod security;

pub use clock::{Clock, Entropy, FixedEntropy, ManualClock, SystemClock, SystemEntropy};
pub use patch::{PatchPipeline, PatchProposal, PatchStatus};
pub use quiet::QuietHours;
pub use scheduler::{AutonomyScheduler, WakeAction, WakePlan};
pub use security::{SecurityGate, SecurityRule};
