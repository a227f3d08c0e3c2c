//! pxl-daemon
//!
//! Library half of the `proxlock` binary: the control loop, its run summary,
//! and construction of the real collaborators from configuration. Kept as a
//! library so scenario tests can drive the loop with in-memory collaborators.

pub mod control_loop;
pub mod summary;
pub mod wiring;

pub use control_loop::{ControlLoop, LoopConfig, TickOutcome};
pub use summary::{RunCounters, RunSummary};
pub use wiring::{build_collaborators, Collaborators};
