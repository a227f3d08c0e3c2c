//! pxl-engine
//!
//! Hysteresis decision engine for beacon proximity locking.
//!
//! Architectural decisions:
//! - Two dwell timers (near / far) with distinct thresholds form the hysteresis band
//! - A missing sample is "no change", never "near" or "far"
//! - `effective_locked = external_locked || auto_locked` selects exactly one policy per tick
//! - Any unlock clears the auto-lock marker
//!
//! Pure deterministic logic. No IO, no wall-clock. Runtime provides `now` and the sample.

mod engine;
mod types;

pub use engine::{step, DecisionEngine};
pub use types::*;
