//! tierloop core.
//!
//! Tiered per-frame update dispatcher. The host owns the frame clock and calls
//! [`UpdateDispatcher::tick`] once per frame; registered units run every tick
//! (High) or at a capped rate (Medium, Low).

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registration;
pub mod stats;
pub mod tier;
pub mod time;
pub mod unit;

pub use config::{DeltaMode, DispatcherConfig, DuplicatePolicy, FailurePolicy};
pub use dispatcher::UpdateDispatcher;
pub use error::{ConfigError, DispatchError, DispatchResult};
pub use registration::Registration;
pub use stats::{DispatchStats, TickSummary, TierStats};
pub use tier::{IntoTier, Slot, Tier};
pub use time::{FrameClock, FramePacer, FrameTime};
pub use unit::{FixedUpdatable, FnUnit, LateUpdatable, Updatable};
