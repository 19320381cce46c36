//! Chunkstage Scheduler Library
//!
//! Deadline-bounded scheduler that applies producer update records to chunk
//! containers one record per tick, in strict arrival order.
//!
//! The producer appends [`UpdateRecord`](chunkstage_cache::UpdateRecord)s to
//! an [`UpdateQueue`] at any time. The host drives a [`TierScheduler`]
//! either cooperatively, by calling [`TierScheduler::tick`] and honouring
//! the returned [`Continuation`], or through a [`SchedulerDriver`] thread.
//! Each tick re-checks the frame deadline before starting work, so a burst
//! of promotions never runs past the end of a frame.
//!
//! # Example
//!
//! ```
//! use chunkstage_cache::{ContainerRegistry, ContainerTypes};
//! use chunkstage_scheduler::{Continuation, FrameBudget, SchedulerConfig, TierScheduler};
//!
//! let config = SchedulerConfig::default();
//! let mut scheduler = TierScheduler::new(&config, ContainerRegistry::new(ContainerTypes::new()));
//!
//! // Once per rendered frame
//! scheduler.begin_frame(&FrameBudget::for_60fps());
//! loop {
//!     match scheduler.tick().unwrap() {
//!         Continuation::Immediate => continue,
//!         Continuation::RetryAfter(_delay) => break, // try again next frame
//!         Continuation::Idle => break,
//!     }
//! }
//! ```

pub mod config;
mod driver;
mod error;
pub mod frame_budget;
mod notify;
mod queue;
mod scheduler;

// Re-export public API
pub use config::{ConfigError, SchedulerConfig};
pub use driver::{DriverConfig, SchedulerDriver};
pub use error::{Result, SchedulerError};
pub use frame_budget::FrameBudget;
pub use notify::{SubscriptionId, VisibilityListener, VisibilitySignal};
pub use queue::UpdateQueue;
pub use scheduler::{Continuation, SchedulerStats, TierScheduler};
