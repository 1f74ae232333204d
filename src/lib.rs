//! # Process Key Scheduler
//!
//! Delivers a repeating sequence of synthetic keyboard steps to one chosen
//! process at a fixed cadence, while a watchdog keeps checking that the
//! target still exists.
//!
//! ## Features
//!
//! - Key, text and combo steps (prefix key, text, suffix key)
//! - Finite or infinite repeat with pause, resume and stop
//! - At most one in-flight send; slow sends drop overlapping ticks
//! - Independent 3 second liveness check that pauses on target loss
//! - Linear-time window/process hierarchy resolution
//! - Global hotkey for pause/resume
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use process_key_scheduler::{
//!     KeySender, KeyStep, ProcessHierarchyResolver, Scheduler, SystemWindowSource,
//! };
//!
//! # async fn run() -> process_key_scheduler::Result<()> {
//! let resolver = ProcessHierarchyResolver::new(Arc::new(SystemWindowSource::new()));
//! let target = resolver.resolve_windows().into_iter().next().expect("a window");
//!
//! let scheduler = Scheduler::new(Arc::new(KeySender::new()?), resolver);
//! let steps = [KeyStep::key("Return"), KeyStep::text("hi", false)];
//! scheduler.start(target, &steps, 500, 3).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod global_hotkey;
pub mod hierarchy;
pub mod key_sender;
pub mod keymap;
pub mod poster;
pub mod step;
pub mod system;
pub mod window;

pub use config::Config;
pub use engine::{
    EngineEvent, EngineSnapshot, LogEntry, LogKind, Scheduler, SchedulerSettings, SendingState,
};
pub use error::{PksError, Result};
pub use crate::global_hotkey::HotkeyManager;
pub use hierarchy::{resolve_hierarchy, ProcessHierarchyResolver, WindowSource};
pub use key_sender::KeySender;
pub use poster::{Dispatch, EventPoster};
pub use step::{KeyStep, StepMode, StepSequence};
pub use system::SystemWindowSource;
pub use window::{ProcessEntry, WindowDescriptor, WindowRecord};
