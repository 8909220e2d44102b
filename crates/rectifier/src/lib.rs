//! # Rectifier
//!
//! A [`pipeline_core::filter::FilterModule`] that takes in a video master
//! stream plus zero or more audio and subtitle streams arriving at their
//! own pace and re-times them onto the master's frame clock: every tick
//! emits exactly one master frame (repeating the last one across a gap)
//! and a sample-accurate slice of each other stream for that same
//! period. See [`rectifier::Rectifier`] for the algorithm and
//! [`scheduler::Scheduler`] for the periodic-tick abstraction it runs on.
//!
//! ## License
//!
//! MIT OR Apache-2.0

pub mod rectifier;
pub mod scheduler;

pub use rectifier::{Rectifier, RectifierConfig, ATTR_SUBTITLE_HIDE, ATTR_SUBTITLE_SHOW};
pub use scheduler::{ManualScheduler, RealScheduler, ScheduledTask, Scheduler, TaskId};
