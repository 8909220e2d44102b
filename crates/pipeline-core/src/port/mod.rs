//! Typed endpoints on a filter: [`Output`] posts samples into a
//! [`crate::signal::Signal`], [`Input`] owns the receiving FIFO queue.
//!
//! Grounded on `original_source/src/lib_pipeline/filter_input.hpp` /
//! `pipelined_input.hpp` and spec.md §4.F.

pub mod input;
mod output;

pub use input::{Input, InputDispatch, DEFAULT_QUEUE_CAPACITY};
pub use output::Output;

use std::sync::Arc;

use crate::data::Sample;

/// A value flowing over a [`Output`]/[`Input`] connection: `Some` is a
/// real sample, `None` is end-of-stream. Wrapped in `Arc` so fan-out to
/// many inputs shares one allocation instead of deep-copying the
/// payload per subscriber.
pub type Packet = Option<Arc<Sample>>;
