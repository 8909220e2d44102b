//! # Pipeline Core
//!
//! The pipeline runtime that turns declared filters and their
//! connections into a correctly scheduled, concurrent, backpressured
//! dataflow graph with well-defined termination: the filter/port model,
//! the scheduling/concurrency engine, the connection graph, the
//! lifecycle protocol (start, end-of-stream propagation, exception
//! surfacing, clean shutdown), the pooled buffer allocator, and the
//! signal/slot dispatch primitive underneath port connections.
//!
//! Codec/demuxer/muxer implementations, manifest writers/parsers, CLI
//! parsing, logging sinks, and transport I/O are external collaborators
//! this crate only ever sees through the [`filter::FilterModule`] trait.
//!
//! ## License
//!
//! MIT OR Apache-2.0

pub mod allocator;
pub mod cancellation;
pub mod clock;
pub mod config;
pub mod data;
pub mod error;
pub mod executor;
pub mod filter;
pub mod fraction;
pub mod interrupt;
pub mod loader;
pub mod ordered_map;
pub mod pipeline;
pub mod port;
pub mod signal;
pub mod stats;

pub use cancellation::CancellationToken;
pub use clock::{Clock, SystemClock, VirtualClock, CLOCK_RATE};
pub use config::{PipelineConfig, ThreadingPolicy};
pub use data::{AttributeKey, CueFlags, MediaKind, Metadata, Payload, Sample};
pub use error::{ConnectError, FilterError, LoaderError, PipelineError, SampleError};
pub use filter::{FilterController, FilterModule, FilterWrapper, ModuleSignal};
pub use fraction::Fraction;
pub use interrupt::notify_interrupt;
pub use pipeline::Pipeline;
