//! Programmatic pipeline configuration: allocator sizing, default queue
//! capacity, threading policy.
//!
//! Analogous to the teacher's `pipeline_common::config::PipelineConfig`
//! (constructed in code, no file format — out of scope per spec.md §1)
//! and grounded on spec.md §5's "one-per-filter vs. mono" threading
//! policy and `original_source/src/lib_pipeline/pipelined_module.cpp`'s
//! `Threading` enum passed to `Pipeline`'s constructor.

use std::sync::Arc;

use crate::executor::{Executor, SyncExecutor, ThreadExecutor, ThreadPoolExecutor};

/// How filters are scheduled relative to each other.
#[derive(Debug, Clone)]
pub enum ThreadingPolicy {
    /// Every filter gets its own dedicated worker thread.
    OnePerFilter,
    /// The whole pipeline is driven by a single cooperative worker;
    /// filters are invoked in sequence rather than concurrently.
    Mono,
    /// A fixed pool of `n` workers shared across every filter.
    Pool(usize),
}

impl ThreadingPolicy {
    pub(crate) fn make_executor(&self) -> Arc<dyn Executor> {
        match self {
            ThreadingPolicy::OnePerFilter => ThreadExecutor::new(),
            ThreadingPolicy::Mono => Arc::new(SyncExecutor),
            ThreadingPolicy::Pool(n) => ThreadPoolExecutor::new((*n).max(1)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub threading: ThreadingPolicy,
    /// Default bound on each input's FIFO, overridable per input.
    pub default_queue_capacity: usize,
    /// Default bounded-allocator pool size for filters that don't
    /// request a specific one.
    pub default_allocator_blocks: usize,
    /// Use the low-latency allocator preset
    /// ([`crate::allocator::BoundedAllocator::LOW_LATENCY_NUM_BLOCKS`])
    /// instead of the throughput-oriented default.
    pub low_latency: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threading: ThreadingPolicy::OnePerFilter,
            default_queue_capacity: crate::port::DEFAULT_QUEUE_CAPACITY,
            default_allocator_blocks: crate::allocator::BoundedAllocator::DEFAULT_NUM_BLOCKS,
            low_latency: false,
        }
    }
}

impl PipelineConfig {
    pub fn low_latency() -> Self {
        Self {
            low_latency: true,
            default_allocator_blocks: crate::allocator::BoundedAllocator::LOW_LATENCY_NUM_BLOCKS,
            ..Self::default()
        }
    }

    pub fn mono() -> Self {
        Self {
            threading: ThreadingPolicy::Mono,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_latency_preset_uses_the_small_allocator() {
        let config = PipelineConfig::low_latency();
        assert_eq!(
            config.default_allocator_blocks,
            crate::allocator::BoundedAllocator::LOW_LATENCY_NUM_BLOCKS
        );
        assert!(config.low_latency);
    }
}
