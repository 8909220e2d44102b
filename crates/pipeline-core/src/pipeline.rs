//! The connection graph: owns every filter, wires them together, and
//! drives the start/wait/exit lifecycle.
//!
//! Grounded on `original_source/src/lib_pipeline/pipeline.hpp` /
//! `pipeline.cpp`: `computeTopology` (sink detection), `waitForEndOfStream`
//! (condvar + periodic-timeout wait so a captured exception between
//! notifications is still observed — `COMPLETION_GRANULARITY_IN_MS =
//! 200`), `exitSync` (stop every source), and `dump()` (Graphviz DOT).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::allocator::BoundedAllocator;
use crate::clock::Clock;
use crate::config::{PipelineConfig, ThreadingPolicy};
use crate::error::{ConnectError, PipelineError};
use crate::executor::Executor;
use crate::filter::{FilterController, FilterModule, FilterWrapper, Phase};
use crate::ordered_map::OrderedMap;
use crate::stats::StatsRegistry;

struct ConnectionRecord {
    src: String,
    src_out: usize,
    dst: String,
    dst_in: usize,
}

struct CompletionState {
    expected_completions: usize,
    remaining_completions: usize,
    exception: Option<PipelineError>,
}

/// A graph of filters and the connections between them.
pub struct Pipeline {
    #[allow(dead_code)]
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
    /// Sized from `config.default_allocator_blocks`, overridden by
    /// [`crate::allocator::BoundedAllocator::LOW_LATENCY_NUM_BLOCKS`]
    /// when `config.low_latency` is set (spec.md §3 "Pipeline: default
    /// allocator block count (normal vs. low-latency)"). Shared by
    /// every filter added to this pipeline —
    /// a filter that wants pooled, recyclable buffers calls
    /// [`Pipeline::allocator`] and holds onto the handle the same way it
    /// holds onto any other construction-time dependency.
    allocator: Arc<BoundedAllocator>,
    /// One executor shared by every filter when the threading policy is
    /// `Mono` or `Pool(n)` (spec.md §4.E: "N workers sharing one FIFO").
    /// `None` for `OnePerFilter`, where each filter gets its own
    /// dedicated worker instead.
    shared_executor: Option<Arc<dyn Executor>>,
    stats: Option<Arc<StatsRegistry>>,
    filters: Mutex<OrderedMap<String, Arc<FilterWrapper>>>,
    connections: Mutex<Vec<ConnectionRecord>>,
    started: AtomicBool,
    completion: Mutex<CompletionState>,
    condvar: Condvar,
}

impl Pipeline {
    /// How often `wait_for_end_of_stream` wakes up to check for a
    /// captured exception even without a completion notification.
    pub const COMPLETION_GRANULARITY: Duration = Duration::from_millis(200);

    pub fn new(clock: Arc<dyn Clock>, config: PipelineConfig, stats: Option<Arc<StatsRegistry>>) -> Arc<Self> {
        let allocator_blocks = if config.low_latency {
            BoundedAllocator::LOW_LATENCY_NUM_BLOCKS
        } else {
            config.default_allocator_blocks
        };
        let allocator = Arc::new(BoundedAllocator::new(allocator_blocks.max(1)));
        let shared_executor = match &config.threading {
            ThreadingPolicy::OnePerFilter => None,
            ThreadingPolicy::Mono | ThreadingPolicy::Pool(_) => Some(config.threading.make_executor()),
        };
        Arc::new(Self {
            clock,
            config,
            allocator,
            shared_executor,
            stats,
            filters: Mutex::new(OrderedMap::new()),
            connections: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            completion: Mutex::new(CompletionState {
                expected_completions: 0,
                remaining_completions: 0,
                exception: None,
            }),
            condvar: Condvar::new(),
        })
    }

    /// The pooled buffer allocator shared by every filter in this
    /// pipeline (spec.md §4.B). A filter module's constructor takes a
    /// clone of this the same way it takes any other collaborator.
    pub fn allocator(&self) -> Arc<BoundedAllocator> {
        Arc::clone(&self.allocator)
    }

    pub fn add_module(self: &Arc<Self>, name: impl Into<String>, module: Arc<dyn FilterModule>) -> Arc<FilterWrapper> {
        let name = name.into();
        let executor = self
            .shared_executor
            .clone()
            .unwrap_or_else(|| self.config.threading.make_executor());
        let controller: Arc<dyn FilterController> = Arc::clone(self) as Arc<dyn FilterController>;
        let filter = FilterWrapper::new(
            name.clone(),
            module,
            executor,
            self.config.default_queue_capacity,
            controller,
            self.stats.clone(),
        );
        self.filters.lock().insert(name, Arc::clone(&filter));
        filter
    }

    pub fn get_filter(&self, name: &str) -> Option<Arc<FilterWrapper>> {
        self.filters.lock().get(&name.to_string()).cloned()
    }

    /// Connects `src`'s output `src_out` to `dst`'s input `dst_in`.
    /// Refuses once the pipeline has started unless called through
    /// [`Pipeline::connect_dynamic`] (spec.md §4.H: "new connections
    /// after start must happen through a special dynamic path").
    pub fn connect(
        self: &Arc<Self>,
        src: &str,
        src_out: usize,
        dst: &str,
        dst_in: usize,
        allow_multiple: bool,
    ) -> Result<(), PipelineError> {
        self.connect_impl(src, src_out, dst, dst_in, allow_multiple, false)
    }

    /// Like [`Pipeline::connect`] but permitted after the pipeline has
    /// started — used to splice in a filter while the pipeline is
    /// running (spec.md §8 "dynamic add-while-running").
    pub fn connect_dynamic(
        self: &Arc<Self>,
        src: &str,
        src_out: usize,
        dst: &str,
        dst_in: usize,
        allow_multiple: bool,
    ) -> Result<(), PipelineError> {
        self.connect_impl(src, src_out, dst, dst_in, allow_multiple, true)
    }

    fn connect_impl(
        self: &Arc<Self>,
        src: &str,
        src_out: usize,
        dst: &str,
        dst_in: usize,
        allow_multiple: bool,
        dynamic: bool,
    ) -> Result<(), PipelineError> {
        if self.started.load(Ordering::SeqCst) && !dynamic {
            return Err(PipelineError::TopologyChanged);
        }

        let (src_filter, dst_filter) = {
            let filters = self.filters.lock();
            let src_filter = filters
                .get(&src.to_string())
                .cloned()
                .ok_or_else(|| ConnectError::UnknownFilter(src.to_string()))?;
            let dst_filter = filters
                .get(&dst.to_string())
                .cloned()
                .ok_or_else(|| ConnectError::UnknownFilter(dst.to_string()))?;
            (src_filter, dst_filter)
        };

        let output = src_filter
            .get_output(src_out)
            .ok_or(ConnectError::NoSuchOutput(src_out))?;
        dst_filter.connect(output, dst_in, allow_multiple)?;

        self.connections.lock().push(ConnectionRecord {
            src: src.to_string(),
            src_out,
            dst: dst.to_string(),
            dst_in,
        });

        self.recompute_topology();
        if dynamic && self.started.load(Ordering::SeqCst) && dst_filter.is_source() {
            dst_filter.start_source();
        }
        Ok(())
    }

    /// Removes a filter. Fatal if it still has live connections (spec.md
    /// §4.H).
    pub fn remove_module(&self, name: &str) -> Result<(), PipelineError> {
        let mut filters = self.filters.lock();
        let Some(filter) = filters.get(&name.to_string()) else {
            return Err(PipelineError::Connect(ConnectError::UnknownFilter(name.to_string())));
        };
        if filter.has_connections() {
            return Err(PipelineError::FilterHasConnections(name.to_string()));
        }
        filters.remove(&name.to_string());
        Ok(())
    }

    fn recompute_topology(&self) {
        let filters = self.filters.lock();
        let sinks = filters
            .iter()
            .filter(|(_, f)| f.has_connected_input() && !f.has_connected_output())
            .count();
        let mut completion = self.completion.lock();
        completion.expected_completions = sinks;
        completion.remaining_completions = sinks;
        debug!(sinks, "recomputed pipeline topology");
    }

    /// Computes topology, then starts every source filter.
    pub fn start(self: &Arc<Self>) {
        self.recompute_topology();
        self.started.store(true, Ordering::SeqCst);
        for (_, filter) in self.filters.lock().iter() {
            filter.start_source();
        }
        info!("pipeline started");
    }

    /// Blocks until every sink has reached end-of-stream, or a filter
    /// raised an exception — in which case `exit_sync()` is called and
    /// the exception re-raised to the caller.
    pub fn wait_for_end_of_stream(&self) -> Result<(), PipelineError> {
        let mut completion = self.completion.lock();
        loop {
            if let Some(err) = completion.exception.take() {
                drop(completion);
                self.exit_sync();
                return Err(err);
            }
            if completion.remaining_completions == 0 {
                return Ok(());
            }
            self.condvar.wait_for(&mut completion, Self::COMPLETION_GRANULARITY);
        }
    }

    /// Marks every source as stopped; each one's own processing loop
    /// observes the flag at its next iteration and propagates EOS.
    pub fn exit_sync(&self) {
        for (_, filter) in self.filters.lock().iter() {
            if filter.is_source() {
                filter.stop_source();
            }
        }
    }

    /// A Graphviz DOT dump of the current topology, for debugging.
    pub fn dump(&self) -> String {
        let filters = self.filters.lock();
        let connections = self.connections.lock();
        let mut out = String::from("digraph pipeline {\n");
        for (name, _) in filters.iter() {
            out.push_str(&format!("  \"{name}\";\n"));
        }
        for c in connections.iter() {
            out.push_str(&format!(
                "  \"{}\" -> \"{}\" [label=\"{}->{}\"];\n",
                c.src, c.dst, c.src_out, c.dst_in
            ));
        }
        out.push_str("}\n");
        out
    }
}

impl FilterController for Pipeline {
    fn notify_end_of_stream(&self, filter: &str) {
        let mut completion = self.completion.lock();
        if completion.remaining_completions > 0 {
            completion.remaining_completions -= 1;
        }
        debug!(filter, remaining = completion.remaining_completions, "filter reached end-of-stream");
        drop(completion);
        self.condvar.notify_all();
    }

    fn report_exception(&self, filter: &str, phase: Phase, error: crate::error::FilterError) {
        let mut completion = self.completion.lock();
        if completion.exception.is_none() {
            completion.exception = Some(match phase {
                Phase::Process => PipelineError::FilterProcess {
                    filter: filter.to_string(),
                    source: error,
                },
                Phase::Flush => PipelineError::FilterFlush {
                    filter: filter.to_string(),
                    source: error,
                },
            });
        } else {
            warn!(filter, "additional filter exception dropped, one is already captured");
        }
        drop(completion);
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::config::PipelineConfig;
    use crate::data::Sample;
    use crate::filter::ModuleSignal;
    use crate::port::Output;
    use std::sync::atomic::AtomicUsize;

    struct FiveSampleSource {
        remaining: AtomicUsize,
    }
    impl FilterModule for FiveSampleSource {
        fn num_inputs(&self) -> usize {
            0
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn process_sample(&self, _i: usize, _s: Arc<Sample>, _o: &[Arc<Output>]) -> Result<(), crate::error::FilterError> {
            unreachable!()
        }
        fn process_source(&self, outputs: &[Arc<Output>]) -> Result<ModuleSignal, crate::error::FilterError> {
            let remaining = self.remaining.fetch_sub(1, Ordering::SeqCst);
            if remaining == 0 {
                return Ok(ModuleSignal::Done);
            }
            outputs[0].post(Some(Sample::raw(vec![remaining as u8])));
            Ok(ModuleSignal::Continue)
        }
    }

    struct CountingSink {
        count: AtomicUsize,
    }
    impl FilterModule for CountingSink {
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            0
        }
        fn process_sample(&self, _i: usize, _s: Arc<Sample>, _o: &[Arc<Output>]) -> Result<(), crate::error::FilterError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn empty_pipeline() -> Arc<Pipeline> {
        Pipeline::new(Arc::new(VirtualClock::frozen()), PipelineConfig::mono(), None)
    }

    #[test]
    fn empty_pipeline_completes_immediately() {
        let pipeline = empty_pipeline();
        pipeline.start();
        assert!(pipeline.wait_for_end_of_stream().is_ok());
    }

    #[test]
    fn five_samples_flow_from_source_to_sink() {
        let pipeline = empty_pipeline();
        let source = Arc::new(FiveSampleSource { remaining: AtomicUsize::new(5) });
        let sink_module = Arc::new(CountingSink { count: AtomicUsize::new(0) });

        pipeline.add_module("source", source);
        pipeline.add_module("sink", sink_module.clone());
        pipeline.connect("source", 0, "sink", 0, false).unwrap();

        pipeline.start();
        pipeline.wait_for_end_of_stream().unwrap();

        assert_eq!(sink_module.count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn connect_after_start_is_refused_without_dynamic_path() {
        let pipeline = empty_pipeline();
        pipeline.add_module("source", Arc::new(FiveSampleSource { remaining: AtomicUsize::new(0) }));
        pipeline.add_module("sink", Arc::new(CountingSink { count: AtomicUsize::new(0) }));
        pipeline.start();

        let result = pipeline.connect("source", 0, "sink", 0, false);
        assert!(matches!(result, Err(PipelineError::TopologyChanged)));
    }

    #[test]
    fn remove_module_with_live_connections_is_refused() {
        let pipeline = empty_pipeline();
        pipeline.add_module("source", Arc::new(FiveSampleSource { remaining: AtomicUsize::new(0) }));
        pipeline.add_module("sink", Arc::new(CountingSink { count: AtomicUsize::new(0) }));
        pipeline.connect("source", 0, "sink", 0, false).unwrap();

        let result = pipeline.remove_module("sink");
        assert!(matches!(result, Err(PipelineError::FilterHasConnections(_))));
    }

    #[test]
    fn dump_lists_filters_and_connections() {
        let pipeline = empty_pipeline();
        pipeline.add_module("source", Arc::new(FiveSampleSource { remaining: AtomicUsize::new(0) }));
        pipeline.add_module("sink", Arc::new(CountingSink { count: AtomicUsize::new(0) }));
        pipeline.connect("source", 0, "sink", 0, false).unwrap();

        let dot = pipeline.dump();
        assert!(dot.contains("\"source\""));
        assert!(dot.contains("\"sink\""));
        assert!(dot.contains("\"source\" -> \"sink\""));
    }
}
