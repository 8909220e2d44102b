//! The filter wrapper: owns a user [`FilterModule`], its executor, its
//! lazily-realized [`Input`]s and [`Output`]s, and EOS/exception
//! bookkeeping.
//!
//! Grounded on spec.md §4.G and `original_source/src/lib_pipeline/
//! filter.hpp` / `filter.cpp` (`Filter::connect`, `Filter::
//! endOfStream`, the `mNumEosDecorator` counter, `startSource`/
//! `stopSource`) plus `pipelined_input.hpp`'s catch-notify-rethrow
//! around module processing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::cancellation::CancellationToken;
use crate::data::{MediaKind, Sample};
use crate::error::{ConnectError, FilterError};
use crate::executor::Executor;
use crate::port::{Input, InputDispatch, Output, DEFAULT_QUEUE_CAPACITY};
use crate::stats::StatsRegistry;

/// What a source module's `process_source` accomplished this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleSignal {
    /// More data may follow; reschedule immediately.
    Continue,
    /// The source has naturally run out of data (e.g. end of file).
    Done,
}

/// Which of a module's entry points an exception escaped from, used to
/// pick the right [`crate::error::PipelineError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Process,
    Flush,
}

/// The user-supplied processing logic a [`FilterWrapper`] drives.
/// Analogous to the original's `IFilter`/`ModuleS`.
pub trait FilterModule: Send + Sync {
    fn num_inputs(&self) -> usize;
    fn num_outputs(&self) -> usize;

    /// True when input `idx` is a "loose" activation-only input (spec.md
    /// §4.G `is_source`): never carries real data, exists only so the
    /// module can be triggered. Default: no input is loose.
    fn is_loose_input(&self, _idx: usize) -> bool {
        false
    }

    /// The media kind this module expects on input `idx`, if it cares.
    /// `None` accepts any kind (spec.md §4.F "if both sides declare one").
    fn input_media_kind(&self, _idx: usize) -> Option<MediaKind> {
        None
    }

    /// Invoked repeatedly by the source loop for filters with no real
    /// inputs. Implementations block internally until data is ready or
    /// the source is naturally exhausted.
    fn process_source(&self, _outputs: &[Arc<Output>]) -> Result<ModuleSignal, FilterError> {
        Ok(ModuleSignal::Done)
    }

    /// Invoked once per sample arriving on input `index`.
    fn process_sample(
        &self,
        index: usize,
        sample: Arc<Sample>,
        outputs: &[Arc<Output>],
    ) -> Result<(), FilterError>;

    /// Invoked once, when every connected input has reached EOS, before
    /// `None` is posted on every output.
    fn flush(&self, _outputs: &[Arc<Output>]) -> Result<(), FilterError> {
        Ok(())
    }
}

/// The owning pipeline's view of a filter's lifecycle events.
/// Implemented by [`crate::pipeline::Pipeline`].
pub trait FilterController: Send + Sync {
    fn notify_end_of_stream(&self, filter: &str);
    fn report_exception(&self, filter: &str, phase: Phase, error: FilterError);
}

/// A no-op [`InputDispatch`], used by tests that only need an `Input` to
/// exist, not to actually be driven by a filter.
pub struct NullDispatch;

impl InputDispatch for NullDispatch {
    fn dispatch_process(&self, _index: usize, _sample: Arc<Sample>) {}
    fn dispatch_eos(&self, _index: usize) {}
}

/// A no-op [`FilterController`], used the same way.
pub struct NullController;

impl FilterController for NullController {
    fn notify_end_of_stream(&self, _filter: &str) {}
    fn report_exception(&self, _filter: &str, _phase: Phase, _error: FilterError) {}
}

pub struct FilterWrapper {
    name: String,
    module: Arc<dyn FilterModule>,
    executor: Arc<dyn Executor>,
    queue_capacity: usize,
    inputs: Mutex<Vec<Option<Arc<Input>>>>,
    outputs: Vec<Arc<Output>>,
    expected_completions: AtomicUsize,
    eos_count: AtomicUsize,
    stopped: CancellationToken,
    started: AtomicBool,
    controller: Arc<dyn FilterController>,
    stats: Option<Arc<StatsRegistry>>,
}

impl FilterWrapper {
    pub fn new(
        name: impl Into<String>,
        module: Arc<dyn FilterModule>,
        executor: Arc<dyn Executor>,
        queue_capacity: usize,
        controller: Arc<dyn FilterController>,
        stats: Option<Arc<StatsRegistry>>,
    ) -> Arc<Self> {
        let num_outputs = module.num_outputs();
        let num_inputs = module.num_inputs();
        Arc::new(Self {
            name: name.into(),
            outputs: (0..num_outputs).map(|_| Arc::new(Output::new())).collect(),
            inputs: Mutex::new((0..num_inputs).map(|_| None).collect()),
            module,
            executor,
            queue_capacity,
            expected_completions: AtomicUsize::new(0),
            eos_count: AtomicUsize::new(0),
            stopped: CancellationToken::new(),
            started: AtomicBool::new(false),
            controller,
            stats,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_inputs(&self) -> usize {
        self.module.num_inputs()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn get_output(&self, idx: usize) -> Option<Arc<Output>> {
        self.outputs.get(idx).cloned()
    }

    /// Lazily realizes input `idx` the first time it is asked for — the
    /// module may declare its inputs dynamically, so this crate never
    /// assumes they all exist up front (spec.md §4.G).
    pub fn get_input(self: &Arc<Self>, idx: usize) -> Option<Arc<Input>> {
        if idx >= self.module.num_inputs() {
            return None;
        }
        let mut inputs = self.inputs.lock();
        if inputs[idx].is_none() {
            let stats_row = self.stats.as_ref().and_then(|registry| {
                registry
                    .allocate_row(&format!("{}.input{idx}", self.name))
                    .ok()
            });
            let dispatch: Arc<dyn InputDispatch> = Arc::clone(self) as Arc<dyn InputDispatch>;
            inputs[idx] = Some(Arc::new(Input::with_capacity(
                idx,
                Arc::clone(&self.executor),
                dispatch,
                self.queue_capacity,
                stats_row,
            )));
        }
        inputs[idx].clone()
    }

    /// True when the module declares zero inputs, or a single loose
    /// input used only to trigger activation (spec.md §4.G).
    pub fn is_source(&self) -> bool {
        let n = self.module.num_inputs();
        n == 0 || (n == 1 && self.module.is_loose_input(0))
    }

    /// Connects `output` to input `idx`. Fails if already connected and
    /// `allow_multiple` is false, or if declared media kinds conflict.
    pub fn connect(
        self: &Arc<Self>,
        output: Arc<Output>,
        input_idx: usize,
        allow_multiple: bool,
    ) -> Result<(), ConnectError> {
        let input = self
            .get_input(input_idx)
            .ok_or(ConnectError::NoSuchInput(input_idx))?;

        if input.connection_count() > 0 && !allow_multiple {
            return Err(ConnectError::AlreadyConnected(input_idx));
        }

        if let (Some(out_kind), Some(in_kind)) = (
            output.get_metadata().map(|m| m.kind()),
            self.module.input_media_kind(input_idx),
        ) {
            if out_kind != in_kind {
                return Err(ConnectError::MetadataIncompatible {
                    output: out_kind,
                    input: in_kind,
                });
            }
        }

        output.connect(Arc::clone(&input));
        input.mark_connected();
        self.expected_completions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Drops the subscription from `output` to input `idx`.
    pub fn disconnect(&self, output: &Output, input_idx: usize, connection: crate::signal::ConnectionId) {
        output.disconnect(connection);
        if let Some(input) = self.inputs.lock().get(input_idx).and_then(Clone::clone) {
            input.mark_disconnected();
        }
        self.expected_completions.fetch_sub(1, Ordering::SeqCst);
    }

    /// Total live subscriptions across every output — used by the
    /// pipeline to refuse `remove_module` on a still-connected filter.
    pub fn has_connections(&self) -> bool {
        let incoming = self
            .inputs
            .lock()
            .iter()
            .flatten()
            .any(|input| input.connection_count() > 0);
        let outgoing = self.outputs.iter().any(|o| o.connection_count() > 0);
        incoming || outgoing
    }

    /// Whether any realized input has at least one live subscriber —
    /// used by the pipeline's topology computation (spec.md §4.H: a
    /// sink is "a filter with a connected input and no connected
    /// output").
    pub fn has_connected_input(&self) -> bool {
        self.inputs
            .lock()
            .iter()
            .flatten()
            .any(|input| input.connection_count() > 0)
    }

    pub fn has_connected_output(&self) -> bool {
        self.outputs.iter().any(|o| o.connection_count() > 0)
    }

    /// Starts the source processing loop if this is a source filter and
    /// it hasn't started yet. Idempotent.
    pub fn start_source(self: &Arc<Self>) {
        if !self.is_source() {
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.expected_completions.store(1, Ordering::SeqCst);
        let this = Arc::clone(self);
        self.executor.execute(Box::new(move || this.run_source_loop()));
    }

    /// Cancels the source loop cooperatively (spec.md §5, §9: a filter
    /// observes this rather than being preempted).
    pub fn stop_source(&self) {
        self.stopped.cancel();
    }

    /// One iteration of source processing, resubmitted to the executor
    /// after each call rather than looping in place (spec.md §9: "a
    /// source is not a coroutine; it is a task that reschedules itself
    /// by submitting another task after each iteration"). This is what
    /// lets a shared `Pool(n)` executor interleave a source with sink
    /// work instead of one source monopolizing a worker forever.
    fn run_source_loop(self: Arc<Self>) {
        if self.stopped.is_cancelled() {
            self.end_of_stream();
            return;
        }
        match self.module.process_source(&self.outputs) {
            Ok(ModuleSignal::Continue) => {
                let this = Arc::clone(&self);
                self.executor.execute(Box::new(move || this.run_source_loop()));
            }
            Ok(ModuleSignal::Done) => self.end_of_stream(),
            Err(err) => {
                error!(filter = %self.name, "source processing failed: {err}");
                self.controller.report_exception(&self.name, Phase::Process, err);
                self.stopped.cancel();
            }
        }
    }

    /// Drives every realized input's own `process()` once. Call this
    /// from a filter's dedicated worker in a loop, or from the pipeline
    /// in `mono` mode (spec.md §5) to advance every filter in turn.
    pub fn poll_inputs(&self) {
        for input in self.inputs.lock().iter().flatten() {
            input.process();
        }
    }

    fn end_of_stream(&self) {
        let count = self.eos_count.fetch_add(1, Ordering::SeqCst) + 1;
        let expected = self.expected_completions.load(Ordering::SeqCst).max(1);
        if count > expected {
            panic!(
                "filter {:?} observed {count} end-of-stream signals but only expected {expected}",
                self.name
            );
        }
        if count == expected {
            debug!(filter = %self.name, "all inputs reached end-of-stream, flushing");
            if let Err(err) = self.module.flush(&self.outputs) {
                self.controller.report_exception(&self.name, Phase::Flush, err);
            }
            for output in &self.outputs {
                output.post(None);
            }
            self.controller.notify_end_of_stream(&self.name);
        }
    }
}

impl InputDispatch for FilterWrapper {
    fn dispatch_process(&self, index: usize, sample: Arc<Sample>) {
        if let Err(err) = self.module.process_sample(index, sample, &self.outputs) {
            error!(filter = %self.name, input = index, "process failed: {err}");
            self.controller.report_exception(&self.name, Phase::Process, err);
            self.stopped.cancel();
        }
    }

    fn dispatch_eos(&self, _index: usize) {
        self.end_of_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SyncExecutor;
    use std::sync::Mutex as StdMutex;

    struct PassThrough {
        seen: StdMutex<Vec<Vec<u8>>>,
    }

    impl FilterModule for PassThrough {
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn process_sample(&self, _index: usize, sample: Arc<Sample>, outputs: &[Arc<Output>]) -> Result<(), FilterError> {
            self.seen.lock().unwrap().push(sample.data().to_vec());
            outputs[0].post(Some(sample.clone_for_reemission()));
            Ok(())
        }
    }

    struct RecordingController {
        eos: StdMutex<Vec<String>>,
    }
    impl FilterController for RecordingController {
        fn notify_end_of_stream(&self, filter: &str) {
            self.eos.lock().unwrap().push(filter.to_string());
        }
        fn report_exception(&self, _filter: &str, _phase: Phase, _error: FilterError) {}
    }

    /// Records what a downstream `Input` actually received. `Input::push`
    /// already drives `Input::process` to completion on a `SyncExecutor`
    /// (see `port::input`'s tests), which hands the packet to `dispatch`
    /// and leaves the queue empty — so a probe must observe delivery
    /// through the dispatch callback, not `try_pop`.
    struct RecordingDispatch {
        samples: StdMutex<Vec<Vec<u8>>>,
        eos_count: AtomicUsize,
    }
    impl InputDispatch for RecordingDispatch {
        fn dispatch_process(&self, _index: usize, sample: Arc<Sample>) {
            self.samples.lock().unwrap().push(sample.data().to_vec());
        }
        fn dispatch_eos(&self, _index: usize) {
            self.eos_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn non_source_filter_flushes_and_posts_eos_once_all_inputs_done() {
        let controller = Arc::new(RecordingController { eos: StdMutex::new(Vec::new()) });
        let module = Arc::new(PassThrough { seen: StdMutex::new(Vec::new()) });
        let filter = FilterWrapper::new(
            "passthrough",
            module.clone(),
            Arc::new(SyncExecutor),
            DEFAULT_QUEUE_CAPACITY,
            controller.clone(),
            None,
        );

        let input = filter.get_input(0).unwrap();
        input.mark_connected();
        filter.expected_completions.fetch_add(1, Ordering::SeqCst);

        let output = filter.get_output(0).unwrap();
        let sink_dispatch = Arc::new(RecordingDispatch {
            samples: StdMutex::new(Vec::new()),
            eos_count: AtomicUsize::new(0),
        });
        let sink = Arc::new(Input::new(0, Arc::new(SyncExecutor), sink_dispatch.clone()));
        output.connect(Arc::clone(&sink));

        // push() already drives Input::process() to completion (Sync
        // executor), dispatching each packet as it arrives.
        input.push(Some(Arc::new(Sample::raw(vec![1, 2]))));
        input.push(None);

        assert_eq!(module.seen.lock().unwrap().as_slice(), &[vec![1, 2]]);
        assert_eq!(*controller.eos.lock().unwrap(), vec!["passthrough".to_string()]);
        assert_eq!(sink_dispatch.samples.lock().unwrap().as_slice(), &[vec![1, 2]]);
        assert_eq!(sink_dispatch.eos_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "end-of-stream signals")]
    fn excess_eos_signals_are_fatal() {
        let controller = Arc::new(NullController);
        let module = Arc::new(PassThrough { seen: StdMutex::new(Vec::new()) });
        let filter = FilterWrapper::new("p", module, Arc::new(SyncExecutor), DEFAULT_QUEUE_CAPACITY, controller, None);
        filter.end_of_stream();
        filter.end_of_stream();
    }

    struct ZeroInputSource;
    impl FilterModule for ZeroInputSource {
        fn num_inputs(&self) -> usize {
            0
        }
        fn num_outputs(&self) -> usize {
            0
        }
        fn process_sample(&self, _index: usize, _sample: Arc<Sample>, _outputs: &[Arc<Output>]) -> Result<(), FilterError> {
            unreachable!("source modules are never dispatched a sample")
        }
        fn process_source(&self, _outputs: &[Arc<Output>]) -> Result<ModuleSignal, FilterError> {
            Ok(ModuleSignal::Done)
        }
    }

    #[test]
    fn zero_input_module_is_a_source_and_start_is_idempotent() {
        let controller = Arc::new(RecordingController { eos: StdMutex::new(Vec::new()) });
        let filter = FilterWrapper::new(
            "src",
            Arc::new(ZeroInputSource),
            Arc::new(SyncExecutor),
            DEFAULT_QUEUE_CAPACITY,
            controller.clone(),
            None,
        );
        assert!(filter.is_source());

        filter.start_source();
        filter.start_source(); // idempotent: must not run the loop twice

        assert_eq!(*controller.eos.lock().unwrap(), vec!["src".to_string()]);
    }
}
