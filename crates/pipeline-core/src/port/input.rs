//! An input port: a bounded FIFO queue plus the owning filter's executor
//! reference and a statistics row handle (spec.md §4.F).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::warn;

use crate::data::Metadata;
use crate::executor::Executor;
use crate::stats::StatsRow;

use super::Packet;

/// Default bound on an input's queue (spec.md never names a number;
/// `pipeline_common`-style crates default to a small bound that favors
/// backpressure over unbounded memory growth — see `PipelineConfig`).
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// The owning filter's reaction to a dequeued packet. Implemented by
/// [`crate::filter::FilterWrapper`]; kept as a trait so `Input` does not
/// need a direct dependency cycle back onto the filter that owns it.
pub trait InputDispatch: Send + Sync {
    /// A real sample arrived on input `index`.
    fn dispatch_process(&self, index: usize, sample: Arc<crate::data::Sample>);
    /// End-of-stream arrived on input `index`.
    fn dispatch_eos(&self, index: usize);
}

pub struct Input {
    index: usize,
    executor: Arc<dyn Executor>,
    dispatch: Arc<dyn InputDispatch>,
    sender: Sender<Packet>,
    receiver: Receiver<Packet>,
    cached_metadata: Mutex<Option<Arc<Metadata>>>,
    stats: Option<Arc<StatsRow>>,
    eos_seen: AtomicBool,
    connections: AtomicUsize,
}

impl Input {
    pub fn new(index: usize, executor: Arc<dyn Executor>, dispatch: Arc<dyn InputDispatch>) -> Self {
        Self::with_capacity(index, executor, dispatch, DEFAULT_QUEUE_CAPACITY, None)
    }

    pub fn with_capacity(
        index: usize,
        executor: Arc<dyn Executor>,
        dispatch: Arc<dyn InputDispatch>,
        capacity: usize,
        stats: Option<Arc<StatsRow>>,
    ) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            index,
            executor,
            dispatch,
            sender,
            receiver,
            cached_metadata: Mutex::new(None),
            stats,
            eos_seen: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }

    /// Records that an output has subscribed to this input. Tracked
    /// here (rather than derived from the channel) so `allow_multiple`
    /// checks at connect time don't depend on timing of delivery.
    pub fn mark_connected(&self) {
        self.connections.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_disconnected(&self) {
        self.connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Enqueues `packet`, non-blocking. If the queue is full the packet
    /// is dropped and a warning logged — spec.md §4.F specifies `push`
    /// as non-blocking, so backpressure here is lossy rather than
    /// stalling the producer (the allocator, not the sample queue, is
    /// where the pipeline's real backpressure lives — spec.md §4.B/§5).
    ///
    /// A successful enqueue immediately drives [`Input::process`]: this
    /// is what makes "the destination filter's executor later dequeues
    /// and invokes the filter's processing routine" (spec.md §2) happen
    /// without a separate polling loop. Because `process` dispatches the
    /// actual work through `self.executor`, a `Thread`/`Pool` executor
    /// keeps this non-blocking (the dispatch is just a channel send);
    /// only `Sync` makes `push` synchronously run the module, which is
    /// exactly what the `mono` threading policy wants (spec.md §5).
    pub fn push(&self, packet: Packet) {
        if let Err(err) = self.sender.try_send(packet) {
            warn!(input = self.index, "input queue full, dropping packet: {err}");
            return;
        }
        self.process();
    }

    /// Blocks until a packet or sentinel arrives.
    pub fn pop(&self) -> Option<Packet> {
        self.receiver.recv().ok()
    }

    pub fn try_pop(&self) -> Option<Packet> {
        match self.receiver.try_recv() {
            Ok(packet) => Some(packet),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// On first sample or when upstream metadata changes, updates the
    /// input's cached metadata and returns `true`.
    pub fn update_metadata(&self, metadata: Option<&Arc<Metadata>>) -> bool {
        let Some(metadata) = metadata else {
            return false;
        };
        let mut cached = self.cached_metadata.lock();
        let changed = match cached.as_ref() {
            Some(current) => !Arc::ptr_eq(current, metadata) && current.as_ref() != metadata.as_ref(),
            None => true,
        };
        if changed {
            *cached = Some(Arc::clone(metadata));
        }
        changed
    }

    pub fn cached_metadata(&self) -> Option<Arc<Metadata>> {
        self.cached_metadata.lock().clone()
    }

    /// The input's own driver: pops one packet, bumps its stats counter,
    /// and dispatches it to the owning filter via its executor.
    pub fn process(&self) {
        let Some(packet) = self.pop() else {
            return;
        };
        if let Some(stats) = &self.stats {
            stats.increment();
        }
        match packet {
            Some(sample) => {
                self.update_metadata(sample.metadata());
                let dispatch = Arc::clone(&self.dispatch);
                let index = self.index;
                self.executor.execute(Box::new(move || {
                    dispatch.dispatch_process(index, sample);
                }));
            }
            None => {
                if self.eos_seen.swap(true, Ordering::SeqCst) {
                    return;
                }
                let dispatch = Arc::clone(&self.dispatch);
                let index = self.index;
                self.executor.execute(Box::new(move || {
                    dispatch.dispatch_eos(index);
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Sample;
    use crate::executor::SyncExecutor;
    use std::sync::atomic::AtomicUsize;

    struct RecordingDispatch {
        processed: Mutex<Vec<Vec<u8>>>,
        eos_count: AtomicUsize,
    }

    impl InputDispatch for RecordingDispatch {
        fn dispatch_process(&self, _index: usize, sample: Arc<Sample>) {
            self.processed.lock().push(sample.data().to_vec());
        }
        fn dispatch_eos(&self, _index: usize) {
            self.eos_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn process_dispatches_sample_then_eos_exactly_once() {
        let dispatch = Arc::new(RecordingDispatch {
            processed: Mutex::new(Vec::new()),
            eos_count: AtomicUsize::new(0),
        });
        let input = Input::new(0, Arc::new(SyncExecutor), dispatch.clone());

        // Each push already drives process() to completion (Sync
        // executor), so the packets are dispatched as they arrive.
        input.push(Some(Arc::new(Sample::raw(vec![1, 2]))));
        input.push(None);
        input.push(None); // a duplicate sentinel must not double-dispatch

        assert_eq!(dispatch.processed.lock().as_slice(), &[vec![1, 2]]);
        assert_eq!(dispatch.eos_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn full_queue_drops_rather_than_blocks() {
        // Bypass push()'s auto-drive of process() to observe the raw
        // channel-level backpressure contract: a full queue drops
        // rather than stalling the producer.
        let dispatch = Arc::new(crate::filter::NullDispatch);
        let input = Input::with_capacity(0, Arc::new(SyncExecutor), dispatch, 1, None);
        input.sender.try_send(Some(Arc::new(Sample::raw(vec![1])))).unwrap();
        assert!(input.sender.try_send(Some(Arc::new(Sample::raw(vec![2])))).is_err());

        assert_eq!(input.try_pop().unwrap().unwrap().data(), &[1]);
        assert!(input.try_pop().is_none());
    }
}
