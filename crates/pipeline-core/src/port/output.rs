//! An output port: an adapter over a [`Signal`] that also tracks the
//! declared metadata of the stream it produces (spec.md §4.F).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::data::{Metadata, Sample};
use crate::signal::{ConnectionId, Signal};

use super::input::Input;
use super::Packet;

pub struct Output {
    metadata: Mutex<Option<Arc<Metadata>>>,
    signal: Signal<Packet>,
    eos_posted: AtomicBool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    pub fn new() -> Self {
        Self {
            metadata: Mutex::new(None),
            signal: Signal::new(),
            eos_posted: AtomicBool::new(false),
        }
    }

    /// Sets the stream's declared metadata. Spec.md §4.F: "subsequent
    /// metadata attached to posted samples is expected to equal this" —
    /// only a connect-time compatibility check is enforced (§4.F), this
    /// method itself may be called more than once if upstream's stream
    /// shape genuinely changes (e.g. a resolution switch).
    pub fn set_metadata(&self, metadata: Arc<Metadata>) {
        *self.metadata.lock() = Some(metadata);
    }

    pub fn get_metadata(&self) -> Option<Arc<Metadata>> {
        self.metadata.lock().clone()
    }

    /// Subscribes `input` to this output. Returns the connection id used
    /// to later [`Output::disconnect`].
    pub fn connect(&self, input: Arc<Input>) -> ConnectionId {
        let executor = input.executor();
        self.signal.connect(executor, move |packet: Packet| {
            input.push(packet);
        })
    }

    pub fn disconnect(&self, id: ConnectionId) {
        self.signal.disconnect(id);
    }

    pub fn disconnect_all(&self) {
        self.signal.disconnect_all();
    }

    pub fn connection_count(&self) -> usize {
        self.signal.connection_count()
    }

    /// Emits `sample` to every connected input. `None` signals EOS; no
    /// further `post` may follow a `None` (spec.md §7: "no error ever
    /// crosses an EOS boundary" — likewise, no *sample* does).
    pub fn post(&self, sample: Option<Sample>) {
        if self.eos_posted.load(Ordering::SeqCst) {
            panic!("Output::post called again after end-of-stream was already posted");
        }
        if sample.is_none() {
            self.eos_posted.store(true, Ordering::SeqCst);
        }
        self.signal.emit(sample.map(Arc::new));
    }
}
