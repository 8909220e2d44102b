//! An ordered multicast connection point: connect N receivers, emit a
//! value, every receiver runs (each dispatched through its own
//! [`crate::executor::Executor`]).
//!
//! Grounded on `original_source/src/lib_signals/core/signal.hpp`'s
//! `Signal<...>`: an insertion-ordered map from connection id to
//! `(callback, executor)`, `connect`/`disconnect` returning/taking an
//! opaque id, and `emit` invoking every connected callback through its
//! executor. Rust replaces the template callback with a boxed `Fn`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::executor::Executor;

/// Opaque handle returned by [`Signal::connect`], required by
/// [`Signal::disconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

struct Connection<T> {
    id: ConnectionId,
    callback: Arc<dyn Fn(T) + Send + Sync>,
    executor: Arc<dyn Executor>,
}

/// An ordered multicast signal carrying values of type `T`.
///
/// `T: Clone` because every connected receiver gets its own value — this
/// is the fan-out primitive underneath [`crate::port::Output`], where
/// `T` is typically an `Arc<Sample>` or similarly cheap-to-clone handle.
pub struct Signal<T> {
    next_id: AtomicU64,
    connections: Mutex<Vec<Connection<T>>>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Connects a receiver, dispatched through `executor` when the signal
    /// is emitted. Receivers run in the order they were connected.
    pub fn connect(
        &self,
        executor: Arc<dyn Executor>,
        callback: impl Fn(T) + Send + Sync + 'static,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.connections.lock().push(Connection {
            id,
            callback: Arc::new(callback),
            executor,
        });
        id
    }

    /// Removes a connection. A no-op if `id` is not (or is no longer)
    /// connected, matching the original's tolerant `disconnect`.
    pub fn disconnect(&self, id: ConnectionId) {
        self.connections.lock().retain(|c| c.id != id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Drops every connection at once, used when a port is torn down.
    pub fn disconnect_all(&self) {
        self.connections.lock().clear();
    }

    /// Emits `value` to every connected receiver, in connection order.
    /// Each dispatch goes through that connection's executor, so a
    /// thread-pool executor may run receivers concurrently with each
    /// other even though this method itself iterates sequentially.
    pub fn emit(&self, value: T) {
        let snapshot: Vec<Connection<T>> = {
            let guard = self.connections.lock();
            guard
                .iter()
                .map(|c| Connection {
                    id: c.id,
                    callback: Arc::clone(&c.callback),
                    executor: Arc::clone(&c.executor),
                })
                .collect()
        };
        for conn in snapshot {
            let value = value.clone();
            let callback = Arc::clone(&conn.callback);
            conn.executor.execute(Box::new(move || callback(value)));
        }
    }
}
