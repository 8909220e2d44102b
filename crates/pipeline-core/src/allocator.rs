//! Fixed-capacity pool of byte blocks with blocking backpressure.
//!
//! Grounded on `original_source/src/lib_modules/core/allocator.cpp`'s
//! `MemoryAllocator`: a free-event queue seeded with `maxBlocks` tokens,
//! `alloc` pops a token (blocking until one is available or the pool is
//! unblocked), `free` returns a block and pushes a token back, `unblock`
//! pushes a sentinel that causes pending and future `alloc`s to return
//! `None`. The destructor-time "zero blocks outstanding" assertion becomes
//! a `Drop` impl that panics (spec.md §4.B: "fatal").
//!
//! Rust improvement over the original: callers cannot forget to call
//! `free` — a [`Block`] returns itself to the allocator in its own
//! `Drop`, so "free exactly once" is structural rather than a calling
//! convention.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FreeEvent {
    OneBufferIsFree,
    Exit,
}

struct Shared {
    free_rx: Receiver<FreeEvent>,
    free_tx: Sender<FreeEvent>,
    outstanding: AtomicUsize,
    capacity: usize,
}

/// A bounded pool of byte-block allocations.
pub struct BoundedAllocator {
    shared: Arc<Shared>,
}

impl BoundedAllocator {
    /// Creates a pool with capacity `max_blocks`. Matches the original's
    /// `ALLOC_NUM_BLOCKS_DEFAULT` (10) / `ALLOC_NUM_BLOCKS_LOW_LATENCY`
    /// (2) recommended values; callers pick the constant that fits their
    /// latency budget.
    pub fn new(max_blocks: usize) -> Self {
        assert!(max_blocks > 0, "cannot create an allocator with 0 blocks");
        let (free_tx, free_rx) = bounded(max_blocks + 1 /* room for the Exit sentinel */);
        for _ in 0..max_blocks {
            free_tx
                .send(FreeEvent::OneBufferIsFree)
                .expect("freshly created channel cannot be full");
        }
        Self {
            shared: Arc::new(Shared {
                free_rx,
                free_tx,
                outstanding: AtomicUsize::new(0),
                capacity: max_blocks,
            }),
        }
    }

    pub const DEFAULT_NUM_BLOCKS: usize = 10;
    pub const LOW_LATENCY_NUM_BLOCKS: usize = 2;

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }

    /// Blocks until a block is free or the allocator is unblocked.
    /// Returns `None` once `unblock()` has been called.
    pub fn alloc(&self, size: usize) -> Option<Block> {
        match self.shared.free_rx.recv() {
            Ok(FreeEvent::OneBufferIsFree) => {
                self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
                Some(Block {
                    data: vec![0u8; size],
                    shared: Some(Arc::clone(&self.shared)),
                })
            }
            Ok(FreeEvent::Exit) => {
                // Re-arm the sentinel so other blocked/future allocs also
                // observe it (mirrors the original, where `unblock()` is
                // meant to release every waiter, not just one).
                let _ = self.shared.free_tx.try_send(FreeEvent::Exit);
                None
            }
            Err(_) => None,
        }
    }

    /// Causes pending and future `alloc` calls to return `None`.
    pub fn unblock(&self) {
        let _ = self.shared.free_tx.send(FreeEvent::Exit);
    }
}

impl Drop for BoundedAllocator {
    fn drop(&mut self) {
        let outstanding = self.shared.outstanding.load(Ordering::SeqCst);
        assert_eq!(
            outstanding, 0,
            "BoundedAllocator dropped with {outstanding} block(s) still outstanding"
        );
    }
}

/// An allocation owned by the caller. Returns itself to the pool on
/// `Drop`, pushing a fresh free-event.
pub struct Block {
    data: Vec<u8>,
    shared: Option<Arc<Shared>>,
}

impl Block {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        // Release the slot back to the pool even though the bytes escape;
        // the pool tracks block *slots*, not the bytes themselves.
        if let Some(shared) = self.shared.take() {
            shared.outstanding.fetch_sub(1, Ordering::SeqCst);
            let _ = shared.free_tx.send(FreeEvent::OneBufferIsFree);
        }
        std::mem::take(&mut self.data)
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.outstanding.fetch_sub(1, Ordering::SeqCst);
            let _ = shared.free_tx.send(FreeEvent::OneBufferIsFree);
        }
    }
}
