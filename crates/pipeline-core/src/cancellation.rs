//! A cheap, clonable cancellation flag.
//!
//! Mirrors the teacher's `pipeline_common::cancellation::CancellationToken`
//! (referenced from `pipeline_common::lib` but not itself part of the
//! retrieved pack) and the role `Pipeline::exitSync()` plays in
//! `original_source/src/lib_pipeline/pipeline.cpp`: a flag that filters
//! observe cooperatively rather than being preempted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
