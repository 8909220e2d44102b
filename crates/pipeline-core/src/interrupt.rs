//! Process-wide interrupt plumbing for the lifecycle protocol's "clean
//! shutdown on external signal" clause (spec.md §2 item 4, §6, §9).
//!
//! OS signal *registration* is an external collaborator's job (spec.md
//! §1: CLI argument parsing is out of scope); this module is what that
//! collaborator calls into. It replaces the original's raw global
//! `Pipeline*` read directly from inside a `signal()` handler with a
//! process-wide weak handle installed at construction and a dedicated
//! watcher thread draining a channel, so the handler itself never runs
//! pipeline code on the signal's own stack (spec.md §9 "Global mutable
//! pipeline pointer used by signal handlers").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::pipeline::Pipeline;

static ACTIVE_PIPELINE: Mutex<Option<Weak<Pipeline>>> = Mutex::new(None);
static INTERRUPT_TX: OnceLock<Sender<()>> = OnceLock::new();
static INTERRUPT_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Installs `pipeline` as the target of [`notify_interrupt`] calls,
/// replacing whatever was previously installed. A host embedding a
/// single top-level pipeline calls this once, right after construction;
/// [`uninstall`] on the way out.
pub fn install(pipeline: &Arc<Pipeline>) {
    *ACTIVE_PIPELINE.lock() = Some(Arc::downgrade(pipeline));
    ensure_watcher();
}

/// Uninstalls `pipeline` if it is still the active one. A no-op if a
/// different pipeline has since been installed in its place.
pub fn uninstall(pipeline: &Arc<Pipeline>) {
    let mut active = ACTIVE_PIPELINE.lock();
    let same = active
        .as_ref()
        .and_then(Weak::upgrade)
        .map(|installed| Arc::ptr_eq(&installed, pipeline))
        .unwrap_or(false);
    if same {
        *active = None;
    }
}

/// What a host's real signal handler calls (spec.md §6: "on interrupt
/// the host calls `exit_sync` once; a third interrupt forces process
/// exit with code 3"). Safe to call from a signal handler: it only
/// pushes onto a channel, never touching the pipeline or taking a lock
/// on the handler's own stack.
pub fn notify_interrupt() {
    if let Some(tx) = INTERRUPT_TX.get() {
        let _ = tx.send(());
    }
}

/// Test/diagnostic hook: how many interrupts the watcher has processed
/// since the process started.
pub fn interrupt_count() -> usize {
    INTERRUPT_COUNT.load(Ordering::SeqCst)
}

fn ensure_watcher() {
    INTERRUPT_TX.get_or_init(|| {
        let (tx, rx) = unbounded::<()>();
        std::thread::Builder::new()
            .name("pipeline-interrupt-watcher".into())
            .spawn(move || {
                while rx.recv().is_ok() {
                    let count = INTERRUPT_COUNT.fetch_add(1, Ordering::SeqCst) + 1;
                    if count >= 3 {
                        warn!("third interrupt received, forcing process exit");
                        std::process::exit(3);
                    }
                    info!(count, "interrupt received, requesting clean shutdown");
                    match ACTIVE_PIPELINE.lock().as_ref().and_then(Weak::upgrade) {
                        Some(pipeline) => pipeline.exit_sync(),
                        None => warn!("interrupt received but no pipeline is installed"),
                    }
                }
            })
            .expect("failed to spawn interrupt watcher thread");
        tx
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::config::PipelineConfig;
    use std::time::Duration;

    /// Serializes tests against the module's process-wide statics —
    /// `INTERRUPT_TX`/`INTERRUPT_COUNT` persist for the whole test
    /// binary, so two of these tests running concurrently would race.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn install_then_interrupt_stops_every_source() {
        let _guard = TEST_LOCK.lock();
        let pipeline = Pipeline::new(Arc::new(VirtualClock::frozen()), PipelineConfig::mono(), None);
        install(&pipeline);

        let before = interrupt_count();
        notify_interrupt();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while interrupt_count() == before && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(interrupt_count(), before + 1);

        uninstall(&pipeline);
    }

    #[test]
    fn uninstall_of_a_stale_pipeline_is_a_no_op() {
        let _guard = TEST_LOCK.lock();
        let first = Pipeline::new(Arc::new(VirtualClock::frozen()), PipelineConfig::mono(), None);
        let second = Pipeline::new(Arc::new(VirtualClock::frozen()), PipelineConfig::mono(), None);
        install(&first);
        install(&second);

        // `first` is no longer installed, so uninstalling it must not
        // clear `second`'s registration.
        uninstall(&first);
        assert!(ACTIVE_PIPELINE
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|p| Arc::ptr_eq(&p, &second))
            .unwrap_or(false));

        uninstall(&second);
    }
}
