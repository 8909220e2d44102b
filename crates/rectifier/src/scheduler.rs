//! A scheduler of one-shot tasks keyed on a [`Fraction`] clock time.
//!
//! Grounded on `original_source/src/lib_utils/scheduler.hpp`'s
//! `IScheduler`/`Scheduler`: a mutex/condvar-protected min-heap of
//! `(absTime, task)` pairs drained by one background worker that sleeps
//! until the soonest entry's time and then runs it. `scheduleAt`/`cancel`
//! become [`Scheduler::schedule_at`]/[`Scheduler::cancel`]; the original's
//! `scheduleEvery` is not reified here because [`crate::rectifier::Rectifier`]
//! implements its own periodic rescheduling by calling `schedule_at` again
//! from inside the task it runs (mirroring `Rectifier::onPeriod`'s own
//! `reschedule(timeNow + framePeriod)` call).
//!
//! [`RealScheduler`] is the production implementation, driven by an
//! injected [`Clock`]. [`ManualScheduler`] never spawns a thread: a test
//! holds it directly and calls [`ManualScheduler::run_until`] to execute
//! every due task, letting it drive the Rectifier's ticks deterministically
//! in lockstep with a `VirtualClock` instead of racing a background thread
//! against `sleep`.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use pipeline_core::clock::Clock;
use pipeline_core::fraction::Fraction;
use tracing::warn;

/// A task scheduled for a given clock time, invoked with that time (not
/// a freshly re-read "now") so the callee sees the time it was scheduled
/// for, exactly like the original's `onPeriod(Fraction timeNow)`.
pub type ScheduledTask = Box<dyn FnOnce(Fraction) + Send>;

/// Opaque handle returned by [`Scheduler::schedule_at`], accepted by
/// [`Scheduler::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// Schedules one-shot tasks to run at a future clock time.
pub trait Scheduler: Send + Sync {
    fn schedule_at(&self, when: Fraction, task: ScheduledTask) -> TaskId;
    fn cancel(&self, id: TaskId);
}

/// Exact ordering of two clock times by cross-multiplication.
/// `Fraction::new` always keeps `den` positive, so this never needs to
/// reduce either side first.
fn fraction_cmp(a: Fraction, b: Fraction) -> Ordering {
    (a.num * b.den).cmp(&(b.num * a.den))
}

struct Entry {
    id: TaskId,
    when: Fraction,
    task: ScheduledTask,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        fraction_cmp(self.when, other.when) == Ordering::Equal
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    // `BinaryHeap` is a max-heap; reversed so `peek`/`pop` surface the
    // soonest entry.
    fn cmp(&self, other: &Self) -> Ordering {
        fraction_cmp(other.when, self.when)
    }
}

struct Shared {
    clock: Arc<dyn Clock>,
    queue: Mutex<BinaryHeap<Entry>>,
    cancelled: Mutex<HashSet<TaskId>>,
    condvar: Condvar,
    next_id: AtomicU64,
    shutdown: AtomicBool,
}

/// One dedicated worker thread sleeping on the injected `Clock` between
/// due tasks.
pub struct RealScheduler {
    shared: Arc<Shared>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl RealScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let shared = Arc::new(Shared {
            clock,
            queue: Mutex::new(BinaryHeap::new()),
            cancelled: Mutex::new(HashSet::new()),
            condvar: Condvar::new(),
            next_id: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("pipeline-scheduler".into())
            .spawn(move || Self::run(worker_shared))
            .expect("failed to spawn scheduler thread");
        Self {
            shared,
            worker: Some(worker),
        }
    }

    fn run(shared: Arc<Shared>) {
        loop {
            if shared.shutdown.load(AtomicOrdering::SeqCst) {
                return;
            }

            let mut queue = shared.queue.lock();
            let Some(entry) = queue.peek() else {
                shared.condvar.wait_for(&mut queue, Duration::from_millis(200));
                continue;
            };

            let now = shared.clock.now();
            if fraction_cmp(entry.when, now) == Ordering::Greater {
                let wait = Fraction::new(
                    entry.when.num * now.den - now.num * entry.when.den,
                    entry.when.den * now.den,
                );
                drop(queue);
                if shared.clock.speed() <= 0.0 {
                    // A frozen clock never advances: park briefly instead of
                    // spinning, and re-check on the next loop iteration.
                    std::thread::sleep(Duration::from_millis(20));
                } else {
                    shared.clock.sleep(wait);
                }
                continue;
            }

            let entry = queue.pop().expect("peek just returned Some");
            drop(queue);

            if shared.cancelled.lock().remove(&entry.id) {
                continue;
            }
            if shared.shutdown.load(AtomicOrdering::SeqCst) {
                return;
            }
            (entry.task)(entry.when);
        }
    }
}

impl Scheduler for RealScheduler {
    fn schedule_at(&self, when: Fraction, task: ScheduledTask) -> TaskId {
        let id = TaskId(self.shared.next_id.fetch_add(1, AtomicOrdering::SeqCst));
        self.shared.queue.lock().push(Entry { id, when, task });
        self.shared.condvar.notify_one();
        id
    }

    fn cancel(&self, id: TaskId) {
        self.shared.cancelled.lock().insert(id);
    }
}

impl Drop for RealScheduler {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, AtomicOrdering::SeqCst);
        self.shared.condvar.notify_one();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("scheduler worker thread panicked");
            }
        }
    }
}

/// A scheduler with no background thread: entries sit in the heap until
/// a test calls [`ManualScheduler::run_until`], which pops and runs every
/// due entry in time order. Lets a test drive the Rectifier tick by tick
/// without a race between a real thread and a `VirtualClock`.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<BinaryHeap<Entry>>,
    cancelled: Mutex<HashSet<TaskId>>,
    next_id: AtomicU64,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every entry due at or before `now`, soonest first. A task run
    /// here may itself call `schedule_at` again (as the Rectifier's
    /// periodic task does); that fresh entry is only picked up by a
    /// subsequent `run_until` call, not the one in progress.
    pub fn run_until(&self, now: Fraction) {
        loop {
            let due = {
                let mut queue = self.queue.lock();
                match queue.peek() {
                    Some(entry) if fraction_cmp(entry.when, now) != Ordering::Greater => queue.pop(),
                    _ => None,
                }
            };
            let Some(entry) = due else { break };
            if self.cancelled.lock().remove(&entry.id) {
                continue;
            }
            (entry.task)(entry.when);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_at(&self, when: Fraction, task: ScheduledTask) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, AtomicOrdering::SeqCst));
        self.queue.lock().push(Entry { id, when, task });
        id
    }

    fn cancel(&self, id: TaskId) {
        self.cancelled.lock().insert(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn manual_scheduler_runs_only_due_entries_in_time_order() {
        let scheduler = ManualScheduler::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let order2 = Arc::clone(&order);
        scheduler.schedule_at(Fraction::new(2, 1), Box::new(move |_| order2.lock().unwrap().push(2)));
        let order3 = Arc::clone(&order);
        scheduler.schedule_at(Fraction::new(1, 1), Box::new(move |_| order3.lock().unwrap().push(1)));
        let order4 = Arc::clone(&order);
        scheduler.schedule_at(Fraction::new(5, 1), Box::new(move |_| order4.lock().unwrap().push(5)));

        scheduler.run_until(Fraction::new(3, 1));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);

        scheduler.run_until(Fraction::new(10, 1));
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 5]);
    }

    #[test]
    fn manual_scheduler_skips_cancelled_tasks() {
        let scheduler = ManualScheduler::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        let id = scheduler.schedule_at(Fraction::new(1, 1), Box::new(move |_| {
            ran2.fetch_add(1, AtomicOrdering::SeqCst);
        }));
        scheduler.cancel(id);
        scheduler.run_until(Fraction::new(1, 1));
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn manual_scheduler_lets_a_task_reschedule_itself() {
        let scheduler = Arc::new(ManualScheduler::new());
        let ticks = Arc::new(AtomicUsize::new(0));

        fn reschedule(scheduler: Arc<ManualScheduler>, ticks: Arc<AtomicUsize>, when: Fraction) {
            ticks.fetch_add(1, AtomicOrdering::SeqCst);
            if ticks.load(AtomicOrdering::SeqCst) < 3 {
                let scheduler2 = Arc::clone(&scheduler);
                let ticks2 = Arc::clone(&ticks);
                scheduler.schedule_at(
                    when + Fraction::new(1, 1),
                    Box::new(move |now| reschedule(scheduler2, ticks2, now)),
                );
            }
        }

        let scheduler2 = Arc::clone(&scheduler);
        let ticks2 = Arc::clone(&ticks);
        scheduler.schedule_at(Fraction::new(0, 1), Box::new(move |now| reschedule(scheduler2, ticks2, now)));

        scheduler.run_until(Fraction::new(0, 1));
        assert_eq!(ticks.load(AtomicOrdering::SeqCst), 1);

        scheduler.run_until(Fraction::new(1, 1));
        assert_eq!(ticks.load(AtomicOrdering::SeqCst), 2);

        scheduler.run_until(Fraction::new(5, 1));
        assert_eq!(ticks.load(AtomicOrdering::SeqCst), 3);
    }

    #[test]
    fn real_scheduler_runs_a_task_on_a_frozen_clock() {
        use pipeline_core::clock::VirtualClock;
        let clock: Arc<dyn Clock> = Arc::new(VirtualClock::frozen());
        let scheduler = RealScheduler::new(Arc::clone(&clock));
        let (tx, rx) = crossbeam_channel::bounded(1);
        scheduler.schedule_at(Fraction::new(0, 1), Box::new(move |now| {
            let _ = tx.send(now);
        }));
        let received = rx.recv_timeout(Duration::from_secs(2)).expect("task should run promptly at time zero");
        assert_eq!(received, Fraction::new(0, 1));
    }
}
