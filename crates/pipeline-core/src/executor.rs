//! Where a [`crate::signal::Signal`] connection's callback actually runs.
//!
//! Grounded on `original_source/src/lib_signals/executor.hpp` /
//! `executor_threadpool.hpp`: the original offers `ExecutorSync` (run
//! inline), `ExecutorAsync`/`ExecutorThread` (one dedicated worker with
//! an unbounded FIFO) and `ExecutorThreadPool` (N long-lived workers
//! pulling from a shared queue). spec.md §4.E keeps the same three
//! policies under the names `Sync` / `Thread` / `Pool`; `Lazy`/`Auto`
//! from the original are scheduling heuristics layered on `Sync`/
//! `Thread` rather than distinct mechanisms, so they are not reified as
//! separate types here.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Sender};

pub type Job = Box<dyn FnOnce() + Send>;

/// Runs a queued job. Implementations decide *where*; callers
/// ([`crate::signal::Signal::emit`]) never know which policy is in use.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs the job inline, on the caller's thread. The default for filters
/// with no declared threading requirement (spec.md §4.E).
pub struct SyncExecutor;

impl Executor for SyncExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}

/// A pool of worker threads draining a single shared, unbounded FIFO.
/// Used both for [`ThreadExecutor`] (one worker) and [`ThreadPoolExecutor`]
/// (N workers) — they differ only in worker count, matching
/// `ExecutorThread` being a degenerate one-worker `ExecutorThreadPool` in
/// spirit in the original.
struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl WorkerPool {
    fn new(num_threads: usize, name_prefix: &str) -> Self {
        assert!(num_threads > 0, "executor needs at least one worker");
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(num_threads);
        for idx in 0..num_threads {
            let receiver = receiver.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("{name_prefix}-{idx}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn executor worker"),
            );
        }
        Self {
            sender: Some(sender),
            workers,
        }
    }

    fn execute(&self, job: Job) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(job);
        }
    }
}

impl Drop for WorkerPool {
    /// Cooperative shutdown: drop our sender so the shared channel closes
    /// once every in-flight job has been sent, then join every worker
    /// (spec.md §4.E: "a dedicated-thread or pool executor's Drop pushes
    /// one sentinel per worker and joins" — closing the channel is the
    /// equivalent of an implicit sentinel per worker here).
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Spawns one dedicated worker thread backed by an unbounded FIFO.
/// Matches the original's `ExecutorThread`: used for a filter's own
/// processing thread (spec.md §5 "one thread per filter").
pub struct ThreadExecutor {
    pool: WorkerPool,
}

impl ThreadExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pool: WorkerPool::new(1, "pipeline-thread"),
        })
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, job: Job) {
        self.pool.execute(job);
    }
}

/// A fixed-size pool of worker threads pulling jobs off a shared queue.
/// Grounded on `original_source/src/lib_signals/
/// executor_threadpool.hpp`'s `ExecutorThreadPool`.
pub struct ThreadPoolExecutor {
    pool: WorkerPool,
}

impl ThreadPoolExecutor {
    pub fn new(num_threads: usize) -> Arc<Self> {
        Arc::new(Self {
            pool: WorkerPool::new(num_threads, "pipeline-pool"),
        })
    }
}

impl Executor for ThreadPoolExecutor {
    fn execute(&self, job: Job) {
        self.pool.execute(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use crossbeam_channel::bounded;

    #[test]
    fn sync_executor_runs_inline() {
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = Arc::clone(&flag);
        SyncExecutor.execute(Box::new(move || {
            flag2.store(1, Ordering::SeqCst);
        }));
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thread_pool_runs_all_jobs() {
        let pool = ThreadPoolExecutor::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn thread_executor_runs_off_caller_thread() {
        let caller = std::thread::current().id();
        let executor = ThreadExecutor::new();
        let (tx, rx) = bounded::<std::thread::ThreadId>(1);
        executor.execute(Box::new(move || {
            let _ = tx.send(std::thread::current().id());
        }));
        let ran_on = rx.recv_timeout(Duration::from_millis(200)).unwrap();
        assert_ne!(ran_on, caller);
    }

    #[test]
    fn dropping_pool_joins_workers_cleanly() {
        let pool = ThreadPoolExecutor::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = Arc::clone(&counter);
        pool.execute(Box::new(move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        }));
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
