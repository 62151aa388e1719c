//! Worker scheduler pool.
//!
//! A [`SchedulerPool`] owns a fixed set of worker threads. Each worker runs a
//! current-thread tokio runtime driving a `LocalSet`, and executes jobs
//! submitted through its [`SchedulerHandle`] in submission order. Jobs are
//! plain closures; a job that needs to do async work spawns it with
//! `tokio::task::spawn_local` and returns.
//!
//! Ordering is the load-bearing property: two jobs submitted from the same
//! thread to the same scheduler run in submission order. The cluster layers
//! rely on this to preserve per-connection FIFO across the mailbox hop.

use std::cell::Cell;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tokio::sync::Notify;

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static CURRENT_SCHEDULER: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Index of the scheduler the calling thread belongs to, or `None` when
/// called from a thread outside any pool.
pub fn current_scheduler() -> Option<usize> {
    CURRENT_SCHEDULER.with(|c| c.get())
}

/// Handle for submitting work to one scheduler.
///
/// Cheap to clone and safe to share across threads. Jobs submitted after the
/// pool has shut down are silently dropped.
#[derive(Clone)]
pub struct SchedulerHandle {
    index: usize,
    jobs: mpsc::UnboundedSender<Job>,
}

impl SchedulerHandle {
    /// Index of the scheduler this handle targets.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Submit a job. Jobs from one submitting thread execute in submission
    /// order. The job runs inside the scheduler's `LocalSet`, so it may call
    /// `tokio::task::spawn_local`.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self.jobs.send(Box::new(job));
    }
}

struct Worker {
    handle: SchedulerHandle,
    shutdown: Arc<Notify>,
    thread: Option<JoinHandle<()>>,
}

/// Fixed-size pool of single-threaded worker schedulers.
///
/// Dropping the pool stops every worker: pending jobs stop draining, each
/// worker's `LocalSet` is dropped (cancelling any local tasks it still owns,
/// which closes their sockets), and the threads are joined.
pub struct SchedulerPool {
    workers: Vec<Worker>,
}

impl SchedulerPool {
    /// Spawn a pool with `count` workers.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero or a worker thread cannot be spawned.
    pub fn new(count: usize) -> Self {
        assert!(count > 0, "scheduler pool needs at least one worker");
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let (tx, rx) = mpsc::unbounded_channel::<Job>();
            let shutdown = Arc::new(Notify::new());
            let shutdown_rx = shutdown.clone();
            let thread = std::thread::Builder::new()
                .name(format!("scheduler-{index}"))
                .spawn(move || worker_main(index, rx, shutdown_rx))
                .expect("failed to spawn scheduler thread");
            workers.push(Worker {
                handle: SchedulerHandle { index, jobs: tx },
                shutdown,
                thread: Some(thread),
            });
        }
        Self { workers }
    }

    /// Number of workers in the pool.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// True if the pool has no workers (never the case for a live pool).
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Handle for the worker at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn handle(&self, index: usize) -> SchedulerHandle {
        self.workers[index].handle.clone()
    }

    /// Handles for every worker, in index order.
    pub fn handles(&self) -> Vec<SchedulerHandle> {
        self.workers.iter().map(|w| w.handle.clone()).collect()
    }

    /// Run a job on worker `index` and block the calling thread until it
    /// completes, returning its result.
    ///
    /// Must be called from outside the pool (blocking a worker on another
    /// worker's queue is fine, but blocking a worker on itself would
    /// deadlock). Used by constructors that need a listener bound before
    /// they return.
    ///
    /// # Panics
    ///
    /// Panics if the worker shuts down before running the job.
    pub fn run_blocking<R, F>(&self, index: usize, job: F) -> R
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        self.handle(index).spawn(move || {
            let _ = tx.send(job());
        });
        rx.recv().expect("scheduler exited before completing job")
    }
}

impl Drop for SchedulerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.shutdown.notify_one();
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

fn worker_main(index: usize, mut jobs: mpsc::UnboundedReceiver<Job>, shutdown: Arc<Notify>) {
    CURRENT_SCHEDULER.with(|c| c.set(Some(index)));
    tracing::trace!(index, "scheduler worker started");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .expect("failed to build scheduler runtime");
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async move {
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                job = jobs.recv() => match job {
                    Some(job) => job(),
                    None => break,
                },
            }
        }
    });
    // `local` is dropped here, cancelling any tasks still spawned on it.
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn jobs_run_in_submission_order() {
        let pool = SchedulerPool::new(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let seen = seen.clone();
            pool.handle(0).spawn(move || seen.lock().unwrap().push(i));
        }
        // A blocking job behind the others acts as a barrier.
        pool.run_blocking(0, || ());
        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn current_scheduler_is_set_on_workers() {
        let pool = SchedulerPool::new(3);
        assert_eq!(current_scheduler(), None);
        for i in 0..3 {
            let index = pool.run_blocking(i, current_scheduler);
            assert_eq!(index, Some(i));
        }
    }

    #[test]
    fn run_blocking_returns_job_result() {
        let pool = SchedulerPool::new(2);
        assert_eq!(pool.run_blocking(1, || 6 * 7), 42);
    }

    #[test]
    fn jobs_may_spawn_local_tasks() {
        let pool = SchedulerPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = counter.clone();
            pool.handle(0).spawn(move || {
                tokio::task::spawn_local(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            });
        }
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn workers_run_in_parallel() {
        let pool = SchedulerPool::new(2);
        let a = pool.run_blocking(0, || std::thread::current().id());
        let b = pool.run_blocking(1, || std::thread::current().id());
        assert_ne!(a, b);
    }

    #[test]
    fn shutdown_drops_pending_local_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = SchedulerPool::new(1);
            let counter = counter.clone();
            pool.handle(0).spawn(move || {
                tokio::task::spawn_local(async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            });
            // Give the job a chance to run before the pool is dropped.
            pool.run_blocking(0, || ());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
