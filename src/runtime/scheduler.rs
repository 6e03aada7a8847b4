//! Scheduling seam and the default worker pool.
//!
//! Fibers never talk to threads directly. Each time a fiber becomes runnable
//! its task is handed to a [`Scheduler`] as an opaque [`Job`]; the scheduler
//! only promises to run it later, off the caller's stack.
//!
//! [`WorkerPool`] is the scheduler used unless the builder is given another
//! one: a lock-free injection queue drained by a fixed set of named threads
//! that park on a condition variable while idle.

use crate::error::{Error, ErrorKind};
use crate::types::cause::payload_to_string;
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A unit of work submitted to a scheduler.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs continuations later.
pub trait Scheduler: Send + Sync + 'static {
    /// Queues `job` for execution. Must not run it inline.
    fn submit(&self, job: Job);

    /// Stops accepting work and releases any threads.
    fn shutdown(&self) {}
}

/// Upper bound on how long an idle worker sleeps before re-checking the
/// queue.
const IDLE_PARK: Duration = Duration::from_millis(50);

/// Options for [`WorkerPool`].
#[derive(Clone)]
pub struct WorkerPoolOptions {
    /// Number of worker threads.
    pub worker_threads: usize,
    /// Stack size per worker thread (0 = platform default).
    pub thread_stack_size: usize,
    /// Thread name prefix.
    pub thread_name_prefix: String,
    /// Callback when a thread starts.
    pub on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Callback when a thread stops.
    pub on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Default for WorkerPoolOptions {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            thread_stack_size: 0,
            thread_name_prefix: "fiberscope-worker".to_string(),
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for WorkerPoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPoolOptions")
            .field("worker_threads", &self.worker_threads)
            .field("thread_stack_size", &self.thread_stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}

/// Fixed-size pool of worker threads draining a shared job queue.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    queue: SegQueue<Job>,
    pending: AtomicUsize,
    shutdown: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.inner.threads.lock().len())
            .field("pending", &self.inner.pending.load(Ordering::Relaxed))
            .field("shutdown", &self.inner.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

impl WorkerPool {
    /// Starts a pool with the given options.
    pub fn new(options: WorkerPoolOptions) -> Result<Self, Error> {
        let inner = Arc::new(PoolInner {
            queue: SegQueue::new(),
            pending: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            threads: Mutex::new(Vec::with_capacity(options.worker_threads)),
            on_thread_start: options.on_thread_start.clone(),
            on_thread_stop: options.on_thread_stop.clone(),
        });
        let pool = Self { inner };

        for index in 0..options.worker_threads.max(1) {
            let inner = Arc::clone(&pool.inner);
            let mut builder =
                thread::Builder::new().name(format!("{}-{index}", options.thread_name_prefix));
            if options.thread_stack_size > 0 {
                builder = builder.stack_size(options.thread_stack_size);
            }
            let handle = builder.spawn(move || worker_thread(&inner)).map_err(|e| {
                pool.shutdown();
                Error::new(ErrorKind::ThreadSpawn)
                    .with_message(format!("failed to spawn worker thread {index}"))
                    .with_source(e)
            })?;
            pool.inner.threads.lock().push(handle);
        }

        tracing::debug!(
            workers = options.worker_threads.max(1),
            prefix = %options.thread_name_prefix,
            "worker pool started"
        );
        Ok(pool)
    }

    /// Number of jobs waiting to run.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.load(Ordering::Relaxed)
    }

    /// Number of worker threads still attached to the pool.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.inner.threads.lock().len()
    }

    /// Returns `true` once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    fn notify_one(&self) {
        let _guard = self.inner.mutex.lock();
        self.inner.condvar.notify_one();
    }

    fn notify_all(&self) {
        let _guard = self.inner.mutex.lock();
        self.inner.condvar.notify_all();
    }
}

impl Scheduler for WorkerPool {
    fn submit(&self, job: Job) {
        if self.is_shutdown() {
            tracing::trace!("job dropped: worker pool is shut down");
            return;
        }
        self.inner.queue.push(job);
        self.inner.pending.fetch_add(1, Ordering::Relaxed);
        self.notify_one();
    }

    fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.notify_all();

        let current = thread::current().id();
        let handles: Vec<JoinHandle<()>> = self.inner.threads.lock().drain(..).collect();
        for handle in handles {
            // A worker dropping the runtime cannot join itself.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
        while self.inner.queue.pop().is_some() {
            self.inner.pending.fetch_sub(1, Ordering::Relaxed);
        }
        tracing::debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_thread(inner: &Arc<PoolInner>) {
    if let Some(ref callback) = inner.on_thread_start {
        callback();
    }

    worker_loop(inner);

    if let Some(ref callback) = inner.on_thread_stop {
        callback();
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(job) = inner.queue.pop() {
            inner.pending.fetch_sub(1, Ordering::Relaxed);
            if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
                tracing::error!(
                    message = %payload_to_string(payload.as_ref()),
                    "scheduled job panicked"
                );
            }
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        let mut guard = inner.mutex.lock();
        if inner.queue.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
            let _ = inner.condvar.wait_for(&mut guard, IDLE_PARK);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn runs_submitted_jobs() {
        crate::test_utils::init_test_logging();
        let pool = WorkerPool::new(WorkerPoolOptions {
            worker_threads: 2,
            ..WorkerPoolOptions::default()
        })
        .expect("pool");

        let (tx, rx) = mpsc::channel();
        for i in 0..8 {
            let tx = tx.clone();
            pool.submit(Box::new(move || {
                let _ = tx.send(i);
            }));
        }
        let mut seen: Vec<i32> = (0..8)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).expect("job ran"))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn survives_panicking_job() {
        crate::test_utils::init_test_logging();
        let pool = WorkerPool::new(WorkerPoolOptions::default()).expect("pool");
        pool.submit(Box::new(|| panic!("job failure")));

        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move || {
            let _ = tx.send(());
        }));
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn thread_callbacks_fire() {
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let (s, t) = (Arc::clone(&started), Arc::clone(&stopped));
        let pool = WorkerPool::new(WorkerPoolOptions {
            worker_threads: 3,
            on_thread_start: Some(Arc::new(move || {
                s.fetch_add(1, Ordering::SeqCst);
            })),
            on_thread_stop: Some(Arc::new(move || {
                t.fetch_add(1, Ordering::SeqCst);
            })),
            ..WorkerPoolOptions::default()
        })
        .expect("pool");
        pool.shutdown();
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(stopped.load(Ordering::SeqCst), 3);
        assert!(pool.is_shutdown());
        assert_eq!(pool.worker_count(), 0);
    }
}
