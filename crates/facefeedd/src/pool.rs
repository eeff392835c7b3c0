//! Fixed-size worker pool and the countdown latch used as a per-frame barrier.

use crossbeam::channel::{self, SendTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker pool is shut down")]
    Closed,
    #[error("work queue stayed full past the deadline")]
    Full,
}

/// A fixed set of OS threads pulling jobs from a bounded queue.
///
/// `submit` blocks while the queue is full. Dropping the pool closes the
/// queue and joins every worker after it drains.
pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize, queue: usize) -> Result<Self, PoolError> {
        let size = size.max(1);
        let (tx, rx) = channel::bounded::<Job>(queue.max(1));

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("facefeed-worker-{i}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            tracing::error!(worker = i, "face job panicked");
                        }
                    }
                })?;
            workers.push(handle);
        }

        tracing::debug!(workers = size, queue, "worker pool started");
        Ok(Self { tx: Some(tx), workers })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let tx = self.tx.as_ref().ok_or(PoolError::Closed)?;
        tx.send(Box::new(job)).map_err(|_| PoolError::Closed)
    }

    /// Like [`submit`](Self::submit), but gives up with [`PoolError::Full`]
    /// if no queue slot frees up before `deadline`. The job is dropped then.
    pub fn submit_until<F>(&self, job: F, deadline: Instant) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let tx = self.tx.as_ref().ok_or(PoolError::Closed)?;
        let wait = deadline.saturating_duration_since(Instant::now());
        match tx.send_timeout(Box::new(job), wait) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(PoolError::Full),
            Err(SendTimeoutError::Disconnected(_)) => Err(PoolError::Closed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Countdown latch: `wait` returns once `count_down` was called `count` times.
pub struct Latch {
    remaining: Mutex<usize>,
    done: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: Mutex::new(count),
            done: Condvar::new(),
        })
    }

    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.done.notify_all();
        }
    }

    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.done.wait(&mut remaining);
        }
    }

    /// Wait at most `timeout`. Returns `true` if the count reached zero.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            if self.done.wait_until(&mut remaining, deadline).timed_out() {
                return *remaining == 0;
            }
        }
        true
    }

    /// A guard that counts down when dropped, also on unwind.
    pub fn guard(self: &Arc<Self>) -> LatchGuard {
        LatchGuard(self.clone())
    }
}

pub struct LatchGuard(Arc<Latch>);

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.0.count_down();
    }
}
