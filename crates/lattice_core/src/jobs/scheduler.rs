//! Worker pool with a high and a low priority queue.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::config::EcsConfig;
use crate::error::{EcsError, EcsResult};

/// How long an idle worker blocks on the high queue before polling again.
const IDLE_WAIT: Duration = Duration::from_micros(200);

/// A unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Queue a job is submitted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Always serviced first.
    High,
    /// Serviced only when the high queue is empty.
    Low,
}

impl Priority {
    const fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Low => 1,
        }
    }
}

struct Queue {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    /// Jobs submitted and not yet finished.
    pending: AtomicUsize,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            pending: AtomicUsize::new(0),
        }
    }
}

struct Shared {
    queues: [Queue; 2],
    stop: AtomicBool,
}

impl Shared {
    fn queue(&self, priority: Priority) -> &Queue {
        &self.queues[priority.index()]
    }

    fn run(&self, priority: Priority, job: Job) {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!(?priority, "job panicked");
        }
        self.queue(priority).pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Fixed-size thread pool with two priority buckets.
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = JobScheduler::new(4);
/// scheduler.submit(Priority::High, || rebuild_transforms())?;
/// scheduler.submit(Priority::Low, || stream_assets())?;
/// scheduler.wait_for(Priority::High);
/// ```
pub struct JobScheduler {
    shared: Arc<Shared>,
    /// Held shared by `submit` and exclusively by `shutdown`, so a job is
    /// either queued before the workers are told to stop or rejected.
    accepting: RwLock<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Starts `threads` workers (at least one).
    #[must_use]
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let shared = Arc::new(Shared {
            queues: [Queue::new(), Queue::new()],
            stop: AtomicBool::new(false),
        });

        let workers = (0..threads)
            .map(|_| {
                let worker_shared = Arc::clone(&shared);
                thread::spawn(move || Self::worker_loop(&worker_shared))
            })
            .collect();

        tracing::debug!(threads, "job scheduler started");
        Self {
            shared,
            accepting: RwLock::new(true),
            workers: Mutex::new(workers),
        }
    }

    /// Starts `config.worker_threads` workers.
    #[must_use]
    pub fn from_config(config: &EcsConfig) -> Self {
        Self::new(config.worker_threads)
    }

    /// Worker thread main loop.
    fn worker_loop(shared: &Shared) {
        let high = &shared.queue(Priority::High).receiver;
        let low = &shared.queue(Priority::Low).receiver;

        loop {
            if let Ok(job) = high.try_recv() {
                shared.run(Priority::High, job);
                continue;
            }
            if let Ok(job) = low.try_recv() {
                shared.run(Priority::Low, job);
                continue;
            }
            // Both queues are empty here, so stopping drops nothing.
            if shared.stop.load(Ordering::Acquire) {
                break;
            }
            if let Ok(job) = high.recv_timeout(IDLE_WAIT) {
                shared.run(Priority::High, job);
            }
        }
    }

    /// Queues a job.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::SchedulerStopped`] after [`shutdown`](Self::shutdown).
    pub fn submit<F>(&self, priority: Priority, job: F) -> EcsResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let accepting = self.accepting.read();
        if !*accepting {
            return Err(EcsError::SchedulerStopped);
        }

        let queue = self.shared.queue(priority);
        queue.pending.fetch_add(1, Ordering::AcqRel);
        if queue.sender.send(Box::new(job)).is_err() {
            queue.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(EcsError::SchedulerStopped);
        }
        Ok(())
    }

    /// Jobs of `priority` submitted and not yet finished.
    #[must_use]
    pub fn pending(&self, priority: Priority) -> usize {
        self.shared.queue(priority).pending.load(Ordering::Acquire)
    }

    /// Spins, yielding the thread, until every job of `priority` has run.
    pub fn wait_for(&self, priority: Priority) {
        while self.pending(priority) > 0 {
            thread::yield_now();
        }
    }

    /// Number of running worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Signals the workers to stop once both queues are empty and joins them.
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        *self.accepting.write() = false;
        self.shared.stop.store(true, Ordering::Release);

        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        let count = workers.len();
        for handle in workers {
            let _ = handle.join();
        }
        tracing::debug!(threads = count, "job scheduler stopped");
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
