//! Optional fixed-size worker pool (§5, §9).
//!
//! Adapted from the donor's `runtime/async/worker.rs` + `work_stealing.rs`:
//! same injector/local-deque/sibling-stealing skeleton and `Parker`-based
//! idle wait, but jobs are one-shot closures rather than polled `Future`
//! tasks — a submitted job runs to completion and is gone, there is nothing
//! to re-poll.
//!
//! Per the worker/registry boundary this spec fixes (§5): a submitted `Job`
//! performs only the handler call and the reply write(s). It never touches
//! the registry directly. Instead it reports a [`WorkerOutcome`] back over
//! an MPSC channel, which the loop thread drains once per
//! `wait_and_dispatch` cycle and uses to apply the corresponding
//! insert/erase.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_deque::{Injector, Steal, Stealer, Worker as CbWorker};
use parking::{Parker, Unparker};

use crate::client::ClientInfo;
use crate::handler::BroadcastFilter;

/// A unit of work submitted to the pool: the descriptor it belongs to (so
/// the loop thread can track "at most one in-flight job per descriptor"),
/// and the closure to run. A job performs its own read, handler call, and
/// reply write — only registry mutation is left to the loop thread (§5).
pub struct Job {
    pub fd: RawFd,
    pub run: Box<dyn FnOnce() -> WorkerOutcome + Send>,
}

/// What the loop thread should apply to the registry once a job completes.
pub enum WorkerOutcome {
    /// The job read and dispatched successfully. `updated_client` replaces
    /// the registry's copy (the worker operated on a snapshot); if
    /// `broadcast_filter` is set, the loop thread fans `reply` out to the
    /// other live peers that pass it.
    Applied {
        fd: RawFd,
        updated_client: ClientInfo,
        reply: Vec<u8>,
        keepalive: bool,
        broadcast_filter: Option<BroadcastFilter>,
    },
    /// EOF, a fatal I/O error, or a write failure: tear the connection down.
    Disconnect { fd: RawFd },
    /// Nothing to apply (e.g. the read was a would-block race). Still
    /// carries `fd` so the loop thread can clear it from its in-flight set.
    NoOp { fd: RawFd },
}

struct WorkerHandle {
    thread: Option<JoinHandle<()>>,
    unparker: Unparker,
}

/// A fixed-size pool of worker threads sharing a work-stealing queue.
pub struct WorkerPool {
    injector: Arc<Injector<Job>>,
    workers: Vec<WorkerHandle>,
    shutdown: Arc<AtomicBool>,
    outcomes: Receiver<WorkerOutcome>,
}

impl WorkerPool {
    /// Spawns `num_workers` threads. `num_workers` must be > 0; `Server`
    /// only constructs a pool when `ServerConfig::thread_size > 0`.
    pub fn new(num_workers: usize) -> Self {
        assert!(num_workers > 0, "worker pool requires at least one thread");

        let injector = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let (outcome_tx, outcome_rx) = mpsc::channel();

        let locals: Vec<CbWorker<Job>> = (0..num_workers).map(|_| CbWorker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = locals.iter().map(|w| w.stealer()).collect();
        let parker_pairs: Vec<(Parker, Unparker)> = (0..num_workers).map(|_| parking::pair()).collect();

        let mut workers = Vec::with_capacity(num_workers);
        for (index, (local, (parker, unparker))) in
            locals.into_iter().zip(parker_pairs.into_iter()).enumerate()
        {
            let sibling_stealers: Vec<Stealer<Job>> = stealers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, s)| s.clone())
                .collect();

            let runner = Worker {
                local,
                stealers: sibling_stealers,
                injector: injector.clone(),
                shutdown: shutdown.clone(),
                parker,
                outcomes: outcome_tx.clone(),
            };

            let thread = thread::Builder::new()
                .name(format!("evcore-worker-{index}"))
                .spawn(move || runner.run())
                .expect("failed to spawn worker thread");

            workers.push(WorkerHandle {
                thread: Some(thread),
                unparker,
            });
        }

        Self {
            injector,
            workers,
            shutdown,
            outcomes: outcome_rx,
        }
    }

    /// Submits a job and wakes a worker to pick it up.
    pub fn submit(&self, job: Job) {
        self.injector.push(job);
        for handle in &self.workers {
            handle.unparker.unpark();
        }
    }

    /// Drains every outcome posted since the last drain, without blocking.
    pub fn drain_outcomes(&self) -> Vec<WorkerOutcome> {
        self.outcomes.try_iter().collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in &self.workers {
            handle.unparker.unpark();
        }
        for handle in &mut self.workers {
            if let Some(thread) = handle.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

struct Worker {
    local: CbWorker<Job>,
    stealers: Vec<Stealer<Job>>,
    injector: Arc<Injector<Job>>,
    shutdown: Arc<AtomicBool>,
    parker: Parker,
    outcomes: Sender<WorkerOutcome>,
}

impl Worker {
    fn run(&self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.find_job() {
                Some(job) => self.execute(job),
                None => {
                    self.parker.park_timeout(Duration::from_millis(5));
                }
            }
        }
        self.drain();
    }

    fn find_job(&self) -> Option<Job> {
        if let Some(job) = self.local.pop() {
            return Some(job);
        }
        loop {
            match self.injector.steal_batch_and_pop(&self.local) {
                Steal::Success(job) => return Some(job),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
        for stealer in &self.stealers {
            loop {
                match stealer.steal() {
                    Steal::Success(job) => return Some(job),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }

    fn execute(&self, job: Job) {
        let outcome = (job.run)();
        let _ = self.outcomes.send(outcome);
    }

    fn drain(&self) {
        while let Some(job) = self.local.pop() {
            self.execute(job);
        }
        loop {
            match self.injector.steal() {
                Steal::Success(job) => self.execute(job),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    #[test]
    fn submitted_jobs_report_outcomes() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for fd in 0..10 {
            let counter = counter.clone();
            pool.submit(Job {
                fd,
                run: Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    WorkerOutcome::NoOp { fd }
                }),
            });
        }

        std::thread::sleep(StdDuration::from_millis(200));
        let outcomes = pool.drain_outcomes();
        assert_eq!(outcomes.len(), 10);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
