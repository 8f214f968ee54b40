//! Bounded pool of background threads for store and file work.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, error, info};

/// Persisted `performance` setting controlling how many workers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceTier {
    /// One worker per available core.
    Maximum,
    /// Half of the cores, never fewer than two.
    Balanced,
    /// A single worker.
    Minimal,
}

impl PerformanceTier {
    /// Parses the stored setting; anything other than 1 or 2 is `Minimal`.
    pub fn from_setting(raw: &str) -> Self {
        match raw.trim().parse::<i64>() {
            Ok(1) => Self::Maximum,
            Ok(2) => Self::Balanced,
            _ => Self::Minimal,
        }
    }

    pub fn as_setting(self) -> i64 {
        match self {
            Self::Maximum => 1,
            Self::Balanced => 2,
            Self::Minimal => 3,
        }
    }

    /// Worker count for this tier given the detected core count.
    pub fn worker_count(self, available_cores: Option<usize>) -> usize {
        let Some(cores) = available_cores.filter(|cores| *cores > 0) else {
            return 2;
        };
        match self {
            Self::Maximum => cores,
            Self::Balanced => (cores / 2).max(2),
            Self::Minimal => 1,
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool. Jobs run to completion in submission order per worker; a
/// panicking job is logged and does not take its worker down.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let receiver = Arc::clone(&receiver);
            let spawned = thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn(move || worker_loop(receiver));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => error!("Failed to spawn worker {}: {}", index, err),
            }
        }
        info!("Worker pool started with {} workers", workers.len());

        Self {
            sender: Some(sender),
            workers,
        }
    }

    pub fn for_tier(tier: PerformanceTier) -> Self {
        let cores = thread::available_parallelism().ok().map(|count| count.get());
        Self::new(tier.worker_count(cores))
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queues `job`. Returns false when the pool has shut down.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return false;
        };
        if sender.send(Box::new(job)).is_err() {
            error!("Worker pool is gone; job dropped");
            return false;
        }
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let next = {
            let guard = receiver
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.recv()
        };
        let Ok(job) = next else {
            debug!("Worker exiting");
            return;
        };
        if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
            error!(
                "Worker job panicked: {}",
                crate::panic_payload_to_string(payload.as_ref())
            );
        }
    }
}
