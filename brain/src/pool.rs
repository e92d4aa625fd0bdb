//! Fixed worker pool for CPU-bound jobs.
//!
//! Planning and frame processing run here so the cooperative coordination
//! loop never stalls on heavy math. Jobs take value snapshots and hand the
//! result back over a oneshot channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use tokio::sync::oneshot;
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Job>>,
    available: Condvar,
    shutdown: AtomicBool,
}

/// Fixed-size pool of OS worker threads with a shared job queue.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<Shared>,
}

impl Pool {
    pub fn new(size: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        for index in 0..size {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name(format!("pool-worker-{index}"))
                .spawn(move || worker_loop(&shared))
                .expect("failed to spawn pool worker");
        }

        Self { shared }
    }

    /// Run a job on the pool and await its result. Returns `None` only if
    /// the pool shut down before the job ran.
    pub async fn run<T, F>(&self, job: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move || {
            let _ = tx.send(job());
        }));
        rx.await.ok()
    }

    fn submit(&self, job: Job) {
        self.shared.queue.lock().expect("pool queue poisoned").push_back(job);
        self.shared.available.notify_one();
    }

    /// Ask the workers to exit once the queue drains.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.available.notify_all();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock().expect("pool queue poisoned");
            loop {
                if let Some(job) = queue.pop_front() {
                    break job;
                }
                if shared.shutdown.load(Ordering::SeqCst) {
                    debug!("pool worker exiting");
                    return;
                }
                queue = shared.available.wait(queue).expect("pool queue poisoned");
            }
        };
        job();
    }
}
