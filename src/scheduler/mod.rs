//! Worker/main-thread scheduling
//!
//! Two execution domains: the main thread, which owns all tile state above
//! `ContentLoading`, and a worker pool for fetching and parsing. Workers
//! communicate back by sending typed completion values over a `TaskQueue`;
//! the main thread drains a bounded number of completions per frame.

use std::sync::Mutex;

use tokio::runtime::Runtime;
use tokio::sync::mpsc;

enum Mode {
    /// Tasks run on a tokio blocking pool
    Pool(Runtime),
    /// Tasks run inline on the caller's thread. A single worker is a valid
    /// implementation, and a deterministic one for tests.
    Immediate,
}

/// Executes worker tasks
pub struct Scheduler {
    mode: Mode,
}

impl Scheduler {
    /// Create a scheduler backed by a multi-threaded runtime
    pub fn new() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("tilestream-worker")
            .build()
            .expect("Failed to create tokio runtime");
        Self {
            mode: Mode::Pool(runtime),
        }
    }

    /// Create a scheduler that runs every task inline, synchronously
    pub fn immediate() -> Self {
        Self {
            mode: Mode::Immediate,
        }
    }

    /// Run a task in the worker domain
    ///
    /// The task may block on I/O. Results must be reported through a
    /// `TaskQueue`, never by touching shared tile state.
    pub fn spawn_worker<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.mode {
            Mode::Pool(runtime) => {
                runtime.spawn_blocking(task);
            }
            Mode::Immediate => task(),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// A typed completion channel from worker tasks to the main thread
///
/// Senders are cheap to clone into tasks; the main thread drains results
/// with a per-frame bound so one frame never stalls on a flood of
/// completions.
pub struct TaskQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: Mutex<mpsc::UnboundedReceiver<T>>,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// A sender handle for a worker task
    pub fn sender(&self) -> TaskSender<T> {
        TaskSender {
            tx: self.tx.clone(),
        }
    }

    /// Drain up to `max` completed results (non-blocking)
    pub fn drain(&self, max: usize) -> Vec<T> {
        let mut rx = self.rx.lock().unwrap();
        let mut results = Vec::new();
        while results.len() < max {
            match rx.try_recv() {
                Ok(value) => results.push(value),
                Err(_) => break,
            }
        }
        results
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable sending half of a `TaskQueue`
pub struct TaskSender<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> TaskSender<T> {
    /// Send a completion to the main thread. Quietly drops the value if the
    /// receiver is gone (the owner was destroyed mid-load).
    pub fn send(&self, value: T) {
        let _ = self.tx.send(value);
    }
}

impl<T> Clone for TaskSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}
