//! Callbacks bound to a serial execution context.
//!
//! # Design
//! A `Handler<T>` pairs a callback with the `GroupQueue` it must run on.
//! Firing never calls the callback directly: it enqueues a job on the bound
//! queue, so the thread that observed the network event is decoupled from the
//! thread running application code, and deliveries for one queue stay ordered.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Sender};
use tracing::{trace, warn};

use crate::http::{TaskIdentifier, TransportResponse};

/// A unit of work submitted to a `GroupQueue`.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A serial execution context.
///
/// Implementations must run jobs one at a time in submission order and must
/// not run a job on the thread calling `perform`: requests enqueue while
/// holding their internal lock.
pub trait GroupQueue: Send + Sync {
    fn perform(&self, job: Job);

    fn name(&self) -> &str;
}

/// `GroupQueue` backed by a single named worker thread.
#[derive(Clone)]
pub struct SerialQueue {
    name: Arc<str>,
    sender: Sender<Job>,
}

impl SerialQueue {
    /// Spawn the worker thread. The worker exits once every handle is dropped
    /// and the queue is drained.
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = channel::unbounded::<Job>();
        let worker_name = name.to_string();
        thread::Builder::new().name(name.to_string()).spawn(move || {
            // A panicking callback must not take the rest of the queue with it.
            for job in receiver {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!(queue = %worker_name, "queued job panicked");
                }
            }
        })?;
        Ok(Self {
            name: Arc::from(name),
            sender,
        })
    }

    /// Convenience for the common `Arc<dyn GroupQueue>` form.
    pub fn shared(name: &str) -> std::io::Result<Arc<dyn GroupQueue>> {
        Ok(Arc::new(Self::new(name)?))
    }

    /// Block until every job enqueued before this call has run.
    ///
    /// Must not be called from a job running on this queue.
    pub fn sync(&self) {
        let (done, wait) = channel::bounded::<()>(1);
        self.perform(Box::new(move || {
            let _ = done.send(());
        }));
        let _ = wait.recv();
    }
}

impl GroupQueue for SerialQueue {
    fn perform(&self, job: Job) {
        if self.sender.send(job).is_err() {
            warn!(queue = %self.name, "serial queue worker is gone, dropping job");
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue").field("name", &self.name).finish()
    }
}

/// A callback together with the queue it runs on.
pub struct Handler<T> {
    queue: Arc<dyn GroupQueue>,
    block: Arc<dyn Fn(T) + Send + Sync>,
}

pub type TaskCreatedHandler = Handler<TaskIdentifier>;
pub type ProgressHandler = Handler<f32>;
pub type CompletionHandler = Handler<TransportResponse>;

impl<T: Send + 'static> Handler<T> {
    pub fn on_group_queue(
        queue: Arc<dyn GroupQueue>,
        block: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            queue,
            block: Arc::new(block),
        }
    }

    pub fn group_queue(&self) -> &Arc<dyn GroupQueue> {
        &self.queue
    }

    /// Enqueue the callback with `payload` on the bound queue.
    pub(crate) fn dispatch(&self, payload: T) {
        trace!(queue = self.queue.name(), "dispatching handler");
        let block = Arc::clone(&self.block);
        self.queue.perform(Box::new(move || block(payload)));
    }
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            block: Arc::clone(&self.block),
        }
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("queue", &self.queue.name())
            .finish_non_exhaustive()
    }
}

/// Clamp a progress value into `[0.0, 1.0]`; NaN becomes 0.0.
pub fn clamp_progress(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
