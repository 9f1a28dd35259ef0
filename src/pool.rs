use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{Receiver, Sender};
use tracing::trace;

use crate::errors::TaskError;
use crate::task::{BoxedBody, Task};

/// What a worker hands back to the finalizer, exactly once per envelope.
pub(crate) enum Outcome {
    /// The body returned normally; carries the erased value.
    Value(Box<dyn Any + Send>),
    /// The body panicked.
    Error(TaskError),
    /// A cancel claimed the task before any worker did; the body never ran.
    AbortedBeforeStart,
}

pub(crate) struct Envelope {
    pub task: Task,
    pub body: BoxedBody,
}

pub(crate) type Finalizer = Arc<dyn Fn(Task, Outcome) + Send + Sync>;

/// Fixed-size set of OS worker threads pulling envelopes from a shared FIFO
/// channel. The channel is unbounded: excess submissions queue, they are
/// never rejected. At most one worker ever runs a given task's body.
pub(crate) struct WorkerPool {
    tx: Option<Sender<Envelope>>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize, finalize: Finalizer) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = crossbeam::channel::unbounded::<Envelope>();

        let threads = (0..workers)
            .map(|i| {
                let rx = rx.clone();
                let finalize = Arc::clone(&finalize);
                thread::Builder::new()
                    .name(format!("taskqueue-worker-{i}"))
                    .spawn(move || worker_loop(rx, finalize))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            tx: Some(tx),
            threads,
        }
    }

    /// FIFO hand-off to the workers. Fails only after shutdown, returning
    /// the envelope to the caller.
    pub fn dispatch(&self, envelope: Envelope) -> Result<(), Envelope> {
        match &self.tx {
            Some(tx) => tx.send(envelope).map_err(|e| e.0),
            None => Err(envelope),
        }
    }

    /// Closes the channel and joins the workers. Envelopes already queued
    /// still execute; the threads exit once the channel drains.
    pub fn shutdown(&mut self) {
        self.tx.take();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Receiver<Envelope>, finalize: Finalizer) {
    // recv errors only once the channel is disconnected and drained.
    while let Ok(Envelope { task, body }) = rx.recv() {
        let outcome = run_one(&task, body);
        finalize(task, outcome);
    }
}

fn run_one(task: &Task, body: BoxedBody) -> Outcome {
    if !task.begin_execute() {
        return Outcome::AbortedBeforeStart;
    }
    trace!(key = %task.key(), "executing task body");
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => {
            task.finish_execute();
            Outcome::Value(value)
        }
        Err(payload) => Outcome::Error(TaskError::Panicked(panic_message(payload))),
    }
}

/// Extracts the conventional string payload from a panic, verbatim.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
