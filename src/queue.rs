use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::dispatch::Dispatch;
use crate::errors::TaskError;
use crate::pool::{panic_message, Envelope, Finalizer, Outcome, WorkerPool};
use crate::registry::Registry;
use crate::task::{BoxedBody, BoxedHandler, Task, TaskKey, TaskStatus};

/// Queue sizing.
#[derive(Debug, Clone)]
pub struct Config {
    pub max_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { max_workers: 1 }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self {
            max_workers: num_cpus::get(),
        }
    }

    pub fn io_bound() -> Self {
        Self {
            max_workers: num_cpus::get() * 2,
        }
    }
}

type CompletionRelay = Arc<dyn Fn(Task) + Send + Sync>;

/// State shared between the queue handle and the worker threads.
struct Shared {
    registry: Registry,
    relay: Option<CompletionRelay>,
    dispatcher: Option<Arc<dyn Dispatch>>,
    queue_id: u64,
    seq: AtomicU64,
}

/// The task-execution queue.
///
/// Submissions never block on execution; bodies run on a fixed set of
/// worker threads ([`Config::max_workers`], default 1) and results are
/// delivered to the per-task handler afterwards. Cancellation is
/// cooperative: a running body is never interrupted, a cancel only decides
/// whether its result is delivered. All operations are callable
/// concurrently from any thread.
pub struct TaskQueue {
    shared: Arc<Shared>,
    pool: WorkerPool,
}

pub struct Builder {
    config: Config,
    relay: Option<CompletionRelay>,
    dispatcher: Option<Arc<dyn Dispatch>>,
}

impl Builder {
    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n;
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Completion relay: invoked exactly once per task, at finalization,
    /// with the finalized task, regardless of outcome. The only push-style
    /// "a task ended" signal the queue emits.
    pub fn on_completion<F>(mut self, relay: F) -> Self
    where
        F: Fn(Task) + Send + Sync + 'static,
    {
        self.relay = Some(Arc::new(relay));
        self
    }

    /// Routes result handlers and the completion relay through `dispatcher`
    /// instead of running them on worker threads. See [`Dispatch`].
    pub fn dispatcher<D>(mut self, dispatcher: D) -> Self
    where
        D: Dispatch + 'static,
    {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    pub fn build(self) -> TaskQueue {
        static QUEUE_IDS: AtomicU64 = AtomicU64::new(0);

        let shared = Arc::new(Shared {
            registry: Registry::new(),
            relay: self.relay,
            dispatcher: self.dispatcher,
            queue_id: QUEUE_IDS.fetch_add(1, Ordering::Relaxed),
            seq: AtomicU64::new(0),
        });
        let finalize: Finalizer = {
            let shared = Arc::clone(&shared);
            Arc::new(move |task, outcome| shared.finalize(task, outcome))
        };
        let pool = WorkerPool::new(self.config.max_workers, finalize);
        TaskQueue { shared, pool }
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn with_config(config: Config) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> Builder {
        Builder {
            config: Config::default(),
            relay: None,
            dispatcher: None,
        }
    }

    /// Submits a body whose value, if any, stays on the task record
    /// (see [`Task::take_result`]).
    pub fn submit<T, F>(&self, body: F) -> Task
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let body: BoxedBody = Box::new(move || Box::new(body()) as Box<dyn Any + Send>);
        self.submit_erased(body, None)
    }

    /// Submits a body plus a result handler. The handler runs at most once,
    /// only on successful, non-cancelled completion, and consumes the
    /// produced value.
    pub fn submit_with<T, F, H>(&self, body: F, on_result: H) -> Task
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        H: FnOnce(T) + Send + 'static,
    {
        let body: BoxedBody = Box::new(move || Box::new(body()) as Box<dyn Any + Send>);
        let handler: BoxedHandler = Box::new(move |value| {
            // Body and handler were paired on T at submission, so the
            // downcast cannot fail.
            if let Ok(value) = value.downcast::<T>() {
                on_result(*value);
            }
        });
        self.submit_erased(body, Some(handler))
    }

    fn submit_erased(&self, body: BoxedBody, handler: Option<BoxedHandler>) -> Task {
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        let key = TaskKey::new(self.shared.queue_id, seq);
        let task = Task::new(key, handler);

        // Mark registered before insert: once the handle is visible in the
        // registry a concurrent cancel must find a status it can claim.
        // Register before dispatch: a worker must never pick up a task
        // that is not yet visible in the registry.
        task.mark_registered();
        self.shared.registry.insert(task.clone());
        debug!(%key, "task submitted");

        let envelope = Envelope {
            task: task.clone(),
            body,
        };
        if let Err(envelope) = self.pool.dispatch(envelope) {
            self.shared
                .finalize(envelope.task, Outcome::Error(TaskError::QueueClosed));
        }
        task
    }

    /// Best-effort cooperative cancel. Returns `true` only when the task
    /// had not started executing (the body will never run); `false`
    /// otherwise, including for unknown or already-finalized tasks. A
    /// cancel that lands after the body finished but before finalization
    /// still wins: the computed result is silently discarded and the task
    /// ends `Cancelled`. Deliberate policy inherited from the cooperative
    /// model: nothing is ever forcibly interrupted.
    pub fn cancel(&self, task: &Task) -> bool {
        let pre_start = task.request_cancel();
        debug!(key = %task.key(), pre_start, "cancel requested");
        pre_start
    }

    /// Cancels every registered task, ascending by key. Works on a
    /// snapshot so the registry lock is not held across cancellation.
    /// Each task eventually reaches a terminal state; no ordering between
    /// them is promised.
    pub fn cancel_all(&self) {
        for task in self.shared.registry.snapshot() {
            self.cancel(&task);
        }
    }

    /// Number of tasks submitted but not yet finalized.
    pub fn in_flight(&self) -> usize {
        self.shared.registry.len()
    }

    /// Key-ascending, call-time-consistent copy of the registered tasks.
    pub fn snapshot(&self) -> Vec<Task> {
        self.shared.registry.snapshot()
    }

    pub fn find(&self, key: TaskKey) -> Option<Task> {
        self.shared.registry.get(key)
    }

    /// Blocks until no task remains in the registry.
    pub fn wait_idle(&self) {
        self.shared.registry.wait_empty();
    }

    /// Like [`wait_idle`](Self::wait_idle) with a deadline; `false` on
    /// timeout.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        self.shared.registry.wait_empty_timeout(timeout)
    }

    /// Drains queued work and joins the worker threads. Dropping the queue
    /// does the same.
    pub fn shutdown(mut self) {
        self.pool.shutdown();
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    /// Resolves the outcome against any concurrent cancel, removes the task
    /// from the registry and notifies the completion relay. Runs exactly
    /// once per task, on the worker that pulled its envelope.
    fn finalize(&self, task: Task, outcome: Outcome) {
        match outcome {
            Outcome::AbortedBeforeStart => {
                task.advance(TaskStatus::Cancelling, TaskStatus::Cancelled);
                debug!(key = %task.key(), "cancelled before start");
            }
            Outcome::Error(err) => {
                debug!(key = %task.key(), %err, "task failed");
                task.record_failure(err);
            }
            Outcome::Value(value) => {
                // The CAS decides the cancellation race at this moment, not
                // at the moment the body finished.
                if task.advance(TaskStatus::Executed, TaskStatus::ExecutionDone) {
                    match task.take_handler() {
                        Some(handler) => {
                            task.advance(TaskStatus::ExecutionDone, TaskStatus::RunningCallback);
                            let done = task.clone();
                            self.run_external(move || {
                                let call = AssertUnwindSafe(|| handler(value));
                                if let Err(payload) = panic::catch_unwind(call) {
                                    warn!(
                                        key = %done.key(),
                                        "result handler panicked: {}",
                                        panic_message(payload)
                                    );
                                }
                                done.advance(
                                    TaskStatus::RunningCallback,
                                    TaskStatus::CallbackComplete,
                                );
                            });
                        }
                        None => task.store_result(value),
                    }
                } else {
                    task.advance(TaskStatus::Cancelling, TaskStatus::Cancelled);
                    debug!(key = %task.key(), "late cancel won; computed result discarded");
                }
            }
        }

        self.registry.remove(task.key());

        if let Some(relay) = &self.relay {
            let relay = Arc::clone(relay);
            self.run_external(move || {
                let key = task.key();
                let call = AssertUnwindSafe(|| relay(task));
                if let Err(payload) = panic::catch_unwind(call) {
                    warn!(%key, "completion relay panicked: {}", panic_message(payload));
                }
            });
        }
    }

    /// Runs caller-facing code inline on the worker, or hands it to the
    /// configured dispatcher.
    fn run_external(&self, job: impl FnOnce() + Send + 'static) {
        match &self.dispatcher {
            Some(dispatcher) => dispatcher.dispatch(Box::new(job)),
            None => job(),
        }
    }
}
