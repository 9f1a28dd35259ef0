use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::errors::TaskError;

/// Work handed to a worker thread: the submitted closure with its return
/// value erased so heterogeneous tasks can share one queue.
pub(crate) type BoxedBody = Box<dyn FnOnce() -> Box<dyn Any + Send> + Send>;

/// Erased result handler; receives the boxed value produced by the body.
pub(crate) type BoxedHandler = Box<dyn FnOnce(Box<dyn Any + Send>) + Send>;

/// Unique identifier of a task within one process.
///
/// `queue` is an explicit id of the owning [`TaskQueue`](crate::TaskQueue)
/// instance, `seq` a per-queue monotonic counter. Opaque to callers beyond
/// `Ord`/`Display`; the `Display` form is intended for debugging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskKey {
    queue: u64,
    seq: u64,
}

impl TaskKey {
    pub(crate) fn new(queue: u64, seq: u64) -> Self {
        Self { queue, seq }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.queue, self.seq)
    }
}

/// Lifecycle states of a task.
///
/// Status only moves forward through the transition graph; a task never
/// revisits an earlier non-terminal state. `RunningCallback` and
/// `CallbackComplete` are reached only when a result handler was attached
/// at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskStatus {
    /// Constructed, not yet visible in the registry.
    Created = 0,
    /// Visible in the registry and queued for a worker.
    Registered = 1,
    /// A worker thread is running the body.
    Executing = 2,
    /// The body returned and no cancel had been observed at that point.
    Executed = 3,
    /// Cancellation requested; resolved to `Cancelled` or overridden by
    /// `Failed` at finalization.
    Cancelling = 4,
    /// Success: the body's value was accepted at finalization.
    ExecutionDone = 5,
    /// The result handler is running (or scheduled on a dispatcher).
    RunningCallback = 6,
    /// The result handler finished.
    CallbackComplete = 7,
    /// Aborted before start, or the result was discarded by a late cancel.
    Cancelled = 8,
    /// The body panicked.
    Failed = 9,
}

impl TaskStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskStatus::Created,
            1 => TaskStatus::Registered,
            2 => TaskStatus::Executing,
            3 => TaskStatus::Executed,
            4 => TaskStatus::Cancelling,
            5 => TaskStatus::ExecutionDone,
            6 => TaskStatus::RunningCallback,
            7 => TaskStatus::CallbackComplete,
            8 => TaskStatus::Cancelled,
            9 => TaskStatus::Failed,
            _ => unreachable!("invalid task status discriminant"),
        }
    }

    /// True in the terminal states: success, failure or cancellation.
    /// `RunningCallback` is not terminal; the handler is still running (or
    /// queued on a dispatcher).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::ExecutionDone
                | TaskStatus::CallbackComplete
                | TaskStatus::Cancelled
                | TaskStatus::Failed
        )
    }

    /// Outcome decided; nothing a cancel could still affect.
    fn is_settled(self) -> bool {
        self.is_terminal() || matches!(self, TaskStatus::RunningCallback)
    }
}

/// Atomic status cell. All transitions are compare-and-exchange on a
/// specific `(from, to)` pair so concurrent mutators (worker, canceller,
/// finalizer) resolve races deterministically instead of losing updates.
struct StatusCell(AtomicU8);

impl StatusCell {
    fn new() -> Self {
        Self(AtomicU8::new(TaskStatus::Created as u8))
    }

    fn load(&self) -> TaskStatus {
        TaskStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    fn advance(&self, from: TaskStatus, to: TaskStatus) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct TaskInner {
    key: TaskKey,
    status: StatusCell,
    abort_requested: AtomicBool,
    handler: Mutex<Option<BoxedHandler>>,
    result: Mutex<Option<Box<dyn Any + Send>>>,
    failure: Mutex<Option<TaskError>>,
}

/// Handle on one submitted unit of work.
///
/// Cheap to clone; all clones observe the same lifecycle record. The record
/// is mutated only by the owning worker, the finalization path and
/// [`cancel`](crate::TaskQueue::cancel), never by the submitter directly.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

fn lock<'a, T>(m: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Task {
    pub(crate) fn new(key: TaskKey, handler: Option<BoxedHandler>) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                key,
                status: StatusCell::new(),
                abort_requested: AtomicBool::new(false),
                handler: Mutex::new(handler),
                result: Mutex::new(None),
                failure: Mutex::new(None),
            }),
        }
    }

    pub fn key(&self) -> TaskKey {
        self.inner.key
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.status.load()
    }

    /// Whether a cancel was ever requested, independent of how the race
    /// against completion resolved.
    pub fn abort_requested(&self) -> bool {
        self.inner.abort_requested.load(Ordering::Acquire)
    }

    /// The captured error, once the task has reached `Failed`.
    pub fn failure(&self) -> Option<TaskError> {
        lock(&self.inner.failure).clone()
    }

    /// Takes the produced value out of the record. Present only after a
    /// successful finalization of a task submitted without a result handler
    /// (a handler consumes the value instead); `None` on a type mismatch or
    /// second call.
    pub fn take_result<T: Send + 'static>(&self) -> Option<T> {
        let boxed = lock(&self.inner.result).take()?;
        match boxed.downcast::<T>() {
            Ok(v) => Some(*v),
            Err(other) => {
                *lock(&self.inner.result) = Some(other);
                None
            }
        }
    }

    pub(crate) fn advance(&self, from: TaskStatus, to: TaskStatus) -> bool {
        self.inner.status.advance(from, to)
    }

    pub(crate) fn mark_registered(&self) {
        self.advance(TaskStatus::Created, TaskStatus::Registered);
    }

    /// Worker-side claim. Fails when a cancel got there first, in which
    /// case the body must not run.
    pub(crate) fn begin_execute(&self) -> bool {
        self.advance(TaskStatus::Registered, TaskStatus::Executing)
    }

    /// Marks the body as having returned. Left unchanged when a concurrent
    /// cancel already moved the status to `Cancelling`; the finalizer
    /// resolves that race.
    pub(crate) fn finish_execute(&self) {
        self.advance(TaskStatus::Executing, TaskStatus::Executed);
    }

    /// Cancellation entry point. Returns `true` only when the task had not
    /// been claimed by a worker yet (a confirmed pre-start cancel); `false`
    /// otherwise, including for already-finalized tasks (no-op).
    pub(crate) fn request_cancel(&self) -> bool {
        // A finalized task is immutable; statuses never regress, so a
        // check before the flag store is enough.
        if self.status().is_settled() {
            return false;
        }
        self.inner.abort_requested.store(true, Ordering::Release);
        if self.advance(TaskStatus::Registered, TaskStatus::Cancelling) {
            return true;
        }
        // Already running, or already executed but not yet finalized; in
        // both cases the eventual result is discarded at finalization.
        let _ = self.advance(TaskStatus::Executing, TaskStatus::Cancelling)
            || self.advance(TaskStatus::Executed, TaskStatus::Cancelling);
        false
    }

    pub(crate) fn store_result(&self, value: Box<dyn Any + Send>) {
        *lock(&self.inner.result) = Some(value);
    }

    pub(crate) fn take_handler(&self) -> Option<BoxedHandler> {
        lock(&self.inner.handler).take()
    }

    pub(crate) fn record_failure(&self, err: TaskError) {
        *lock(&self.inner.failure) = Some(err);
        // A raise wins even over a pending cancel.
        let _ = self.advance(TaskStatus::Executing, TaskStatus::Failed)
            || self.advance(TaskStatus::Cancelling, TaskStatus::Failed)
            || self.advance(TaskStatus::Registered, TaskStatus::Failed);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("key", &self.inner.key)
            .field("status", &self.status())
            .finish()
    }
}
