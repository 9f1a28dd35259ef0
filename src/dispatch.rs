use crossbeam::channel::{Receiver, Sender};

/// A deferred callable scheduled onto a consumer context.
pub type DispatchJob = Box<dyn FnOnce() + Send>;

/// Capability to run a callable later on a designated consumer thread,
/// typically a single-threaded event loop that must never be blocked.
///
/// When a [`TaskQueue`](crate::TaskQueue) is built with a dispatcher, result
/// handlers and the completion relay are scheduled through it instead of
/// running on the worker thread. Without one they run inline on the worker,
/// which is fine for thread-agnostic callers.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, job: DispatchJob);
}

/// Channel-backed [`Dispatch`] implementation for consumers that drive
/// their own loop: workers push jobs, the loop thread drains them with a
/// [`LoopPump`]. The moral equivalent of a GUI toolkit's idle-add hook.
#[derive(Clone)]
pub struct LoopDispatcher {
    tx: Sender<DispatchJob>,
}

/// Consumer half of a [`LoopDispatcher`]; owned by the loop thread.
pub struct LoopPump {
    rx: Receiver<DispatchJob>,
}

impl LoopDispatcher {
    pub fn new() -> (LoopDispatcher, LoopPump) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (LoopDispatcher { tx }, LoopPump { rx })
    }
}

impl Dispatch for LoopDispatcher {
    fn dispatch(&self, job: DispatchJob) {
        // Fails only when the pump is gone; the job is dropped, matching an
        // event loop that has already exited.
        let _ = self.tx.send(job);
    }
}

impl LoopPump {
    /// Runs every job queued at this instant. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Runs jobs until every [`LoopDispatcher`] clone has been dropped.
    pub fn run(&self) {
        while let Ok(job) = self.rx.recv() {
            job();
        }
    }
}
