//! Bounded worker-thread task queue with cooperative cancellation
//!
//! # Features
//! - Non-blocking submission with a live task handle per unit of work
//! - Fixed-size OS thread pool with FIFO dispatch (default: one worker)
//! - Race-free task lifecycle driven by atomic compare-and-exchange
//! - Cooperative best-effort cancel: running bodies are never interrupted,
//!   a late cancel discards the computed result instead
//! - Panic capture in task bodies; handler panics isolated per task
//! - Completion relay fired once per task, whatever the outcome
//! - Pluggable dispatcher for delivering results onto a single-threaded
//!   consumer loop (GUI main loop, actor mailbox, ...)

pub mod dispatch;
pub mod errors;
pub mod queue;
pub mod task;

mod pool;
mod registry;

pub use dispatch::{Dispatch, DispatchJob, LoopDispatcher, LoopPump};
pub use errors::TaskError;
pub use queue::{Builder, Config, TaskQueue};
pub use task::{Task, TaskKey, TaskStatus};
