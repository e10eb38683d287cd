//! Scheduler capability: a single synchronous context plus a worker pool.
//!
//! Host state is only ever mutated on the synchronous context. File scans
//! and hashing run on the async side and hop back with [`Scheduler::run_sync`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// One-shot job.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Job run on every tick of a repeating task.
pub type RepeatingJob = Arc<dyn Fn() + Send + Sync + 'static>;

pub trait Scheduler: Send + Sync {
    /// Run `job` once on the worker pool.
    fn run_async(&self, job: Job);

    /// Run `job` once on the synchronous context.
    fn run_sync(&self, job: Job);

    /// Run `job` on the synchronous context after `delay`, then every `period`.
    fn run_sync_repeating(&self, job: RepeatingJob, delay: Duration, period: Duration)
    -> TaskHandle;

    /// Run `job` on the worker pool after `delay`, then every `period`.
    ///
    /// Ticks of one task never overlap.
    fn run_async_repeating(
        &self,
        job: RepeatingJob,
        delay: Duration,
        period: Duration,
    ) -> TaskHandle;

    /// Whether the calling thread is the synchronous context.
    fn is_sync_context(&self) -> bool {
        false
    }
}

struct TaskState {
    cancelled: AtomicBool,
    on_cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// Cancellation handle for a repeating task.
#[derive(Clone)]
pub struct TaskHandle {
    state: Arc<TaskState>,
}

impl TaskHandle {
    /// Handle that runs `on_cancel` the first time it is cancelled.
    pub fn new(on_cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            state: Arc::new(TaskState {
                cancelled: AtomicBool::new(false),
                on_cancel: Mutex::new(Some(Box::new(on_cancel))),
            }),
        }
    }

    /// Handle with nothing to abort; the task polls [`TaskHandle::is_cancelled`].
    pub fn detached() -> Self {
        Self {
            state: Arc::new(TaskState {
                cancelled: AtomicBool::new(false),
                on_cancel: Mutex::new(None),
            }),
        }
    }

    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(on_cancel) = self.state.on_cancel.lock().take() {
            on_cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_cancel_runs_hook_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handle = TaskHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let clone = handle.clone();

        assert!(!handle.is_cancelled());
        handle.cancel();
        clone.cancel();
        assert!(clone.is_cancelled());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
