//! Tokio-backed scheduler.
//!
//! The synchronous context is a dedicated `modman-sync` thread draining a
//! job channel; every host mutation runs there. Async work runs on the
//! tokio blocking pool, and repeating tasks are driven by
//! [`tokio::time::interval`].

use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use modman_kernel::{Job, RepeatingJob, Scheduler, TaskHandle};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, warn};

const SYNC_THREAD_NAME: &str = "modman-sync";

const MIN_PERIOD: Duration = Duration::from_millis(1);

pub struct TokioScheduler {
    handle: Handle,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    sync_thread: Mutex<Option<JoinHandle<()>>>,
    sync_thread_id: ThreadId,
}

impl TokioScheduler {
    /// Start the synchronous context. Async work is spawned on `handle`.
    pub fn new(handle: Handle) -> io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let thread = thread::Builder::new()
            .name(SYNC_THREAD_NAME.to_string())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                        error!("Sync job panicked: {}", panic_message(payload.as_ref()));
                    }
                }
                debug!("Sync context stopped");
            })?;
        let sync_thread_id = thread.thread().id();
        Ok(Self {
            handle,
            sender: Mutex::new(Some(sender)),
            sync_thread: Mutex::new(Some(thread)),
            sync_thread_id,
        })
    }

    /// Start on the runtime the caller is running in.
    pub fn current() -> io::Result<Self> {
        let handle = Handle::try_current().map_err(io::Error::other)?;
        Self::new(handle)
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Job>> {
        self.sender.lock().clone()
    }

    /// Run `job` on the synchronous context and wait for its result.
    ///
    /// Runs inline when already on the synchronous context. Must not be
    /// called from inside an async task. Returns `None` if the context is
    /// stopped or the job panicked.
    pub fn run_sync_and_wait<R: Send + 'static>(
        &self,
        job: impl FnOnce() -> R + Send + 'static,
    ) -> Option<R> {
        if self.is_sync_context() {
            return Some(job());
        }
        let (tx, rx) = oneshot::channel();
        let sender = self.sender()?;
        sender
            .send(Box::new(move || {
                let _ = tx.send(job());
            }))
            .ok()?;
        rx.blocking_recv().ok()
    }

    /// Stop accepting sync jobs and wait for queued ones to finish.
    ///
    /// Repeating tasks must be cancelled first or their pending ticks keep
    /// the context alive.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let Some(thread) = self.sync_thread.lock().take() else {
            return;
        };
        if thread::current().id() == self.sync_thread_id {
            return;
        }
        if thread.join().is_err() {
            warn!("Sync context exited abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }
}

impl Scheduler for TokioScheduler {
    fn run_async(&self, job: Job) {
        self.handle.spawn_blocking(job);
    }

    fn run_sync(&self, job: Job) {
        match self.sender() {
            Some(sender) => {
                if sender.send(job).is_err() {
                    warn!("Sync context stopped, job dropped");
                }
            }
            None => warn!("Sync context stopped, job dropped"),
        }
    }

    fn run_sync_repeating(
        &self,
        job: RepeatingJob,
        delay: Duration,
        period: Duration,
    ) -> TaskHandle {
        let Some(sender) = self.sender() else {
            warn!("Sync context stopped, repeating job not scheduled");
            return TaskHandle::detached();
        };
        let period = period.max(MIN_PERIOD);
        let task = self.handle.spawn(async move {
            let mut ticks = interval_at(Instant::now() + delay, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                let job = job.clone();
                if sender.send(Box::new(move || job())).is_err() {
                    break;
                }
            }
        });
        let abort = task.abort_handle();
        TaskHandle::new(move || abort.abort())
    }

    fn run_async_repeating(
        &self,
        job: RepeatingJob,
        delay: Duration,
        period: Duration,
    ) -> TaskHandle {
        let period = period.max(MIN_PERIOD);
        let task = self.handle.spawn(async move {
            let mut ticks = interval_at(Instant::now() + delay, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                let job = job.clone();
                // Awaiting keeps ticks of one task from overlapping.
                if let Err(e) = tokio::task::spawn_blocking(move || job()).await {
                    if e.is_panic() {
                        error!("Repeating job panicked: {e}");
                    }
                }
            }
        });
        let abort = task.abort_handle();
        TaskHandle::new(move || abort.abort())
    }

    fn is_sync_context(&self) -> bool {
        thread::current().id() == self.sync_thread_id
    }
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("running", &self.is_running())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sync_jobs_run_on_sync_thread() {
        let scheduler = Arc::new(TokioScheduler::current().unwrap());
        let (tx, rx) = oneshot::channel();
        let probe = scheduler.clone();
        scheduler.run_sync(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            let _ = tx.send((name, probe.is_sync_context()));
        }));

        let (name, on_sync) = rx.await.unwrap();
        assert_eq!(name.as_deref(), Some(SYNC_THREAD_NAME));
        assert!(on_sync);
        assert!(!scheduler.is_sync_context());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_sync_job_does_not_stop_context() {
        let scheduler = TokioScheduler::current().unwrap();
        scheduler.run_sync(Box::new(|| panic!("boom")));
        let (tx, rx) = oneshot::channel();
        scheduler.run_sync(Box::new(move || {
            let _ = tx.send(42);
        }));
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_repeating_async_job_until_cancelled() {
        let scheduler = TokioScheduler::current().unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = scheduler.run_async_repeating(
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::ZERO,
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, saw {seen}");

        tokio::time::sleep(Duration::from_millis(50)).await;
        let after = ticks.load(Ordering::SeqCst);
        assert!(after <= seen + 1);
        assert!(handle.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_repeating_sync_job_hops_to_sync_thread() {
        let scheduler = TokioScheduler::current().unwrap();
        let names = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = names.clone();
        let handle = scheduler.run_sync_repeating(
            Arc::new(move || {
                seen.lock()
                    .push(thread::current().name().map(str::to_string));
            }),
            Duration::from_millis(5),
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.cancel();
        let names = names.lock();
        assert!(!names.is_empty());
        assert!(names.iter().all(|n| n.as_deref() == Some(SYNC_THREAD_NAME)));
    }

    #[test]
    fn test_run_sync_and_wait_and_shutdown() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let scheduler = TokioScheduler::new(runtime.handle().clone()).unwrap();

        assert_eq!(scheduler.run_sync_and_wait(|| 6 * 7), Some(42));

        scheduler.shutdown();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.run_sync_and_wait(|| 1), None);
        scheduler.run_sync(Box::new(|| {}));
    }
}
