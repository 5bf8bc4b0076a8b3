//! Dedicated worker threads.
//!
//! A [`WorkerThread`] is a named OS thread running a current-thread tokio
//! runtime inside a `LocalSet`. Tasks posted to it run one at a time, in
//! the order they were posted, on that thread only. Because the runtime is
//! local to the thread, tasks may `spawn_local` futures that hold `!Send`
//! state (sockets, codec contexts) without that state ever leaving the
//! thread.
//!
//! # Lifecycle
//!
//! 1. `WorkerThread::spawn` builds the runtime, starts the OS thread and
//!    returns a cloneable handle
//! 2. The dispatch loop runs until `shutdown()` is called or every handle
//!    is dropped
//! 3. On natural exit the thread keeps driving its local tasks until they
//!    complete, so confined instances are always dropped on this thread
//!
//! The [`WorkerThreadRegistry`] owns the process-wide network and media
//! workers.

mod registry;

pub use registry::{
    WorkerThreadRegistry, DEFAULT_MEDIA_THREAD_NAME, DEFAULT_NETWORK_THREAD_NAME,
};

use crate::errors::SessionError;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::ThreadId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A unit of work posted to a worker thread.
type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a dedicated worker thread.
///
/// Cloning the handle is cheap; all clones refer to the same thread.
#[derive(Clone)]
pub struct WorkerThread {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    name: String,
    thread_id: ThreadId,
    sender: mpsc::UnboundedSender<Task>,
    cancel_token: CancellationToken,
}

impl fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.inner.name)
            .field("thread_id", &self.inner.thread_id)
            .field("stopped", &self.inner.sender.is_closed())
            .finish()
    }
}

impl WorkerThread {
    /// Start a new named worker thread.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WorkerSpawn` if the runtime or the OS thread
    /// cannot be created.
    pub fn spawn(name: impl Into<String>) -> Result<Self, SessionError> {
        let name = name.into();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SessionError::WorkerSpawn(format!("{name}: runtime: {e}")))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();

        let thread_name = name.clone();
        let thread_token = cancel_token.clone();
        let join_handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(&thread_name, &runtime, receiver, &thread_token))
            .map_err(|e| SessionError::WorkerSpawn(format!("{name}: {e}")))?;

        let thread_id = join_handle.thread().id();

        info!(
            target: "call.worker",
            thread = %name,
            "Worker thread started"
        );

        Ok(Self {
            inner: Arc::new(WorkerInner {
                name,
                thread_id,
                sender,
                cancel_token,
            }),
        })
    }

    /// The thread's diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The OS thread identity.
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.inner.thread_id
    }

    /// Whether the calling code is running on this worker thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.inner.thread_id
    }

    /// Whether the worker has stopped accepting tasks.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.sender.is_closed()
    }

    /// Schedule `task` to run on this thread.
    ///
    /// Never blocks and never runs `task` inline, even when called from the
    /// worker itself: the task is queued behind everything posted earlier.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WorkerUnavailable` if the worker has stopped.
    pub fn post<F>(&self, task: F) -> Result<(), SessionError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner
            .sender
            .send(Box::new(task))
            .map_err(|_| SessionError::WorkerUnavailable(self.inner.name.clone()))
    }

    /// Run `f` on this thread and wait for its result.
    ///
    /// Intended for callers outside the worker (tests, the binary's main
    /// task). Awaiting this from the worker itself would never complete.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WorkerUnavailable` if the worker has stopped
    /// before running `f`.
    pub async fn invoke<F, R>(&self, f: F) -> Result<R, SessionError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.post(move || {
            let _ = tx.send(f());
        })?;

        rx.await
            .map_err(|_| SessionError::WorkerUnavailable(self.inner.name.clone()))
    }

    /// Stop the dispatch loop. Tasks not yet started are discarded.
    pub fn shutdown(&self) {
        debug!(
            target: "call.worker",
            thread = %self.inner.name,
            "Worker thread shutdown requested"
        );
        self.inner.cancel_token.cancel();
    }
}

/// Worker thread body: dispatch posted tasks inside a `LocalSet`.
fn run_worker(
    name: &str,
    runtime: &tokio::runtime::Runtime,
    mut receiver: mpsc::UnboundedReceiver<Task>,
    cancel_token: &CancellationToken,
) {
    let local = LocalSet::new();
    let mut tasks_run: u64 = 0;

    let cancelled = local.block_on(runtime, async {
        loop {
            tokio::select! {
                biased;

                () = cancel_token.cancelled() => {
                    break true;
                }

                task = receiver.recv() => {
                    match task {
                        Some(task) => {
                            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                                error!(
                                    target: "call.worker",
                                    thread = %name,
                                    "Posted task panicked; worker continues"
                                );
                            }
                            tasks_run += 1;
                        }
                        None => break false,
                    }
                }
            }
        }
    });

    // Every handle is gone: let confined instances finish draining here.
    if !cancelled {
        runtime.block_on(local);
    }

    info!(
        target: "call.worker",
        thread = %name,
        tasks_run = tasks_run,
        cancelled = cancelled,
        "Worker thread stopped"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_worker_thread_is_named_and_distinct() {
        let worker = WorkerThread::spawn("test-worker-name").unwrap();

        let name = worker
            .invoke(|| std::thread::current().name().map(str::to_string))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("test-worker-name"));
        assert_eq!(worker.name(), "test-worker-name");
        assert!(!worker.is_current());

        let checker = worker.clone();
        let on_worker = worker.invoke(move || checker.is_current()).await.unwrap();
        assert!(on_worker);

        worker.shutdown();
    }

    #[tokio::test]
    async fn test_post_runs_tasks_in_order() {
        let worker = WorkerThread::spawn("test-worker-order").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..100 {
            let tx = tx.clone();
            worker.post(move || tx.send(i).unwrap()).unwrap();
        }

        for expected in 0..100 {
            let got = timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, expected);
        }

        worker.shutdown();
    }

    #[tokio::test]
    async fn test_post_from_worker_is_deferred() {
        let worker = WorkerThread::spawn("test-worker-defer").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let inner_worker = worker.clone();
        worker
            .post(move || {
                let inner_tx = tx.clone();
                inner_worker
                    .post(move || inner_tx.send("nested").unwrap())
                    .unwrap();
                tx.send("outer").unwrap();
            })
            .unwrap();

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first, Some("outer"));
        assert_eq!(second, Some("nested"));

        worker.shutdown();
    }

    #[tokio::test]
    async fn test_spawn_local_is_available_to_tasks() {
        let worker = WorkerThread::spawn("test-worker-local").unwrap();
        let (tx, rx) = oneshot::channel();

        worker
            .post(move || {
                // Rc is !Send; this only compiles because the future stays
                // on the worker thread.
                let state = std::rc::Rc::new(41);
                tokio::task::spawn_local(async move {
                    tokio::task::yield_now().await;
                    let _ = tx.send(*state + 1);
                });
            })
            .unwrap();

        let value = timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
        assert_eq!(value, 42);

        worker.shutdown();
    }

    #[tokio::test]
    async fn test_post_after_shutdown_fails() {
        let worker = WorkerThread::spawn("test-worker-stop").unwrap();
        worker.shutdown();

        // The dispatch loop observes cancellation asynchronously.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while !worker.is_stopped() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(worker.is_stopped());

        let result = worker.post(|| {});
        assert!(matches!(result, Err(SessionError::WorkerUnavailable(name)) if name == "test-worker-stop"));

        let result = worker.invoke(|| 1).await;
        assert!(matches!(result, Err(SessionError::WorkerUnavailable(_))));
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_worker() {
        let worker = WorkerThread::spawn("test-worker-panic").unwrap();

        worker.post(|| panic!("task failure")).unwrap();

        let value = timeout(Duration::from_secs(1), worker.invoke(|| 7))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, 7);
        assert!(!worker.is_stopped());

        worker.shutdown();
    }

    #[test]
    fn test_debug_output() {
        let worker = WorkerThread::spawn("test-worker-debug").unwrap();
        let debug = format!("{worker:?}");
        assert!(debug.contains("test-worker-debug"));
        worker.shutdown();
    }
}
