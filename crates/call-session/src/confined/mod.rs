//! Thread-confined cells.
//!
//! A [`ConfinedCell<T>`] owns one instance of `T` that lives on a single
//! [`WorkerThread`]. The instance is constructed on that thread, every
//! job submitted through the cell runs there with `&mut T`, and the
//! instance is dropped there. Nothing else ever touches it, so `T` does
//! not need to be `Send` or `Sync`.
//!
//! # Guarantees
//!
//! - Construction happens-before the first job
//! - Jobs submitted through the same cell run one at a time, in the order
//!   their `perform` calls returned
//! - `perform` is a pure enqueue: it never blocks and never runs the job
//!   inline, including when called from the owning thread
//!
//! # Teardown
//!
//! Dropping the cell releases the only strong sender. The worker keeps
//! running jobs already queued, then drops the instance on its own thread
//! (drain-then-destroy). Dropping never waits on the worker, so a cell may
//! be dropped from its own thread.
//!
//! A [`WeakCell<T>`] can submit jobs without keeping the cell alive. Once
//! the cell is dropped its `perform` is a silent no-op.
//!
//! Jobs that can never run (the cell was never built, or its worker
//! stopped first) are discarded when the queue goes away and counted as
//! such, so the mailbox depth always returns to zero.

mod mailbox;

pub use mailbox::{MailboxLevel, MailboxMonitor, MAILBOX_NORMAL, MAILBOX_WARNING};

use crate::errors::SessionError;
use crate::observability::metrics;
use crate::worker::WorkerThread;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, trace};

/// A job scheduled against a confined instance.
pub type Job<T> = Box<dyn FnOnce(&mut T) + Send + 'static>;

/// Owning handle to an instance of `T` confined to one worker thread.
pub struct ConfinedCell<T> {
    thread: WorkerThread,
    sender: mpsc::UnboundedSender<Job<T>>,
    /// Queue waiting for `build`; `None` once the cell loop owns it.
    pending: Mutex<Option<JobQueue<T>>>,
    mailbox: Arc<MailboxMonitor>,
}

impl<T: 'static> ConfinedCell<T> {
    /// Create a cell and schedule construction of its instance on `thread`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WorkerUnavailable` if `thread` has stopped.
    pub fn new<F>(thread: WorkerThread, label: &'static str, factory: F) -> Result<Self, SessionError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let cell = Self::unbuilt(thread, label);
        cell.build(factory)?;
        Ok(cell)
    }

    /// Create a cell without an instance.
    ///
    /// Jobs may be submitted immediately; they queue until [`build`] has
    /// constructed the instance.
    ///
    /// [`build`]: ConfinedCell::build
    #[must_use]
    pub fn unbuilt(thread: WorkerThread, label: &'static str) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mailbox = Arc::new(MailboxMonitor::new(label));

        Self {
            thread,
            sender,
            pending: Mutex::new(Some(JobQueue {
                receiver,
                mailbox: Arc::clone(&mailbox),
            })),
            mailbox,
        }
    }

    /// Schedule construction of the instance on the cell's thread.
    ///
    /// Returns as soon as construction is queued; `factory` runs later, on
    /// the worker.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::CellAlreadyBuilt` on a second call and
    /// `SessionError::WorkerUnavailable` if the thread has stopped.
    pub fn build<F>(&self, factory: F) -> Result<(), SessionError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let queue = self
            .pending
            .lock()
            .map_err(|e| SessionError::Internal(format!("cell lock poisoned: {e}")))?
            .take()
            .ok_or(SessionError::CellAlreadyBuilt(self.mailbox.label()))?;

        self.thread.post(move || {
            tokio::task::spawn_local(run_cell(factory, queue));
        })?;

        debug!(
            target: "call.cell",
            cell = self.mailbox.label(),
            thread = %self.thread.name(),
            "Confined instance construction scheduled"
        );

        Ok(())
    }

    /// Schedule `job` to run against the instance on the cell's thread.
    ///
    /// Callable from any thread. Fire-and-forget: if the job produces
    /// something, it must deliver it itself.
    pub fn perform<F>(&self, job: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        enqueue(&self.sender, &self.mailbox, Box::new(job));
    }

    /// A non-owning handle for submitting jobs from callbacks.
    #[must_use]
    pub fn downgrade(&self) -> WeakCell<T> {
        WeakCell {
            sender: self.sender.downgrade(),
            mailbox: Arc::clone(&self.mailbox),
        }
    }

    /// Whether construction has been scheduled.
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.pending
            .lock()
            .map(|pending| pending.is_none())
            .unwrap_or(false)
    }

    /// The thread the instance is confined to.
    #[must_use]
    pub fn thread(&self) -> &WorkerThread {
        &self.thread
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.mailbox.label()
    }

    /// Job accounting for this cell.
    #[must_use]
    pub fn mailbox(&self) -> &MailboxMonitor {
        &self.mailbox
    }
}

impl<T> fmt::Debug for ConfinedCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfinedCell")
            .field("label", &self.mailbox.label())
            .field("thread", &self.thread.name())
            .field("pending_jobs", &self.mailbox.current_depth())
            .finish()
    }
}

/// Non-owning handle to a [`ConfinedCell`].
pub struct WeakCell<T> {
    sender: mpsc::WeakUnboundedSender<Job<T>>,
    mailbox: Arc<MailboxMonitor>,
}

impl<T> Clone for WeakCell<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

impl<T> fmt::Debug for WeakCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakCell")
            .field("label", &self.mailbox.label())
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl<T> WeakCell<T> {
    /// Whether the owning cell still exists.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.sender.strong_count() > 0
    }
}

impl<T: 'static> WeakCell<T> {
    /// Schedule `job` if the cell still exists.
    ///
    /// Returns `false`, without running or queueing `job`, once the owning
    /// cell has been dropped.
    pub fn perform<F>(&self, job: F) -> bool
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        match self.sender.upgrade() {
            Some(sender) => enqueue(&sender, &self.mailbox, Box::new(job)),
            None => {
                self.mailbox.record_rejected();
                trace!(
                    target: "call.cell",
                    cell = self.mailbox.label(),
                    "Cell gone; job dropped"
                );
                false
            }
        }
    }
}

/// Receiving end of a cell's queue.
///
/// Jobs still queued when it is dropped without being run are discarded
/// and counted.
struct JobQueue<T> {
    receiver: mpsc::UnboundedReceiver<Job<T>>,
    mailbox: Arc<MailboxMonitor>,
}

impl<T> Drop for JobQueue<T> {
    fn drop(&mut self) {
        // Close first so no sender can slip a job in behind the drain.
        self.receiver.close();
        let mut leftover = 0usize;
        while self.receiver.try_recv().is_ok() {
            self.mailbox.record_discard();
            leftover += 1;
        }
        if leftover > 0 {
            debug!(
                target: "call.cell",
                cell = self.mailbox.label(),
                leftover = leftover,
                "Cell queue dropped; unrun jobs discarded"
            );
        }
    }
}

/// Queue `job`, keeping the mailbox count consistent with the worker side.
fn enqueue<T>(sender: &mpsc::UnboundedSender<Job<T>>, mailbox: &MailboxMonitor, job: Job<T>) -> bool {
    mailbox.record_enqueue();
    if sender.send(job).is_err() {
        // The cell loop is gone (worker stopped); nothing will run it.
        mailbox.record_discard();
        debug!(
            target: "call.cell",
            cell = mailbox.label(),
            "Cell loop not running; job discarded"
        );
        return false;
    }
    true
}

/// Cell loop: construct the instance, run jobs until every strong sender
/// is dropped and the queue is empty, then drop the instance here.
#[instrument(skip_all, name = "call.cell", fields(cell = queue.mailbox.label()))]
async fn run_cell<T, F>(factory: F, mut queue: JobQueue<T>)
where
    F: FnOnce() -> T,
{
    let mailbox = Arc::clone(&queue.mailbox);
    let label = mailbox.label();

    let Ok(mut instance) = panic::catch_unwind(AssertUnwindSafe(factory)) else {
        error!(
            target: "call.cell",
            cell = label,
            "Confined instance construction panicked; cell is inert"
        );
        metrics::record_cell_panic(label);

        while queue.receiver.recv().await.is_some() {
            mailbox.record_discard();
        }
        return;
    };

    debug!(
        target: "call.cell",
        cell = label,
        "Confined instance constructed"
    );

    while let Some(job) = queue.receiver.recv().await {
        mailbox.record_dequeue();

        if panic::catch_unwind(AssertUnwindSafe(|| job(&mut instance))).is_err() {
            error!(
                target: "call.cell",
                cell = label,
                "Confined job panicked; instance kept"
            );
            metrics::record_cell_panic(label);
        }
        metrics::record_cell_job(label);
    }

    drop(instance);

    debug!(
        target: "call.cell",
        cell = label,
        jobs_processed = mailbox.processed(),
        "Confined instance destroyed"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    async fn next<E>(rx: &mut mpsc::UnboundedReceiver<E>) -> E {
        timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    fn current_thread_name() -> String {
        std::thread::current().name().unwrap_or("unnamed").to_string()
    }

    /// Instance that reports its construction, jobs and drop.
    struct Probe {
        events: mpsc::UnboundedSender<String>,
        seen: Vec<u32>,
    }

    impl Probe {
        fn new(events: mpsc::UnboundedSender<String>) -> Self {
            let _ = events.send(format!("built on {}", current_thread_name()));
            Self {
                events,
                seen: Vec::new(),
            }
        }
    }

    impl Drop for Probe {
        fn drop(&mut self) {
            let _ = self
                .events
                .send(format!("dropped on {} after {}", current_thread_name(), self.seen.len()));
        }
    }

    #[tokio::test]
    async fn test_construction_precedes_jobs_on_target_thread() {
        let worker = WorkerThread::spawn("test-cell-build").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let events = tx.clone();
        let cell = ConfinedCell::new(worker.clone(), "probe", move || Probe::new(events)).unwrap();
        cell.perform(|probe: &mut Probe| {
            let _ = probe.events.send(format!("job on {}", current_thread_name()));
        });

        assert_eq!(next(&mut rx).await, "built on test-cell-build");
        assert_eq!(next(&mut rx).await, "job on test-cell-build");

        drop(cell);
        assert_eq!(next(&mut rx).await, "dropped on test-cell-build after 0");

        worker.shutdown();
    }

    #[tokio::test]
    async fn test_jobs_submitted_before_build_run_after_construction() {
        let worker = WorkerThread::spawn("test-cell-early").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let cell: ConfinedCell<Probe> = ConfinedCell::unbuilt(worker.clone(), "probe");
        assert!(!cell.is_built());

        cell.perform(|probe: &mut Probe| {
            let _ = probe.events.send("early job".to_string());
        });
        assert_eq!(cell.mailbox().current_depth(), 1);

        let events = tx.clone();
        cell.build(move || Probe::new(events)).unwrap();
        assert!(cell.is_built());

        assert_eq!(next(&mut rx).await, "built on test-cell-early");
        assert_eq!(next(&mut rx).await, "early job");

        drop(cell);
        worker.shutdown();
    }

    #[tokio::test]
    async fn test_build_twice_is_rejected() {
        let worker = WorkerThread::spawn("test-cell-twice").unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let events = tx.clone();
        let cell = ConfinedCell::new(worker.clone(), "probe", move || Probe::new(events)).unwrap();

        let result = cell.build(move || Probe::new(tx));
        assert!(matches!(result, Err(SessionError::CellAlreadyBuilt("probe"))));

        drop(cell);
        worker.shutdown();
    }

    #[tokio::test]
    async fn test_submission_order_is_preserved_per_thread() {
        let worker = WorkerThread::spawn("test-cell-order").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<(usize, u32)>>();

        let cell = Arc::new(
            ConfinedCell::new(worker.clone(), "order", Vec::<(usize, u32)>::new).unwrap(),
        );

        let submitters: Vec<_> = (0..4)
            .map(|thread_idx| {
                let cell = Arc::clone(&cell);
                std::thread::spawn(move || {
                    for seq in 0..250 {
                        cell.perform(move |log: &mut Vec<(usize, u32)>| log.push((thread_idx, seq)));
                    }
                })
            })
            .collect();
        for submitter in submitters {
            submitter.join().unwrap();
        }

        cell.perform(move |log: &mut Vec<(usize, u32)>| {
            let _ = tx.send(std::mem::take(log));
        });

        let log = next(&mut rx).await;
        assert_eq!(log.len(), 1000);
        for thread_idx in 0..4 {
            let seqs: Vec<u32> = log
                .iter()
                .filter(|(t, _)| *t == thread_idx)
                .map(|(_, s)| *s)
                .collect();
            assert_eq!(seqs, (0..250).collect::<Vec<_>>());
        }

        drop(cell);
        worker.shutdown();
    }

    #[tokio::test]
    async fn test_jobs_never_overlap() {
        let worker = WorkerThread::spawn("test-cell-overlap").unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let cell = Arc::new(ConfinedCell::new(worker.clone(), "overlap", || 0u32).unwrap());

        let submitters: Vec<_> = (0..3)
            .map(|_| {
                let cell = Arc::clone(&cell);
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        let active = Arc::clone(&active);
                        let max_active = Arc::clone(&max_active);
                        cell.perform(move |count: &mut u32| {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            max_active.fetch_max(now, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_micros(200));
                            *count += 1;
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for submitter in submitters {
            submitter.join().unwrap();
        }

        cell.perform(move |count: &mut u32| {
            let _ = tx.send(*count);
        });

        assert_eq!(next(&mut rx).await, 60);
        assert_eq!(max_active.load(Ordering::SeqCst), 1);

        drop(cell);
        worker.shutdown();
    }

    #[tokio::test]
    async fn test_perform_from_owning_thread_is_deferred() {
        let worker = WorkerThread::spawn("test-cell-reentrant").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let cell = ConfinedCell::new(worker.clone(), "reentrant", Vec::<&'static str>::new).unwrap();
        let weak = cell.downgrade();

        cell.perform(move |log: &mut Vec<&'static str>| {
            log.push("outer start");
            weak.perform(move |log: &mut Vec<&'static str>| {
                log.push("nested");
                let _ = tx.send(log.clone());
            });
            log.push("outer end");
        });

        assert_eq!(next(&mut rx).await, vec!["outer start", "outer end", "nested"]);

        drop(cell);
        worker.shutdown();
    }

    #[tokio::test]
    async fn test_drop_drains_pending_jobs_then_destroys_on_target_thread() {
        let worker = WorkerThread::spawn("test-cell-drain").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let events = tx.clone();
        let cell = ConfinedCell::new(worker.clone(), "drain", move || Probe::new(events)).unwrap();
        for seq in 0..50 {
            cell.perform(move |probe: &mut Probe| probe.seen.push(seq));
        }
        drop(cell);

        assert_eq!(next(&mut rx).await, "built on test-cell-drain");
        assert_eq!(next(&mut rx).await, "dropped on test-cell-drain after 50");

        worker.shutdown();
    }

    #[tokio::test]
    async fn test_weak_perform_after_drop_is_noop() {
        let worker = WorkerThread::spawn("test-cell-weak").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let events = tx.clone();
        let cell = ConfinedCell::new(worker.clone(), "weak", move || Probe::new(events)).unwrap();
        let weak = cell.downgrade();
        assert!(weak.is_alive());

        assert!(weak.perform(|probe: &mut Probe| {
            let _ = probe.events.send("while alive".to_string());
        }));

        drop(cell);
        assert!(!weak.is_alive());
        assert!(!weak.perform(|probe: &mut Probe| {
            let _ = probe.events.send("after drop".to_string());
        }));

        assert_eq!(next(&mut rx).await, "built on test-cell-weak");
        assert_eq!(next(&mut rx).await, "while alive");
        assert_eq!(next(&mut rx).await, "dropped on test-cell-weak after 0");

        // Nothing else arrives.
        drop(tx);
        assert!(timeout(WAIT, rx.recv()).await.unwrap().is_none());

        worker.shutdown();
    }

    #[tokio::test]
    async fn test_cell_dropped_on_its_own_thread_does_not_block() {
        let worker = WorkerThread::spawn("test-cell-self-drop").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let events = tx.clone();
        let cell = ConfinedCell::new(worker.clone(), "self-drop", move || Probe::new(events)).unwrap();
        cell.perform(|probe: &mut Probe| probe.seen.push(1));

        worker
            .invoke(move || {
                let _ = tx.send("dropped".to_string());
                drop(cell);
            })
            .await
            .unwrap();

        let mut events = Vec::new();
        for _ in 0..3 {
            events.push(next(&mut rx).await);
        }
        assert!(events.contains(&"built on test-cell-self-drop".to_string()));
        assert!(events.contains(&"dropped".to_string()));
        assert_eq!(
            events.last().map(String::as_str),
            Some("dropped on test-cell-self-drop after 1")
        );

        worker.shutdown();
    }

    #[tokio::test]
    async fn test_unbuilt_cell_drop_discards_queued_jobs() {
        let worker = WorkerThread::spawn("test-cell-unbuilt-drop").unwrap();

        let cell: ConfinedCell<u32> = ConfinedCell::unbuilt(worker.clone(), "unbuilt");
        for _ in 0..3 {
            cell.perform(|value: &mut u32| *value += 1);
        }
        let weak = cell.downgrade();
        assert_eq!(weak.mailbox.current_depth(), 3);

        drop(cell);

        assert_eq!(weak.mailbox.current_depth(), 0);
        assert_eq!(weak.mailbox.discarded(), 3);
        assert_eq!(weak.mailbox.processed(), 0);
        assert!(!weak.perform(|value: &mut u32| *value += 1));
        assert_eq!(weak.mailbox.current_depth(), 0);

        worker.shutdown();
    }

    #[tokio::test]
    async fn test_worker_shutdown_discards_queued_jobs() {
        let worker = WorkerThread::spawn("test-cell-worker-stop").unwrap();
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();

        // Hold the worker so the cell loop is still queued behind this task.
        worker
            .post(move || {
                let _ = started_tx.send(());
                let _ = gate_rx.recv();
            })
            .unwrap();
        next(&mut started_rx).await;

        let cell = ConfinedCell::new(worker.clone(), "worker-stop", || 0u32).unwrap();
        for _ in 0..4 {
            cell.perform(|value: &mut u32| *value += 1);
        }
        assert_eq!(cell.mailbox().current_depth(), 4);

        worker.shutdown();
        gate_tx.send(()).unwrap();

        let deadline = tokio::time::Instant::now() + WAIT;
        while cell.mailbox().current_depth() != 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cell.mailbox().current_depth(), 0);
        assert_eq!(cell.mailbox().discarded(), 4);
        assert_eq!(cell.mailbox().processed(), 0);
        assert!(format!("{cell:?}").contains("pending_jobs: 0"));
    }

    #[tokio::test]
    async fn test_weak_cell_debug_reports_liveness() {
        let worker = WorkerThread::spawn("test-cell-weak-debug").unwrap();
        let cell = ConfinedCell::new(worker.clone(), "weak-debug", || 0u32).unwrap();
        let weak = cell.downgrade();
        assert!(format!("{weak:?}").contains("alive: true"));

        drop(cell);
        assert!(format!("{weak:?}").contains("alive: false"));

        worker.shutdown();
    }

    #[tokio::test]
    async fn test_panicking_job_is_contained() {
        let worker = WorkerThread::spawn("test-cell-panic").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let cell = ConfinedCell::new(worker.clone(), "panic", || 10u32).unwrap();
        cell.perform(|_value: &mut u32| panic!("job failure"));
        cell.perform(move |value: &mut u32| {
            let _ = tx.send(*value + 1);
        });

        assert_eq!(next(&mut rx).await, 11);

        drop(cell);
        worker.shutdown();
    }

    #[tokio::test]
    async fn test_panicking_factory_leaves_cell_inert() {
        let worker = WorkerThread::spawn("test-cell-bad-factory").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();

        let cell: ConfinedCell<u32> =
            ConfinedCell::new(worker.clone(), "bad-factory", || panic!("factory failure")).unwrap();
        cell.perform(move |value: &mut u32| {
            let _ = tx.send(*value);
        });

        // The job is discarded and its sender dropped with it.
        assert!(timeout(WAIT, rx.recv()).await.unwrap().is_none());
        let deadline = tokio::time::Instant::now() + WAIT;
        while cell.mailbox().discarded() == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cell.mailbox().discarded(), 1);
        assert_eq!(cell.mailbox().processed(), 0);

        drop(cell);
        worker.shutdown();
    }
}
