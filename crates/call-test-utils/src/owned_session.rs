//! Sessions driven from test code but owned by a worker thread.

use call_session::errors::SessionError;
use call_session::session::{ActorProvider, EncryptionKey, SessionCoordinator, SessionObservers};
use call_session::worker::{WorkerThread, WorkerThreadRegistry};
use std::ops::Deref;
use std::sync::Arc;

/// A session created, started and destroyed on its owner thread.
///
/// The coordinator must be dropped on its owner; dropping an
/// `OwnedSession` (including during a failing test's unwind) posts the
/// final release there instead of running it on the test thread.
pub struct OwnedSession<P: ActorProvider> {
    owner: WorkerThread,
    session: Option<Arc<SessionCoordinator<P>>>,
}

impl<P: ActorProvider> OwnedSession<P> {
    /// Construct a session on `owner`.
    ///
    /// # Errors
    ///
    /// Returns whatever `SessionCoordinator::new` returns.
    pub async fn create(
        owner: &WorkerThread,
        registry: &Arc<WorkerThreadRegistry>,
        provider: Arc<P>,
        encryption_key: EncryptionKey,
        enable_p2p: bool,
        observers: SessionObservers,
    ) -> Result<Self, SessionError> {
        let owner_handle = owner.clone();
        let registry = Arc::clone(registry);

        let session = owner
            .invoke(move || {
                SessionCoordinator::new(
                    owner_handle,
                    &registry,
                    provider,
                    encryption_key,
                    enable_p2p,
                    observers,
                )
            })
            .await??;

        Ok(Self {
            owner: owner.clone(),
            session: Some(session),
        })
    }

    /// Start the session on its owner thread.
    ///
    /// # Errors
    ///
    /// Returns whatever `SessionCoordinator::start` returns.
    pub async fn start(&self) -> Result<(), SessionError> {
        let session = Arc::clone(self.session());
        self.owner
            .invoke(move || {
                let result = session.start();
                drop(session);
                result
            })
            .await?
    }

    /// The coordinator.
    ///
    /// # Panics
    ///
    /// Never in practice: the session is only taken by `destroy` and `drop`.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionCoordinator<P>> {
        self.session.as_ref().expect("session already destroyed")
    }

    /// Release the coordinator on its owner thread and wait until done.
    ///
    /// # Panics
    ///
    /// Panics if the owner thread has stopped.
    pub async fn destroy(mut self) {
        if let Some(session) = self.session.take() {
            self.owner
                .invoke(move || drop(session))
                .await
                .expect("owner thread should be running");
        }
    }
}

impl<P: ActorProvider> Deref for OwnedSession<P> {
    type Target = SessionCoordinator<P>;

    fn deref(&self) -> &Self::Target {
        self.session()
    }
}

impl<P: ActorProvider> Drop for OwnedSession<P> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = self.owner.post(move || drop(session));
        }
    }
}
