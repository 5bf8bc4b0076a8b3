//! Process-scoped network and media worker threads.
//!
//! Exactly one thread per role, created on first use and reused by every
//! session for the lifetime of the registry. The process-wide instance
//! returned by [`WorkerThreadRegistry::global`] is never dropped, so its
//! threads live as long as the process.

use super::WorkerThread;
use crate::errors::SessionError;

use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

/// Default name of the network worker thread.
pub const DEFAULT_NETWORK_THREAD_NAME: &str = "call-network";

/// Default name of the media worker thread.
pub const DEFAULT_MEDIA_THREAD_NAME: &str = "call-media";

/// Lazily-started network and media worker threads.
///
/// Sessions receive the registry as an injected `Arc` rather than reaching
/// for a global, so tests can run isolated registries side by side.
#[derive(Debug)]
pub struct WorkerThreadRegistry {
    network_name: String,
    media_name: String,
    network: Mutex<Option<WorkerThread>>,
    media: Mutex<Option<WorkerThread>>,
}

impl WorkerThreadRegistry {
    /// Create a registry whose threads will carry the given names.
    ///
    /// No thread is started until first requested.
    #[must_use]
    pub fn new(network_name: impl Into<String>, media_name: impl Into<String>) -> Self {
        Self {
            network_name: network_name.into(),
            media_name: media_name.into(),
            network: Mutex::new(None),
            media: Mutex::new(None),
        }
    }

    /// The process-wide registry with default thread names.
    #[must_use]
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<WorkerThreadRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| {
            Arc::new(Self::new(
                DEFAULT_NETWORK_THREAD_NAME,
                DEFAULT_MEDIA_THREAD_NAME,
            ))
        }))
    }

    /// The network worker, started on first call.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WorkerSpawn` if the thread cannot be started.
    pub fn network_thread(&self) -> Result<WorkerThread, SessionError> {
        Self::get_or_spawn(&self.network, &self.network_name)
    }

    /// The media worker, started on first call.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WorkerSpawn` if the thread cannot be started.
    pub fn media_thread(&self) -> Result<WorkerThread, SessionError> {
        Self::get_or_spawn(&self.media, &self.media_name)
    }

    fn get_or_spawn(
        slot: &Mutex<Option<WorkerThread>>,
        name: &str,
    ) -> Result<WorkerThread, SessionError> {
        let mut guard = slot
            .lock()
            .map_err(|e| SessionError::Internal(format!("registry lock poisoned: {e}")))?;

        if let Some(worker) = guard.as_ref() {
            return Ok(worker.clone());
        }

        debug!(
            target: "call.worker",
            thread = %name,
            "Starting worker thread on first use"
        );

        let worker = WorkerThread::spawn(name)?;
        *guard = Some(worker.clone());
        Ok(worker)
    }
}
