//! Test fixtures: keys, registries and owner threads.

use call_session::session::EncryptionKey;
use call_session::worker::{WorkerThread, WorkerThreadRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default wait for any expected event in tests.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Raw bytes of the test key.
pub const TEST_KEY_BYTES: &[u8; 32] = b"0123456789abcdef0123456789abcdef";

/// `TEST_KEY_BYTES` in base64, as it appears in `CALL_ENCRYPTION_KEY`.
pub const TEST_KEY_B64: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

/// Encryption key for an outgoing call.
#[must_use]
pub fn test_key() -> EncryptionKey {
    test_key_with_role(true)
}

/// Encryption key with an explicit call direction.
#[must_use]
pub fn test_key_with_role(is_outgoing: bool) -> EncryptionKey {
    EncryptionKey::new(TEST_KEY_BYTES.to_vec(), is_outgoing)
}

/// An isolated registry whose threads are named `{prefix}-network` and
/// `{prefix}-media`.
#[must_use]
pub fn test_registry(prefix: &str) -> Arc<WorkerThreadRegistry> {
    Arc::new(WorkerThreadRegistry::new(
        format!("{prefix}-network"),
        format!("{prefix}-media"),
    ))
}

/// Start a worker thread to act as a session's owner.
///
/// # Panics
///
/// Panics if the thread cannot be started.
#[must_use]
pub fn spawn_owner(name: &str) -> WorkerThread {
    WorkerThread::spawn(name).expect("owner thread should start")
}

/// Name of the calling thread, or `"unnamed"`.
#[must_use]
pub fn current_thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or("unnamed")
        .to_string()
}

/// Receive the next item or panic after [`EVENT_TIMEOUT`].
///
/// # Panics
///
/// Panics on timeout or if the channel is closed.
pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>, what: &str) -> T {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .unwrap_or_else(|| panic!("channel closed waiting for {what}"))
}

/// Assert that nothing arrives on `rx` within `quiet`.
///
/// # Panics
///
/// Panics if an item arrives.
pub async fn assert_quiet<T: std::fmt::Debug>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    quiet: Duration,
) {
    if let Ok(Some(item)) = tokio::time::timeout(quiet, rx.recv()).await {
        panic!("expected no further events, got {item:?}");
    }
}
