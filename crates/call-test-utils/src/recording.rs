//! Recording video sinks and session observers.

use crate::fixtures::{current_thread_name, recv_within, EVENT_TIMEOUT};
use bytes::Bytes;
use call_session::session::{SessionObservers, SessionState, VideoFrame, VideoSink};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Video sink that keeps every frame it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<VideoFrame>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Frames received so far.
    #[must_use]
    pub fn frames(&self) -> Vec<VideoFrame> {
        self.frames.lock().unwrap().clone()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    /// Wait until at least `n` frames have arrived.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive within [`EVENT_TIMEOUT`].
    pub async fn wait_for_frames(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
        while self.count() < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} frames, have {}",
                self.count()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl VideoSink for RecordingSink {
    fn on_frame(&self, frame: VideoFrame) {
        self.frames.lock().unwrap().push(frame);
    }
}

/// Something a session reported to its observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    State(SessionState),
    Signaling(Bytes),
}

/// An observer invocation and the thread it ran on.
#[derive(Debug, Clone)]
pub struct ObservedEvent {
    pub thread: String,
    pub event: Observed,
}

/// Receiving end of [`recording_observers`].
#[derive(Debug)]
pub struct ObserverLog {
    rx: mpsc::UnboundedReceiver<ObservedEvent>,
}

impl ObserverLog {
    /// Next observer invocation.
    ///
    /// # Panics
    ///
    /// Panics if none arrives within [`EVENT_TIMEOUT`].
    pub async fn next(&mut self) -> ObservedEvent {
        recv_within(&mut self.rx, "observer event").await
    }

    /// Next observer invocation, skipping signaling data.
    ///
    /// # Panics
    ///
    /// Panics if no state update arrives within [`EVENT_TIMEOUT`] per event.
    pub async fn next_state(&mut self) -> (SessionState, String) {
        loop {
            let observed = self.next().await;
            if let Observed::State(state) = observed.event {
                return (state, observed.thread);
            }
        }
    }

    /// Assert no observer runs within `quiet`.
    pub async fn assert_quiet(&mut self, quiet: Duration) {
        crate::fixtures::assert_quiet(&mut self.rx, quiet).await;
    }
}

/// Observers that record every invocation with the calling thread's name.
#[must_use]
pub fn recording_observers() -> (SessionObservers, ObserverLog) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state_tx = tx.clone();

    let observers = SessionObservers::new(
        move |state| {
            let _ = state_tx.send(ObservedEvent {
                thread: current_thread_name(),
                event: Observed::State(state),
            });
        },
        move |data| {
            let _ = tx.send(ObservedEvent {
                thread: current_thread_name(),
                event: Observed::Signaling(data),
            });
        },
    );

    (observers, ObserverLog { rx })
}
