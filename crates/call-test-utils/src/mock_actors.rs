//! Mock network and media actors.
//!
//! Every call into a mock actor (including its construction and drop) is
//! reported on a [`CallLog`] together with the name of the thread it ran
//! on, so tests can assert both what happened and where.
//!
//! The provider keeps a copy of the event callbacks it handed to each
//! actor. [`MockProvider::fire_network`] and [`MockProvider::fire_media`]
//! invoke them on the actor's worker thread, the way a real actor would,
//! and keep working after the actor itself is gone.
//!
//! # Example
//!
//! ```rust,ignore
//! let (provider, mut calls) = MockProvider::with_media_echo();
//! // ... create and start a session with `provider` ...
//!
//! calls.wait_for(|c| matches!(c, Call::MediaCreated { .. })).await;
//! provider.fire_network(|events| events.packet_received(Bytes::from_static(b"rtp")));
//! ```

use crate::fixtures::{assert_quiet, current_thread_name, recv_within};
use bytes::Bytes;
use call_session::session::{
    ActorProvider, EncryptionKey, MediaActor, MediaEvents, NetworkActor, NetworkEvents,
    NetworkParams, VideoSink,
};
use call_session::worker::WorkerThread;
use secrecy::ExposeSecret;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// What a mock network actor reports about its key, without the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInfo {
    pub is_outgoing: bool,
    pub len: usize,
}

impl From<&EncryptionKey> for KeyInfo {
    fn from(key: &EncryptionKey) -> Self {
        Self {
            is_outgoing: key.is_outgoing(),
            len: key.material().expose_secret().len(),
        }
    }
}

/// A call made into a mock actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    NetworkCreated { enable_p2p: bool, key: KeyInfo },
    SendPacket(Bytes),
    ReceiveSignalingData(Bytes),
    NetworkDropped,
    MediaCreated { is_outgoing: bool },
    SetIsConnected(bool),
    ReceivePacket(Bytes),
    SetIncomingVideoOutput,
    SetOutgoingVideoOutput,
    MediaDropped,
}

/// A call and the thread it ran on.
#[derive(Debug, Clone)]
pub struct ActorCall {
    pub thread: String,
    pub call: Call,
}

/// Receiving end of a [`MockProvider`].
#[derive(Debug)]
pub struct CallLog {
    rx: mpsc::UnboundedReceiver<ActorCall>,
}

impl CallLog {
    /// Next reported call.
    ///
    /// # Panics
    ///
    /// Panics if none arrives in time.
    pub async fn next(&mut self) -> ActorCall {
        recv_within(&mut self.rx, "actor call").await
    }

    /// Skip calls until one matches `predicate`, and return it.
    ///
    /// # Panics
    ///
    /// Panics if no matching call arrives in time.
    pub async fn wait_for(&mut self, predicate: impl Fn(&Call) -> bool) -> ActorCall {
        loop {
            let call = self.next().await;
            if predicate(&call.call) {
                return call;
            }
        }
    }

    /// Assert no call arrives within `quiet`.
    pub async fn assert_quiet(&mut self, quiet: Duration) {
        assert_quiet(&mut self.rx, quiet).await;
    }
}

/// Event callbacks of one actor plus the thread to fire them on.
struct EventSource<E> {
    thread: WorkerThread,
    events: E,
}

/// Provider of reporting mock actors.
pub struct MockProvider {
    calls: mpsc::UnboundedSender<ActorCall>,
    media_echo: bool,
    network_events: Mutex<Option<EventSource<NetworkEvents>>>,
    media_events: Mutex<Option<EventSource<MediaEvents>>>,
}

impl MockProvider {
    /// Provider whose media actor only records calls.
    #[must_use]
    pub fn new() -> (Arc<Self>, CallLog) {
        Self::build(false)
    }

    /// Provider whose media actor sends every received packet straight
    /// back out through `packet_to_send`.
    #[must_use]
    pub fn with_media_echo() -> (Arc<Self>, CallLog) {
        Self::build(true)
    }

    fn build(media_echo: bool) -> (Arc<Self>, CallLog) {
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = Arc::new(Self {
            calls: tx,
            media_echo,
            network_events: Mutex::new(None),
            media_events: Mutex::new(None),
        });
        (provider, CallLog { rx })
    }

    /// Run `fire` with the network actor's callbacks on the network thread.
    ///
    /// # Panics
    ///
    /// Panics if the network actor was never created.
    pub fn fire_network<F>(&self, fire: F)
    where
        F: FnOnce(&NetworkEvents) + Send + 'static,
    {
        let guard = self.network_events.lock().unwrap();
        let source = guard.as_ref().expect("network actor not created yet");
        let events = source.events.clone();
        source
            .thread
            .post(move || fire(&events))
            .expect("network thread should be running");
    }

    /// Run `fire` with the media actor's callbacks on the media thread.
    ///
    /// # Panics
    ///
    /// Panics if the media actor was never created.
    pub fn fire_media<F>(&self, fire: F)
    where
        F: FnOnce(&MediaEvents) + Send + 'static,
    {
        let guard = self.media_events.lock().unwrap();
        let source = guard.as_ref().expect("media actor not created yet");
        let events = source.events.clone();
        source
            .thread
            .post(move || fire(&events))
            .expect("media thread should be running");
    }
}

fn report(calls: &mpsc::UnboundedSender<ActorCall>, call: Call) {
    let _ = calls.send(ActorCall {
        thread: current_thread_name(),
        call,
    });
}

impl ActorProvider for MockProvider {
    type Network = MockNetwork;
    type Media = MockMedia;

    fn create_network(
        &self,
        thread: &WorkerThread,
        params: NetworkParams,
        events: NetworkEvents,
    ) -> MockNetwork {
        *self.network_events.lock().unwrap() = Some(EventSource {
            thread: thread.clone(),
            events,
        });

        report(
            &self.calls,
            Call::NetworkCreated {
                enable_p2p: params.enable_p2p,
                key: KeyInfo::from(&params.encryption_key),
            },
        );

        MockNetwork {
            calls: self.calls.clone(),
        }
    }

    fn create_media(
        &self,
        thread: &WorkerThread,
        is_outgoing: bool,
        events: MediaEvents,
    ) -> MockMedia {
        *self.media_events.lock().unwrap() = Some(EventSource {
            thread: thread.clone(),
            events: events.clone(),
        });

        report(&self.calls, Call::MediaCreated { is_outgoing });

        MockMedia {
            calls: self.calls.clone(),
            echo: self.media_echo.then_some(events),
        }
    }
}

/// Network actor that only reports calls.
pub struct MockNetwork {
    calls: mpsc::UnboundedSender<ActorCall>,
}

impl NetworkActor for MockNetwork {
    fn send_packet(&mut self, packet: Bytes) {
        report(&self.calls, Call::SendPacket(packet));
    }

    fn receive_signaling_data(&mut self, data: Bytes) {
        report(&self.calls, Call::ReceiveSignalingData(data));
    }
}

impl Drop for MockNetwork {
    fn drop(&mut self) {
        report(&self.calls, Call::NetworkDropped);
    }
}

/// Media actor that reports calls and optionally echoes packets.
pub struct MockMedia {
    calls: mpsc::UnboundedSender<ActorCall>,
    echo: Option<MediaEvents>,
}

impl MediaActor for MockMedia {
    fn set_is_connected(&mut self, connected: bool) {
        report(&self.calls, Call::SetIsConnected(connected));
    }

    fn receive_packet(&mut self, packet: Bytes) {
        report(&self.calls, Call::ReceivePacket(packet.clone()));
        if let Some(events) = &self.echo {
            events.packet_to_send(packet);
        }
    }

    fn set_incoming_video_output(&mut self, _sink: Arc<dyn VideoSink>) {
        report(&self.calls, Call::SetIncomingVideoOutput);
    }

    fn set_outgoing_video_output(&mut self, _sink: Arc<dyn VideoSink>) {
        report(&self.calls, Call::SetOutgoingVideoOutput);
    }
}

impl Drop for MockMedia {
    fn drop(&mut self) {
        report(&self.calls, Call::MediaDropped);
    }
}
