//! Contracts for the network and media actors.
//!
//! The coordinator never implements transport or media itself. It asks an
//! [`ActorProvider`] to construct one actor of each kind on its worker
//! thread and talks to them only through the traits below. Actors are
//! `'static` but need not be `Send`: each one lives its whole life on the
//! thread it was constructed on.
//!
//! Events flow back out through [`NetworkEvents`] and [`MediaEvents`].
//! Firing an event never calls into the coordinator synchronously; the
//! coordinator's handlers post the follow-up work to the right thread.

use crate::worker::WorkerThread;

use bytes::Bytes;
use secrecy::{ExposeSecret, SecretBox};
use std::fmt;
use std::sync::Arc;

/// Transport subsystem confined to the network worker thread.
pub trait NetworkActor: 'static {
    /// Transmit an already-encoded media packet to the peer.
    fn send_packet(&mut self, packet: Bytes);

    /// Feed a signaling blob received out of band from the peer.
    fn receive_signaling_data(&mut self, data: Bytes);
}

/// Media subsystem confined to the media worker thread.
pub trait MediaActor: 'static {
    /// Transport readiness changed.
    fn set_is_connected(&mut self, connected: bool);

    /// A packet arrived from the peer.
    fn receive_packet(&mut self, packet: Bytes);

    fn set_incoming_video_output(&mut self, sink: Arc<dyn VideoSink>);

    fn set_outgoing_video_output(&mut self, sink: Arc<dyn VideoSink>);
}

/// Constructs the actors of a session.
///
/// Both methods are called on the worker thread the actor will live on,
/// which is also passed in as `thread` so the actor can schedule its own
/// local tasks there.
pub trait ActorProvider: Send + Sync + 'static {
    type Network: NetworkActor;
    type Media: MediaActor;

    fn create_network(
        &self,
        thread: &WorkerThread,
        params: NetworkParams,
        events: NetworkEvents,
    ) -> Self::Network;

    fn create_media(
        &self,
        thread: &WorkerThread,
        is_outgoing: bool,
        events: MediaEvents,
    ) -> Self::Media;
}

/// Receives decoded video frames.
///
/// Sinks are shared across threads; implementations must not block.
pub trait VideoSink: Send + Sync {
    fn on_frame(&self, frame: VideoFrame);
}

/// A decoded (or synthesized) video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub timestamp_us: u64,
    pub data: Bytes,
}

/// Key material shared with the peer plus the call direction it was
/// negotiated for.
pub struct EncryptionKey {
    /// Wrapped in `SecretBox` so it is zeroized on drop and redacted from
    /// `Debug` output.
    material: SecretBox<Vec<u8>>,
    is_outgoing: bool,
}

impl EncryptionKey {
    #[must_use]
    pub fn new(material: Vec<u8>, is_outgoing: bool) -> Self {
        Self {
            material: SecretBox::new(Box::new(material)),
            is_outgoing,
        }
    }

    /// The raw key material.
    #[must_use]
    pub fn material(&self) -> &SecretBox<Vec<u8>> {
        &self.material
    }

    /// Whether this side placed the call.
    #[must_use]
    pub fn is_outgoing(&self) -> bool {
        self.is_outgoing
    }
}

impl Clone for EncryptionKey {
    fn clone(&self) -> Self {
        Self {
            material: SecretBox::new(Box::new(self.material.expose_secret().clone())),
            is_outgoing: self.is_outgoing,
        }
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("material", &"[REDACTED]")
            .field("is_outgoing", &self.is_outgoing)
            .finish()
    }
}

/// Construction parameters for the network actor.
#[derive(Debug, Clone)]
pub struct NetworkParams {
    pub encryption_key: EncryptionKey,
    pub enable_p2p: bool,
}

type BoolHandler = Arc<dyn Fn(bool) + Send + Sync>;
type BytesHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Event callbacks handed to the network actor.
///
/// Cloneable so the actor can hand copies to its own local tasks.
#[derive(Clone)]
pub struct NetworkEvents {
    on_connectivity_change: BoolHandler,
    on_packet_received: BytesHandler,
    on_signaling_data: BytesHandler,
}

impl NetworkEvents {
    pub fn new<C, P, S>(on_connectivity_change: C, on_packet_received: P, on_signaling_data: S) -> Self
    where
        C: Fn(bool) + Send + Sync + 'static,
        P: Fn(Bytes) + Send + Sync + 'static,
        S: Fn(Bytes) + Send + Sync + 'static,
    {
        Self {
            on_connectivity_change: Arc::new(on_connectivity_change),
            on_packet_received: Arc::new(on_packet_received),
            on_signaling_data: Arc::new(on_signaling_data),
        }
    }

    /// Report the transport's ready-to-send-data flag.
    pub fn connectivity_changed(&self, ready: bool) {
        (self.on_connectivity_change)(ready);
    }

    /// Hand a decrypted packet from the peer to the media side.
    pub fn packet_received(&self, packet: Bytes) {
        (self.on_packet_received)(packet);
    }

    /// Emit a signaling blob for the application to relay to the peer.
    pub fn signaling_data(&self, data: Bytes) {
        (self.on_signaling_data)(data);
    }
}

impl fmt::Debug for NetworkEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkEvents").finish_non_exhaustive()
    }
}

/// Event callbacks handed to the media actor.
#[derive(Clone)]
pub struct MediaEvents {
    on_packet_to_send: BytesHandler,
}

impl MediaEvents {
    pub fn new<P>(on_packet_to_send: P) -> Self
    where
        P: Fn(Bytes) + Send + Sync + 'static,
    {
        Self {
            on_packet_to_send: Arc::new(on_packet_to_send),
        }
    }

    /// Hand an encoded packet to the network side for transmission.
    pub fn packet_to_send(&self, packet: Bytes) {
        (self.on_packet_to_send)(packet);
    }
}

impl fmt::Debug for MediaEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaEvents").finish_non_exhaustive()
    }
}
