//! In-process loopback actors.
//!
//! A loopback session needs no peer: the network actor reflects every
//! packet it is asked to send, so the media actor receives its own
//! synthesized frames back. Used by the `call-session` binary and by
//! end-to-end tests of the coordinator.

mod codec;
mod media;
mod network;

pub use codec::{decode_frame, encode_frame, CodecError, HEADER_SIZE};
pub use media::{LoopbackMedia, FRAME_HEIGHT, FRAME_INTERVAL, FRAME_WIDTH};
pub use network::{LoopbackNetwork, LOOPBACK_OFFER};

use crate::session::{ActorProvider, MediaEvents, NetworkEvents, NetworkParams};
use crate::worker::WorkerThread;

/// Provides [`LoopbackNetwork`] and [`LoopbackMedia`] actors.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackProvider;

impl ActorProvider for LoopbackProvider {
    type Network = LoopbackNetwork;
    type Media = LoopbackMedia;

    fn create_network(
        &self,
        thread: &WorkerThread,
        params: NetworkParams,
        events: NetworkEvents,
    ) -> Self::Network {
        LoopbackNetwork::new(thread, params, events)
    }

    fn create_media(
        &self,
        thread: &WorkerThread,
        is_outgoing: bool,
        events: MediaEvents,
    ) -> Self::Media {
        LoopbackMedia::new(thread, is_outgoing, events)
    }
}
