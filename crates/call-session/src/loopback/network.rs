//! Loopback transport.

use crate::session::{NetworkActor, NetworkEvents, NetworkParams};
use crate::worker::WorkerThread;

use bytes::Bytes;
use tracing::{debug, info, trace};

/// Signaling blob emitted when a loopback network actor starts.
pub const LOOPBACK_OFFER: &[u8] = b"loopback-offer";

/// Network actor that reflects every sent packet back as received.
///
/// Announces itself with [`LOOPBACK_OFFER`] on construction and reports
/// ready-to-send once the first signaling blob arrives from the peer.
pub struct LoopbackNetwork {
    thread_name: String,
    events: NetworkEvents,
    enable_p2p: bool,
    ready: bool,
    packets_looped: u64,
}

impl LoopbackNetwork {
    #[must_use]
    pub fn new(thread: &WorkerThread, params: NetworkParams, events: NetworkEvents) -> Self {
        info!(
            target: "call.loopback",
            thread = %thread.name(),
            enable_p2p = params.enable_p2p,
            "Loopback network started"
        );

        events.signaling_data(Bytes::from_static(LOOPBACK_OFFER));

        Self {
            thread_name: thread.name().to_string(),
            events,
            enable_p2p: params.enable_p2p,
            ready: false,
            packets_looped: 0,
        }
    }
}

impl NetworkActor for LoopbackNetwork {
    fn send_packet(&mut self, packet: Bytes) {
        if !self.ready {
            trace!(target: "call.loopback", len = packet.len(), "Not ready; packet dropped");
            return;
        }

        self.packets_looped += 1;
        self.events.packet_received(packet);
    }

    fn receive_signaling_data(&mut self, data: Bytes) {
        debug!(
            target: "call.loopback",
            len = data.len(),
            enable_p2p = self.enable_p2p,
            "Loopback network received signaling"
        );

        if !self.ready {
            self.ready = true;
            self.events.connectivity_changed(true);
        }
    }
}

impl Drop for LoopbackNetwork {
    fn drop(&mut self) {
        info!(
            target: "call.loopback",
            thread = %self.thread_name,
            packets_looped = self.packets_looped,
            "Loopback network stopped"
        );
    }
}
