//! Loopback media pipeline.
//!
//! While connected, [`LoopbackMedia`] synthesizes one outgoing frame per
//! [`FRAME_INTERVAL`]: the frame is shown on the outgoing (preview) sink
//! and encoded into a packet for the network side. Packets coming back
//! from the network are decoded and shown on the incoming sink.
//!
//! The frame generator is a `spawn_local` task on the media worker. It
//! shares the preview sink slot with the actor through an `Rc`, which
//! only works because both live on the same thread.

use super::codec::{decode_frame, encode_frame};
use crate::session::{MediaActor, MediaEvents, VideoFrame, VideoSink};
use crate::worker::WorkerThread;

use bytes::Bytes;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};

/// Interval between synthesized outgoing frames.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// Width of synthesized frames.
pub const FRAME_WIDTH: u32 = 320;

/// Height of synthesized frames.
pub const FRAME_HEIGHT: u32 = 240;

type SinkSlot = Rc<RefCell<Option<Arc<dyn VideoSink>>>>;

/// Media actor that renders whatever the loopback network returns.
pub struct LoopbackMedia {
    thread_name: String,
    events: MediaEvents,
    is_outgoing: bool,
    connected: bool,
    incoming: Option<Arc<dyn VideoSink>>,
    outgoing: SinkSlot,
    frames_sent: Rc<Cell<u64>>,
    frames_received: u64,
    /// Stops the frame generator when replaced or dropped.
    generator: Option<DropGuard>,
}

impl LoopbackMedia {
    #[must_use]
    pub fn new(thread: &WorkerThread, is_outgoing: bool, events: MediaEvents) -> Self {
        info!(
            target: "call.loopback",
            thread = %thread.name(),
            is_outgoing = is_outgoing,
            "Loopback media started"
        );

        Self {
            thread_name: thread.name().to_string(),
            events,
            is_outgoing,
            connected: false,
            incoming: None,
            outgoing: Rc::new(RefCell::new(None)),
            frames_sent: Rc::new(Cell::new(0)),
            frames_received: 0,
            generator: None,
        }
    }

    /// Frames synthesized so far.
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.get()
    }

    /// Frames decoded from the network so far.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    fn start_generator(&mut self) {
        let token = CancellationToken::new();

        tokio::task::spawn_local(generate_frames(
            self.events.clone(),
            Rc::clone(&self.outgoing),
            Rc::clone(&self.frames_sent),
            self.is_outgoing,
            token.clone(),
        ));

        self.generator = Some(token.drop_guard());
    }
}

impl MediaActor for LoopbackMedia {
    fn set_is_connected(&mut self, connected: bool) {
        if connected == self.connected {
            return;
        }
        self.connected = connected;

        debug!(
            target: "call.loopback",
            connected = connected,
            "Loopback media connectivity changed"
        );

        if connected {
            self.start_generator();
        } else {
            self.generator = None;
        }
    }

    fn receive_packet(&mut self, packet: Bytes) {
        match decode_frame(packet) {
            Ok(frame) => {
                self.frames_received += 1;
                if let Some(sink) = &self.incoming {
                    sink.on_frame(frame);
                }
            }
            Err(e) => {
                warn!(target: "call.loopback", error = %e, "Dropping undecodable packet");
            }
        }
    }

    fn set_incoming_video_output(&mut self, sink: Arc<dyn VideoSink>) {
        self.incoming = Some(sink);
    }

    fn set_outgoing_video_output(&mut self, sink: Arc<dyn VideoSink>) {
        *self.outgoing.borrow_mut() = Some(sink);
    }
}

impl Drop for LoopbackMedia {
    fn drop(&mut self) {
        info!(
            target: "call.loopback",
            thread = %self.thread_name,
            frames_sent = self.frames_sent.get(),
            frames_received = self.frames_received,
            "Loopback media stopped"
        );
    }
}

/// Frame generator; runs on the media worker until `cancel_token` fires.
async fn generate_frames(
    events: MediaEvents,
    outgoing: SinkSlot,
    frames_sent: Rc<Cell<u64>>,
    is_outgoing: bool,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(FRAME_INTERVAL);
    let frame_us = u64::try_from(FRAME_INTERVAL.as_micros()).unwrap_or(u64::MAX);

    loop {
        tokio::select! {
            biased;

            () = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                let seq = frames_sent.get();
                let frame = synthesize_frame(seq, seq.saturating_mul(frame_us), is_outgoing);

                // Clone out of the slot so the sink never runs under a borrow.
                let sink = outgoing.borrow().clone();
                if let Some(sink) = sink {
                    sink.on_frame(frame.clone());
                }

                match encode_frame(&frame) {
                    Ok(packet) => events.packet_to_send(packet),
                    Err(e) => warn!(target: "call.loopback", error = %e, "Failed to encode frame"),
                }
                frames_sent.set(seq + 1);
            }
        }
    }

    trace!(
        target: "call.loopback",
        frames_sent = frames_sent.get(),
        "Frame generator stopped"
    );
}

/// Build a recognizable test pattern: the sequence number repeated,
/// prefixed with the call direction.
fn synthesize_frame(seq: u64, timestamp_us: u64, is_outgoing: bool) -> VideoFrame {
    let mut data = Vec::with_capacity(1 + 4 * 8);
    data.push(u8::from(is_outgoing));
    for _ in 0..4 {
        data.extend_from_slice(&seq.to_be_bytes());
    }

    VideoFrame {
        width: FRAME_WIDTH,
        height: FRAME_HEIGHT,
        timestamp_us,
        data: Bytes::from(data),
    }
}
