//! Call session coordination.
//!
//! A [`SessionCoordinator`] is pinned to an owning thread supplied by its
//! caller. It owns one [`ConfinedCell`] for the network actor (on the
//! network worker) and one for the media actor (on the media worker), and
//! wires the actors' events so each one re-enters on the right thread:
//!
//! | Event | Route |
//! |-------|-------|
//! | connectivity change | owner thread, then media cell (`set_is_connected`) |
//! | packet received | media cell (`receive_packet`) |
//! | signaling data | owner thread (signaling observer) |
//! | packet to send | network cell (`send_packet`) |
//!
//! Every route holds only a weak reference: a `Weak` to the coordinator for
//! routes through the owner thread, a [`WeakCell`] for routes straight to
//! the other actor. When the session is gone the callback is a no-op.
//!
//! Owner-thread routes upgrade the `Weak` only once they are running on
//! the owner, so the last strong reference to a coordinator is always
//! released there.
//!
//! Packet routes check the coordinator's `Weak` as well as the destination
//! cell. The cells outlive the coordinator's last strong reference for the
//! duration of its drop; no packet crosses between actors in that window.
//!
//! [`WeakCell`]: crate::confined::WeakCell

mod actors;
mod state;

pub use actors::{
    ActorProvider, EncryptionKey, MediaActor, MediaEvents, NetworkActor, NetworkEvents,
    NetworkParams, VideoFrame, VideoSink,
};
pub use state::SessionState;

use crate::confined::ConfinedCell;
use crate::errors::SessionError;
use crate::observability::metrics;
use crate::worker::{WorkerThread, WorkerThreadRegistry};

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, instrument, trace};
use uuid::Uuid;

/// Cell label of the network actor.
pub const NETWORK_CELL: &str = "network";

/// Cell label of the media actor.
pub const MEDIA_CELL: &str = "media";

type StateObserver = Box<dyn Fn(SessionState) + Send + Sync>;
type SignalingObserver = Box<dyn Fn(Bytes) + Send + Sync>;

/// Callbacks supplied by the coordinator's caller.
///
/// Both are only ever invoked on the owning thread.
pub struct SessionObservers {
    on_state_updated: StateObserver,
    on_signaling_data: SignalingObserver,
}

impl SessionObservers {
    pub fn new<S, D>(on_state_updated: S, on_signaling_data: D) -> Self
    where
        S: Fn(SessionState) + Send + Sync + 'static,
        D: Fn(Bytes) + Send + Sync + 'static,
    {
        Self {
            on_state_updated: Box::new(on_state_updated),
            on_signaling_data: Box::new(on_signaling_data),
        }
    }
}

impl fmt::Debug for SessionObservers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionObservers").finish_non_exhaustive()
    }
}

/// Coordinates the network and media actors of one call.
pub struct SessionCoordinator<P: ActorProvider> {
    session_id: Uuid,
    owner: WorkerThread,
    provider: Arc<P>,
    encryption_key: EncryptionKey,
    enable_p2p: bool,
    observers: SessionObservers,
    network: ConfinedCell<P::Network>,
    media: ConfinedCell<P::Media>,
    started: AtomicBool,
}

impl<P: ActorProvider> SessionCoordinator<P> {
    /// Create a session pinned to `owner`.
    ///
    /// Acquires the network and media workers from `registry` and sets up
    /// both actor cells without constructing the actors. Calls made through
    /// the session before [`start`] are queued and delivered once the
    /// actors exist.
    ///
    /// # Errors
    ///
    /// - `SessionError::ThreadAffinity` when not called on `owner`
    /// - `SessionError::WorkerSpawn` if a worker thread cannot be started
    ///
    /// [`start`]: SessionCoordinator::start
    pub fn new(
        owner: WorkerThread,
        registry: &WorkerThreadRegistry,
        provider: Arc<P>,
        encryption_key: EncryptionKey,
        enable_p2p: bool,
        observers: SessionObservers,
    ) -> Result<Arc<Self>, SessionError> {
        check_owner(&owner, "SessionCoordinator::new")?;

        let network = ConfinedCell::unbuilt(registry.network_thread()?, NETWORK_CELL);
        let media = ConfinedCell::unbuilt(registry.media_thread()?, MEDIA_CELL);

        let session_id = Uuid::new_v4();

        info!(
            target: "call.session",
            session_id = %session_id,
            owner = %owner.name(),
            enable_p2p = enable_p2p,
            is_outgoing = encryption_key.is_outgoing(),
            "Session created"
        );

        Ok(Arc::new(Self {
            session_id,
            owner,
            provider,
            encryption_key,
            enable_p2p,
            observers,
            network,
            media,
            started: AtomicBool::new(false),
        }))
    }

    /// Construct both actors on their worker threads with cross-wired
    /// event callbacks.
    ///
    /// Returns once construction is scheduled; the actors are built
    /// asynchronously.
    ///
    /// # Errors
    ///
    /// - `SessionError::ThreadAffinity` when not called on the owner thread
    /// - `SessionError::AlreadyStarted` on a second call
    /// - `SessionError::WorkerUnavailable` if a worker thread has stopped
    #[instrument(skip_all, name = "call.session.start", fields(session_id = %self.session_id))]
    pub fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        check_owner(&self.owner, "SessionCoordinator::start")?;

        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SessionError::AlreadyStarted);
        }

        let params = NetworkParams {
            encryption_key: self.encryption_key.clone(),
            enable_p2p: self.enable_p2p,
        };
        let network_events = self.network_events();
        let provider = Arc::clone(&self.provider);
        let network_thread = self.network.thread().clone();
        self.network.build(move || {
            provider.create_network(&network_thread, params, network_events)
        })?;

        let is_outgoing = self.encryption_key.is_outgoing();
        let media_events = self.media_events();
        let provider = Arc::clone(&self.provider);
        let media_thread = self.media.thread().clone();
        self.media.build(move || {
            provider.create_media(&media_thread, is_outgoing, media_events)
        })?;

        info!(
            target: "call.session",
            session_id = %self.session_id,
            network_thread = %self.network.thread().name(),
            media_thread = %self.media.thread().name(),
            "Session started"
        );

        Ok(())
    }

    /// Forward a signaling blob from the peer to the network actor.
    ///
    /// Callable from any thread.
    pub fn receive_signaling_data(&self, data: Bytes) {
        trace!(
            target: "call.session",
            session_id = %self.session_id,
            len = data.len(),
            "Forwarding signaling data to network actor"
        );
        self.network
            .perform(move |network: &mut P::Network| network.receive_signaling_data(data));
    }

    /// Route decoded incoming video to `sink`. Callable from any thread.
    pub fn set_incoming_video_output(&self, sink: Arc<dyn VideoSink>) {
        self.media
            .perform(move |media: &mut P::Media| media.set_incoming_video_output(sink));
    }

    /// Route the local video preview to `sink`. Callable from any thread.
    pub fn set_outgoing_video_output(&self, sink: Arc<dyn VideoSink>) {
        self.media
            .perform(move |media: &mut P::Media| media.set_outgoing_video_output(sink));
    }

    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The thread this session is pinned to.
    #[must_use]
    pub fn owner(&self) -> &WorkerThread {
        &self.owner
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Runs on the owner thread for every readiness signal.
    fn handle_connectivity_change(&self, ready: bool) {
        let state = SessionState::from_ready(ready);

        debug!(
            target: "call.session",
            session_id = %self.session_id,
            state = %state,
            "Session state updated"
        );
        metrics::record_state_update(state.as_str());

        (self.observers.on_state_updated)(state);

        self.media
            .perform(move |media: &mut P::Media| media.set_is_connected(ready));
    }

    fn handle_signaling_data(&self, data: Bytes) {
        trace!(
            target: "call.session",
            session_id = %self.session_id,
            len = data.len(),
            "Signaling data emitted"
        );
        (self.observers.on_signaling_data)(data);
    }

    fn network_events(self: &Arc<Self>) -> NetworkEvents {
        let on_connectivity_change = {
            let owner = self.owner.clone();
            let session = Arc::downgrade(self);
            move |ready: bool| {
                post_to_owner(&owner, &session, "connectivity", move |session| {
                    session.handle_connectivity_change(ready);
                });
            }
        };

        let on_packet_received = {
            let session = Arc::downgrade(self);
            let media = self.media.downgrade();
            move |packet: Bytes| {
                let delivered = session.strong_count() > 0
                    && media.perform(move |media: &mut P::Media| media.receive_packet(packet));
                if !delivered {
                    metrics::record_stale_callback("packet_received");
                }
            }
        };

        let on_signaling_data = {
            let owner = self.owner.clone();
            let session = Arc::downgrade(self);
            move |data: Bytes| {
                post_to_owner(&owner, &session, "signaling", move |session| {
                    session.handle_signaling_data(data);
                });
            }
        };

        NetworkEvents::new(on_connectivity_change, on_packet_received, on_signaling_data)
    }

    fn media_events(self: &Arc<Self>) -> MediaEvents {
        let session = Arc::downgrade(self);
        let network = self.network.downgrade();
        MediaEvents::new(move |packet: Bytes| {
            let delivered = session.strong_count() > 0
                && network.perform(move |network: &mut P::Network| network.send_packet(packet));
            if !delivered {
                metrics::record_stale_callback("packet_to_send");
            }
        })
    }
}

impl<P: ActorProvider> fmt::Debug for SessionCoordinator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("session_id", &self.session_id)
            .field("owner", &self.owner.name())
            .field("enable_p2p", &self.enable_p2p)
            .field("encryption_key", &self.encryption_key)
            .field("started", &self.is_started())
            .field("network", &self.network)
            .field("media", &self.media)
            .finish()
    }
}

impl<P: ActorProvider> Drop for SessionCoordinator<P> {
    fn drop(&mut self) {
        if !self.owner.is_current() {
            error!(
                target: "call.session",
                session_id = %self.session_id,
                owner = %self.owner.name(),
                "Session dropped off its owner thread"
            );
            debug_assert!(
                self.owner.is_current(),
                "SessionCoordinator must be dropped on its owner thread"
            );
        }

        // The cells drop after this: each actor drains its queued jobs and
        // is destroyed on its own worker.
        info!(
            target: "call.session",
            session_id = %self.session_id,
            network_jobs = self.network.mailbox().processed(),
            media_jobs = self.media.mailbox().processed(),
            "Session destroyed"
        );
    }
}

fn check_owner(owner: &WorkerThread, operation: &'static str) -> Result<(), SessionError> {
    if owner.is_current() {
        Ok(())
    } else {
        Err(SessionError::ThreadAffinity {
            operation,
            expected: owner.name().to_string(),
        })
    }
}

/// Run `handler` on the owner thread if the session still exists there.
fn post_to_owner<P, F>(
    owner: &WorkerThread,
    session: &Weak<SessionCoordinator<P>>,
    route: &'static str,
    handler: F,
) where
    P: ActorProvider,
    F: FnOnce(&SessionCoordinator<P>) + Send + 'static,
{
    let session = Weak::clone(session);
    let posted = owner.post(move || match session.upgrade() {
        Some(session) => handler(&session),
        None => {
            trace!(target: "call.session", route = route, "Session gone; event dropped");
            metrics::record_stale_callback(route);
        }
    });

    if posted.is_err() {
        debug!(
            target: "call.session",
            route = route,
            owner = %owner.name(),
            "Owner thread stopped; event dropped"
        );
        metrics::record_stale_callback(route);
    }
}
