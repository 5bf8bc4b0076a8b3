//! Call Session
//!
//! Runs one loopback call end to end: the network actor reflects every
//! packet back to the media actor, so frames synthesized on the media
//! thread travel through the network thread and come back as incoming
//! video.
//!
//! # Flow
//!
//! 1. Load configuration from environment
//! 2. Start the owner thread and build the worker registry
//! 3. Create and start the session on the owner thread
//! 4. Relay the network's signaling offer back as the peer's answer
//! 5. Run until the configured duration elapses or a shutdown signal
//! 6. Drop the session on the owner thread

#![warn(clippy::pedantic)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use call_session::config::Config;
use call_session::loopback::LoopbackProvider;
use call_session::session::{
    SessionCoordinator, SessionObservers, SessionState, VideoFrame, VideoSink,
};
use call_session::worker::{WorkerThread, WorkerThreadRegistry};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type LoopbackSession = SessionCoordinator<LoopbackProvider>;

/// Counts frames delivered to a sink.
#[derive(Debug, Default)]
struct FrameCounter {
    frames: AtomicU64,
}

impl VideoSink for FrameCounter {
    fn on_frame(&self, _frame: VideoFrame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// Events the session reports to `main`.
#[derive(Debug)]
enum SessionEvent {
    State(SessionState),
    Signaling(Bytes),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting call session");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    let encryption_key = config.encryption_key()?;

    info!(
        is_outgoing = config.is_outgoing,
        enable_p2p = config.enable_p2p,
        network_thread = %config.network_thread_name,
        media_thread = %config.media_thread_name,
        owner_thread = %config.owner_thread_name,
        duration_seconds = config.demo_duration_seconds,
        "Configuration loaded successfully"
    );

    let registry = Arc::new(WorkerThreadRegistry::new(
        config.network_thread_name.clone(),
        config.media_thread_name.clone(),
    ));
    let owner = WorkerThread::spawn(config.owner_thread_name.clone())?;

    let incoming = Arc::new(FrameCounter::default());
    let outgoing = Arc::new(FrameCounter::default());
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    // The session lives in a slot that is only touched on the owner thread.
    let slot: Arc<Mutex<Option<Arc<LoopbackSession>>>> = Arc::new(Mutex::new(None));

    {
        let slot = Arc::clone(&slot);
        let owner_handle = owner.clone();
        let enable_p2p = config.enable_p2p;
        let incoming: Arc<dyn VideoSink> = incoming.clone();
        let outgoing: Arc<dyn VideoSink> = outgoing.clone();

        owner
            .invoke(move || -> anyhow::Result<()> {
                let state_tx = event_tx.clone();
                let observers = SessionObservers::new(
                    move |state| {
                        let _ = state_tx.send(SessionEvent::State(state));
                    },
                    move |data| {
                        let _ = event_tx.send(SessionEvent::Signaling(data));
                    },
                );

                let session = SessionCoordinator::new(
                    owner_handle,
                    &registry,
                    Arc::new(LoopbackProvider),
                    encryption_key,
                    enable_p2p,
                    observers,
                )?;
                session.set_incoming_video_output(incoming);
                session.set_outgoing_video_output(outgoing);
                session.start()?;

                *slot
                    .lock()
                    .map_err(|e| anyhow::anyhow!("session slot poisoned: {e}"))? = Some(session);
                Ok(())
            })
            .await??;
    }

    info!("Call session running - press Ctrl+C to hang up");

    let deadline = tokio::time::sleep(config.demo_duration());
    tokio::pin!(deadline);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut deadline => {
                info!("Call duration elapsed");
                break;
            }
            () = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            event = event_rx.recv() => match event {
                Some(SessionEvent::State(state)) => {
                    info!(state = %state, "Session state updated");
                }
                Some(SessionEvent::Signaling(data)) => {
                    info!(len = data.len(), "Relaying signaling data to peer");
                    // Loopback: the peer's answer is our own offer.
                    let slot = Arc::clone(&slot);
                    owner.post(move || {
                        if let Ok(guard) = slot.lock() {
                            if let Some(session) = guard.as_ref() {
                                session.receive_signaling_data(data);
                            }
                        }
                    })?;
                }
                None => {
                    warn!("Session event channel closed");
                    break;
                }
            }
        }
    }

    // Tear down on the owner thread.
    owner
        .invoke(move || {
            if let Ok(mut guard) = slot.lock() {
                guard.take();
            }
        })
        .await?;
    owner.shutdown();

    info!(
        frames_sent = outgoing.frames.load(Ordering::Relaxed),
        frames_received = incoming.frames.load(Ordering::Relaxed),
        "Call session ended"
    );

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "call_session=debug,call=debug".into());

    let json = std::env::var("CALL_LOG_JSON").is_ok_and(|v| v == "true");

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Wait for a shutdown signal (SIGTERM or Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
