//! Call Session Library
//!
//! Thread-confined actor scaffolding for a real-time call session. A call
//! is split into two subsystems that must each run on their own dedicated
//! thread:
//!
//! - a network actor (transport, signaling, packet encryption)
//! - a media actor (encoding, decoding, video delivery)
//!
//! # Architecture
//!
//! ```text
//! owner thread (caller-supplied)
//! └── SessionCoordinator
//!     ├── ConfinedCell<Network> ──> "call-network" worker
//!     └── ConfinedCell<Media>   ──> "call-media" worker
//! ```
//!
//! The two workers are process-wide and shared by every session
//! ([`worker::WorkerThreadRegistry`]). Actors are only ever touched on
//! their worker; everything else reaches them by posting closures into
//! their cell. Callbacks out of the actors hold weak references, so a
//! session can be dropped while its actors are still busy.
//!
//! # Modules
//!
//! - [`worker`] - Dedicated worker threads and the process-wide registry
//! - [`confined`] - Thread-confined cells
//! - [`session`] - Session coordinator, session state and actor contracts
//! - [`loopback`] - In-process loopback actors
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types
//! - [`observability`] - Metrics

pub mod config;
pub mod confined;
pub mod errors;
pub mod loopback;
pub mod observability;
pub mod session;
pub mod worker;
