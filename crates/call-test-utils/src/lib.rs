//! # Call Test Utilities
//!
//! Shared test utilities for the call session core.
//!
//! ## Modules
//!
//! - `mock_actors` - Mock network and media actors that report every call
//! - `recording` - Recording video sinks and session observers
//! - `fixtures` - Keys, worker registries and owner threads
//! - `owned_session` - Sessions whose lifetime is managed on their owner thread
//!
//! ## Usage
//!
//! ```rust,ignore
//! use call_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let registry = test_registry("example");
//!     let owner = spawn_owner("example-owner");
//!     let (provider, mut calls) = MockProvider::new();
//!     let (observers, mut observed) = recording_observers();
//!
//!     let session = OwnedSession::create(
//!         &owner, &registry, provider.clone(), test_key(), false, observers,
//!     )
//!     .await
//!     .unwrap();
//!     session.start().await.unwrap();
//!
//!     calls.wait_for(|c| matches!(c, Call::NetworkCreated { .. })).await;
//!     provider.fire_network(|events| events.connectivity_changed(true));
//!
//!     session.destroy().await;
//! }
//! ```

pub mod fixtures;
pub mod mock_actors;
pub mod owned_session;
pub mod recording;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_actors::*;
pub use owned_session::*;
pub use recording::*;
