//! Signal Core - call signaling bookkeeping and dispatch
//!
//! This crate tracks which device is reachable for an identity, relays
//! offer/answer/candidate payloads between live connections, and tears down
//! session state when either side goes away. It has no transport or HTTP
//! dependencies: connections are referenced by [`ConnectionId`] and every
//! operation returns the [`Effect`]s the caller must perform.
//!
//! # Example
//!
//! ```
//! use signal_core::{ConnectionId, Effect, ServerMessage, SignalRouter, decode};
//!
//! let mut router = SignalRouter::new();
//! let alice = ConnectionId(1);
//!
//! let effects = router.handle(alice, decode(br#"{"type":"login","name":"alice","device":"d1"}"#));
//! assert_eq!(
//!     effects,
//!     vec![Effect::Send {
//!         to: alice,
//!         message: ServerMessage::login_accepted("alice", "d1"),
//!     }]
//! );
//! ```

mod directory;
mod error;
mod protocol;
mod registry;
mod router;
mod sessions;

pub use directory::IdentityDirectory;
pub use error::SignalError;
pub use protocol::{ClientMessage, ServerMessage, decode, encode};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use router::{Effect, RouterStats, SignalRouter};
pub use sessions::SessionTracker;

/// Client-chosen device identifier.
pub type DeviceId = String;
