//! Transport module - socket handling toward the coordinator.
//!
//! The coordinator listens on plain TCP. Everything above this module only
//! needs `AsyncRead + AsyncWrite`, which keeps in-memory transports usable in
//! tests.

mod tcp;

pub use tcp::{connect, Endpoint};
