//! Kernel-side plumbing for the routing-convergence observer.
//!
//! This crate owns everything that touches the routing socket: the
//! multicast-group subscription ([`KernelSubscriber`]) and the decoding of
//! raw route / traffic-control messages into the typed, string-keyed events
//! ([`RouteEvent`], [`QdiscEvent`]) that the session engine consumes.
//! Nothing in here knows about sessions or convergence.

use std::time::SystemTime;

pub mod event;
pub mod parse;
pub mod subscriber;
pub(crate) mod wrappers;

pub use event::{Attrs, KernelEvent, QdiscEvent, QdiscEventKind, RouteEvent, RouteEventKind};
pub use subscriber::{KernelSubscriber, SubscribeError};

/// Returns the current UNIX timestamp in milliseconds.
#[inline]
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}
