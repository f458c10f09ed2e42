//! Typed kernel events and their attribute vocabulary.
//!
//! Every event carries a flat `string → string` attribute map. The key set
//! and the sentinel values are part of the log-stream interface consumed by
//! the downstream analyzer, so they are fixed here rather than left to the
//! call sites.

use std::collections::BTreeMap;
use std::fmt;

/// Flat attribute map attached to every kernel event.
pub type Attrs = BTreeMap<String, String>;

/// Sentinel for attributes the kernel message did not carry.
pub const NA: &str = "N/A";

/// Destination shown for routes without a destination prefix.
pub const DEFAULT_DESTINATION: &str = "default";

/// A FIB change observed on the routing socket.
#[derive(Debug, Clone)]
pub struct RouteEvent {
    /// Wall-clock receive time, UNIX milliseconds.
    pub timestamp_ms: i64,
    pub kind: RouteEventKind,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEventKind {
    Add,
    Del,
}

impl RouteEventKind {
    /// Stable label used in emitted records.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "route_add",
            Self::Del => "route_del",
        }
    }
}

impl fmt::Display for RouteEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A traffic-control (qdisc) change observed on the routing socket.
#[derive(Debug, Clone)]
pub struct QdiscEvent {
    /// Wall-clock receive time, UNIX milliseconds.
    pub timestamp_ms: i64,
    pub kind: QdiscEventKind,
    /// Whether the qdisc kind reported by the kernel was `netem`.
    ///
    /// Delete messages frequently omit the kind; classifying those is the
    /// session engine's job, via its recent-qdisc history.
    pub is_netem: bool,
    pub attrs: Attrs,
}

impl QdiscEvent {
    /// Interface the qdisc change applies to (`N/A` if unresolvable).
    pub fn interface(&self) -> &str {
        self.attrs.get("interface").map(String::as_str).unwrap_or(NA)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QdiscEventKind {
    Add,
    Del,
    /// Covers both explicit changes and the kernel's `RTM_GETQDISC`
    /// notifications.
    Change,
}

impl QdiscEventKind {
    /// Stable label used in emitted records.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "QDISC_ADD",
            Self::Del => "QDISC_DEL",
            Self::Change => "QDISC_CHANGE",
        }
    }
}

impl fmt::Display for QdiscEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload flowing from the kernel subscriber to the session engine.
#[derive(Debug, Clone)]
pub enum KernelEvent {
    Route(RouteEvent),
    Qdisc(QdiscEvent),
}

impl KernelEvent {
    pub fn timestamp_ms(&self) -> i64 {
        match self {
            Self::Route(event) => event.timestamp_ms,
            Self::Qdisc(event) => event.timestamp_ms,
        }
    }
}
