//! Bounded history of recent qdisc observations.
//!
//! Qdisc delete messages often arrive without a kind attribute, so a delete
//! on an interface is attributed to netem whenever a remembered observation
//! on the same interface was a netem discipline.

use std::collections::VecDeque;

use convmon_netlink::QdiscEvent;

/// Maximum number of remembered qdisc observations.
pub const RING_CAPACITY: usize = 20;

#[derive(Debug, Clone)]
struct RecentQdisc {
    interface: String,
    is_netem: bool,
}

/// Last [`RING_CAPACITY`] qdisc observations, oldest evicted first.
#[derive(Debug, Default)]
pub struct QdiscRing {
    entries: VecDeque<RecentQdisc>,
}

impl QdiscRing {
    /// Remember one qdisc observation.
    pub fn push(&mut self, event: &QdiscEvent) {
        if self.entries.len() == RING_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(RecentQdisc {
            interface: event.interface().to_owned(),
            is_netem: event.is_netem,
        });
    }

    /// Whether any remembered observation on `interface` was netem.
    pub fn netem_seen_on(&self, interface: &str) -> bool {
        self.entries
            .iter()
            .rev()
            .any(|entry| entry.interface == interface && entry.is_netem)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convmon_netlink::{Attrs, QdiscEventKind};

    fn qdisc(interface: &str, is_netem: bool) -> QdiscEvent {
        let mut attrs = Attrs::new();
        attrs.insert("interface".into(), interface.into());
        attrs.insert("is_netem".into(), is_netem.to_string());
        QdiscEvent { timestamp_ms: 0, kind: QdiscEventKind::Add, is_netem, attrs }
    }

    #[test]
    fn remembers_netem_per_interface() {
        let mut ring = QdiscRing::default();
        ring.push(&qdisc("eth0", true));
        ring.push(&qdisc("eth1", false));

        assert!(ring.netem_seen_on("eth0"));
        assert!(!ring.netem_seen_on("eth1"));
        assert!(!ring.netem_seen_on("eth2"));
    }

    #[test]
    fn twenty_first_entry_evicts_the_oldest() {
        let mut ring = QdiscRing::default();
        ring.push(&qdisc("eth0", true));
        for i in 0..RING_CAPACITY {
            ring.push(&qdisc(&format!("dummy{i}"), false));
        }

        assert_eq!(ring.len(), RING_CAPACITY);
        // The netem observation on eth0 was the oldest and is gone.
        assert!(!ring.netem_seen_on("eth0"));

        ring.push(&qdisc("eth0", true));
        assert_eq!(ring.len(), RING_CAPACITY);
        assert!(ring.netem_seen_on("eth0"));
    }
}
