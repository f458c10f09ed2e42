//! Decoding of raw routing-socket messages into [`KernelEvent`]s.
//!
//! The decoder is deliberately forgiving: a malformed or sparse attribute
//! stream produces a best-effort event with the missing fields set to their
//! sentinels, never an error. Unknown message types decode to `None` and
//! are dropped silently upstream.

use netlink_packet_route::route::{
    RouteAddress, RouteAttribute, RouteMessage, RouteProtocol, RouteScope, RouteType,
};
use netlink_packet_route::tc::{TcAttribute, TcHandle, TcMessage};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};

use crate::event::{
    Attrs, KernelEvent, QdiscEvent, QdiscEventKind, RouteEvent, RouteEventKind, DEFAULT_DESTINATION,
    NA,
};
use crate::wrappers;

/// Qdisc kind attached by the kernel to interfaces without a real qdisc.
/// These messages carry no information about the experiment and are dropped
/// before any further processing.
pub const NOQUEUE: &str = "noqueue";

/// Kind reported when a qdisc message carries no kind attribute at all
/// (typical for deletes).
pub const UNKNOWN_KIND: &str = "unknown";

/// Decode one routing-socket message into a typed event.
///
/// Only route add/del and qdisc add/del/change survive; `RTM_GETQDISC`
/// notifications are folded into `QDISC_CHANGE`. Everything else (links,
/// addresses, neighbours, ...) returns `None`.
pub fn decode(message: RouteNetlinkMessage, timestamp_ms: i64) -> Option<KernelEvent> {
    match message {
        RouteNetlinkMessage::NewRoute(msg) => {
            Some(KernelEvent::Route(parse_route(RouteEventKind::Add, &msg, timestamp_ms)))
        }
        RouteNetlinkMessage::DelRoute(msg) => {
            Some(KernelEvent::Route(parse_route(RouteEventKind::Del, &msg, timestamp_ms)))
        }
        RouteNetlinkMessage::NewQueueDiscipline(msg) => {
            parse_qdisc(QdiscEventKind::Add, &msg, timestamp_ms).map(KernelEvent::Qdisc)
        }
        RouteNetlinkMessage::DelQueueDiscipline(msg) => {
            parse_qdisc(QdiscEventKind::Del, &msg, timestamp_ms).map(KernelEvent::Qdisc)
        }
        RouteNetlinkMessage::GetQueueDiscipline(msg) => {
            parse_qdisc(QdiscEventKind::Change, &msg, timestamp_ms).map(KernelEvent::Qdisc)
        }
        _ => None,
    }
}

/// Decode a route message into its attribute map.
pub fn parse_route(kind: RouteEventKind, msg: &RouteMessage, timestamp_ms: i64) -> RouteEvent {
    let mut attrs = Attrs::new();

    let mut destination = None;
    let mut gateway = None;
    let mut prefsrc = None;
    let mut oif = 0u32;
    let mut priority = None;
    let mut table = u32::from(msg.header.table);

    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Destination(addr) => destination = address_text(addr),
            RouteAttribute::Gateway(addr) => gateway = address_text(addr),
            RouteAttribute::PrefSource(addr) => prefsrc = address_text(addr),
            RouteAttribute::Oif(index) => oif = *index,
            RouteAttribute::Priority(value) => priority = Some(*value),
            RouteAttribute::Table(value) => table = *value,
            _ => {}
        }
    }

    attrs.insert(
        "destination".into(),
        destination.map_or_else(
            || DEFAULT_DESTINATION.to_owned(),
            |dst| format!("{dst}/{}", msg.header.destination_prefix_length),
        ),
    );
    attrs.insert("gateway".into(), gateway.unwrap_or_else(|| NA.to_owned()));
    if oif > 0 {
        attrs.insert("interface".into(), interface_name(oif));
        attrs.insert("ifindex".into(), oif.to_string());
    } else {
        attrs.insert("interface".into(), NA.to_owned());
        attrs.insert("ifindex".into(), "0".into());
    }
    attrs.insert("family".into(), family_token(msg.header.address_family));
    attrs.insert("table".into(), table.to_string());
    attrs.insert("protocol".into(), protocol_token(msg.header.protocol));
    attrs.insert("scope".into(), scope_token(msg.header.scope));
    attrs.insert("type".into(), route_type_token(msg.header.kind));
    attrs.insert("prefsrc".into(), prefsrc.unwrap_or_else(|| NA.to_owned()));
    attrs.insert(
        "priority".into(),
        priority.map_or_else(|| NA.to_owned(), |p| p.to_string()),
    );

    RouteEvent { timestamp_ms, kind, attrs }
}

/// Decode a qdisc message into its attribute map.
///
/// Returns `None` for `noqueue` qdiscs.
pub fn parse_qdisc(
    kind: QdiscEventKind,
    msg: &TcMessage,
    timestamp_ms: i64,
) -> Option<QdiscEvent> {
    let qdisc_kind = msg
        .attributes
        .iter()
        .find_map(|attr| match attr {
            TcAttribute::Kind(name) => Some(name.as_str()),
            _ => None,
        })
        .unwrap_or(UNKNOWN_KIND);

    if qdisc_kind == NOQUEUE {
        return None;
    }

    let is_netem = qdisc_kind == "netem";
    let mut attrs = Attrs::new();

    let ifindex = msg.header.index;
    if ifindex > 0 {
        attrs.insert("interface".into(), interface_name(ifindex as u32));
        attrs.insert("ifindex".into(), ifindex.to_string());
    } else {
        attrs.insert("interface".into(), NA.to_owned());
        attrs.insert("ifindex".into(), "0".into());
    }
    attrs.insert("handle".into(), handle_text(msg.header.handle));
    attrs.insert("parent".into(), handle_text(msg.header.parent));
    attrs.insert("kind".into(), qdisc_kind.to_owned());
    attrs.insert("is_netem".into(), is_netem.to_string());

    Some(QdiscEvent { timestamp_ms, kind, is_netem, attrs })
}

/// Resolve an interface index, falling back to `if<index>` for devices the
/// kernel has already forgotten about.
fn interface_name(ifindex: u32) -> String {
    wrappers::if_indextoname(ifindex).unwrap_or_else(|| format!("if{ifindex}"))
}

fn address_text(addr: &RouteAddress) -> Option<String> {
    match addr {
        RouteAddress::Inet(v4) => Some(v4.to_string()),
        RouteAddress::Inet6(v6) => Some(v6.to_string()),
        _ => None,
    }
}

fn handle_text(handle: TcHandle) -> String {
    format!("{:x}:{:x}", handle.major, handle.minor)
}

fn family_token(family: AddressFamily) -> String {
    match family {
        AddressFamily::Inet => "inet".to_owned(),
        AddressFamily::Inet6 => "inet6".to_owned(),
        other => u8::from(other).to_string(),
    }
}

fn protocol_token(protocol: RouteProtocol) -> String {
    let token = match protocol {
        RouteProtocol::Unspec => "unspec",
        RouteProtocol::IcmpRedirect => "redirect",
        RouteProtocol::Kernel => "kernel",
        RouteProtocol::Boot => "boot",
        RouteProtocol::Static => "static",
        RouteProtocol::Ra => "ra",
        RouteProtocol::Dhcp => "dhcp",
        RouteProtocol::Mrouted => "mrouted",
        RouteProtocol::Zebra => "zebra",
        RouteProtocol::Bird => "bird",
        RouteProtocol::Babel => "babel",
        RouteProtocol::Bgp => "bgp",
        RouteProtocol::Isis => "isis",
        RouteProtocol::Ospf => "ospf",
        RouteProtocol::Rip => "rip",
        RouteProtocol::Eigrp => "eigrp",
        other => return u8::from(other).to_string(),
    };
    token.to_owned()
}

fn scope_token(scope: RouteScope) -> String {
    let token = match scope {
        RouteScope::Universe => "universe",
        RouteScope::Site => "site",
        RouteScope::Link => "link",
        RouteScope::Host => "host",
        RouteScope::NoWhere => "nowhere",
        other => return u8::from(other).to_string(),
    };
    token.to_owned()
}

fn route_type_token(kind: RouteType) -> String {
    let token = match kind {
        RouteType::Unspec => "unspec",
        RouteType::Unicast => "unicast",
        RouteType::Local => "local",
        RouteType::Broadcast => "broadcast",
        RouteType::Anycast => "anycast",
        RouteType::Multicast => "multicast",
        RouteType::BlackHole => "blackhole",
        RouteType::Unreachable => "unreachable",
        RouteType::Prohibit => "prohibit",
        RouteType::Throw => "throw",
        RouteType::Nat => "nat",
        other => return u8::from(other).to_string(),
    };
    token.to_owned()
}
