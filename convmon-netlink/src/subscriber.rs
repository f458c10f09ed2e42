//! Routing-socket subscription.
//!
//! One rtnetlink connection is bound to the union of the IPv4-route,
//! IPv6-route and traffic-control multicast groups; the connection task owns
//! the socket I/O while a demux task filters, decodes and forwards events in
//! kernel delivery order. Transient socket errors (EINTR/EAGAIN) are retried
//! inside the connection task and never surface here.

use std::io;

use futures::StreamExt;
use netlink_sys::{AsyncSocket, SocketAddr};
use nix::libc::{RTMGRP_IPV4_ROUTE, RTMGRP_IPV6_ROUTE, RTMGRP_TC};
use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
use netlink_packet_route::RouteNetlinkMessage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::KernelEvent;
use crate::{parse, unix_millis};

/// Errors that can occur while setting up the kernel subscription.
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("failed to open routing socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to join routing multicast groups: {0}")]
    Groups(#[source] io::Error),
}

/// Subscribes to kernel route and qdisc notifications and forwards them,
/// decoded, over a bounded channel.
///
/// The channel's backpressure is the only flow control: events are awaited
/// into it in delivery order and never reordered or silently dropped.
pub struct KernelSubscriber {
    events: mpsc::Sender<KernelEvent>,
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
    connection: Option<JoinHandle<()>>,
    running: bool,
}

impl KernelSubscriber {
    pub fn new(events: mpsc::Sender<KernelEvent>) -> Self {
        Self {
            events,
            cancel: CancellationToken::new(),
            reader: None,
            connection: None,
            running: false,
        }
    }

    /// Open the routing socket, join the multicast groups and start the
    /// connection and demux tasks. Calling `start` on a running subscriber
    /// is a no-op.
    pub fn start(&mut self) -> Result<(), SubscribeError> {
        if self.running {
            return Ok(());
        }

        let (mut connection, handle, mut messages) =
            rtnetlink::new_connection().map_err(SubscribeError::Socket)?;

        let groups = (RTMGRP_IPV4_ROUTE | RTMGRP_IPV6_ROUTE | RTMGRP_TC) as u32;
        connection
            .socket_mut()
            .socket_mut()
            .bind(&SocketAddr::new(0, groups))
            .map_err(SubscribeError::Groups)?;

        self.connection = Some(tokio::spawn(connection));

        let events = self.events.clone();
        let cancel = self.cancel.clone();
        self.reader = Some(tokio::spawn(async move {
            // The handle is unused but keeps the connection's request
            // channel open for the lifetime of the subscription.
            let _handle = handle;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe = messages.next() => {
                        let Some((message, _source)) = maybe else { break };
                        if !forward(message, &events).await {
                            break;
                        }
                    }
                }
            }

            debug!("kernel subscriber reader finished");
        }));

        self.running = true;
        Ok(())
    }

    /// Cancel the subscription, interrupting any outstanding socket wait,
    /// and join the demux task. Calling `stop` on a stopped subscriber is a
    /// no-op.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
        if let Some(connection) = self.connection.take() {
            // The connection future never completes on its own; abort it
            // and swallow the resulting cancellation error.
            connection.abort();
            let _ = connection.await;
        }
    }
}

/// Decode and forward one message. Returns `false` when the engine side of
/// the channel is gone and the reader should stop.
async fn forward(
    message: NetlinkMessage<RouteNetlinkMessage>,
    events: &mpsc::Sender<KernelEvent>,
) -> bool {
    match message.payload {
        NetlinkPayload::InnerMessage(inner) => {
            if let Some(event) = parse::decode(inner, unix_millis()) {
                if events.send(event).await.is_err() {
                    return false;
                }
            }
        }
        NetlinkPayload::Error(e) => {
            warn!(error = ?e, "routing socket reported an error");
        }
        _ => {}
    }
    true
}
