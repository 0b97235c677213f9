// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    l2tp::{
        protocol::{
            avp,
            header::ControlHeader,
            packet::ControlPacket,
            MessageType,
        },
        registry::Registry,
        session::{
            SessionEvent,
            SessionHandle,
        },
        tunnel::{
            TunnelEvent,
            TunnelHandle,
        },
    },
    runtime::fail::Fail,
};
use ::libc::EBADMSG;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Receives control packets once the dispatcher has resolved the tunnel they belong to.
pub trait Transport {
    fn recv(&mut self, registry: &mut Registry, tunnel: TunnelHandle, pkt: ControlPacket) -> Result<(), Fail>;
}

/// In-order control channel: accepts the next expected Ns only, acknowledges everything it accepts or has already
/// seen, and drives the tunnel and session state machines.
#[derive(Default)]
pub struct SequencedTransport {}

/// Where a reply goes and what it identifies.
#[derive(Clone, Copy)]
struct Reply {
    peer_tunnel_id: u16,
    peer_session_id: u16,
    tunnel_id: u16,
    session_id: u16,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl SequencedTransport {
    pub fn new() -> Self {
        Self {}
    }

    fn deliver(
        &mut self,
        registry: &mut Registry,
        tunnel: TunnelHandle,
        pkt: &ControlPacket,
        message_type: MessageType,
    ) -> Result<(), Fail> {
        let payload: Vec<u8> = pkt.avp_region().into_owned();

        if let Some(event) = TunnelEvent::from_message(message_type) {
            if let Some(peer_tunnel_id) = avp::assigned_tunnel_id(&payload)? {
                registry.tunnel_set_peer_tunnel_id(tunnel, peer_tunnel_id)?;
            }
            let reply: Reply = tunnel_reply(registry, tunnel)?;
            let outbox: Vec<MessageType> = registry.tunnel_handle_event(tunnel, event)?;
            // The reply carries the id the state machine may just have assigned.
            let reply: Reply = match registry.tunnel(tunnel) {
                Some(t) => Reply {
                    tunnel_id: t.tunnel_id(),
                    ..reply
                },
                None => reply,
            };
            return self.flush(registry, tunnel, reply, outbox);
        }

        if let Some(event) = SessionEvent::from_message(message_type) {
            let session: SessionHandle = if event == SessionEvent::RxIcrq {
                let session: SessionHandle = registry.session_alloc(tunnel, None)?;
                if let Some(peer_session_id) = avp::assigned_session_id(&payload)? {
                    registry.session_set_peer_session_id(session, peer_session_id)?;
                }
                session
            } else {
                match registry.session_find(tunnel, pkt.session_id) {
                    Some(session) => session,
                    None => {
                        registry.stats_mut().no_matching_session_id_discards += 1;
                        debug!(
                            "deliver(): no session {} for {}, discarding",
                            pkt.session_id, message_type
                        );
                        let reply: Reply = tunnel_reply(registry, tunnel)?;
                        return self.flush(registry, tunnel, reply, Vec::new());
                    },
                }
            };
            let reply: Reply = session_reply(registry, tunnel, session)?;
            let outbox: Vec<MessageType> = registry.session_handle_event(session, event)?;
            return self.flush(registry, tunnel, reply, outbox);
        }

        trace!("deliver(): {} needs no state change", message_type);
        let reply: Reply = tunnel_reply(registry, tunnel)?;
        self.flush(registry, tunnel, reply, Vec::new())
    }

    /// Sends queued messages, or a ZLB acknowledgement when nothing is queued.
    fn flush(
        &mut self,
        registry: &mut Registry,
        tunnel: TunnelHandle,
        reply: Reply,
        outbox: Vec<MessageType>,
    ) -> Result<(), Fail> {
        let (mut ns, nr): (u16, u16) = match registry.tunnel(tunnel) {
            Some(t) => (t.next_ns(), t.expected_ns()),
            None => return Ok(()),
        };
        if outbox.is_empty() {
            let header: ControlHeader = ControlHeader::new(reply.peer_tunnel_id, 0, ns, nr);
            let zlb: ControlPacket = ControlPacket::build_message(header, None)?;
            registry.tunnel_send(tunnel, &zlb)?;
            return Ok(());
        }
        for message_type in outbox {
            let header: ControlHeader = ControlHeader::new(reply.peer_tunnel_id, reply.peer_session_id, ns, nr);
            let pkt: ControlPacket = ControlPacket::build(header, encode_reply(registry, tunnel, reply, message_type)?)?;
            registry.tunnel_send(tunnel, &pkt)?;
            registry.stats_mut().count_tx(message_type);
            ns = ns.wrapping_add(1);
            registry.tunnel_set_sequence(tunnel, ns, nr)?;
        }
        Ok(())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Transport for SequencedTransport {
    fn recv(&mut self, registry: &mut Registry, tunnel: TunnelHandle, pkt: ControlPacket) -> Result<(), Fail> {
        let (ns, expected): (u16, u16) = match registry.tunnel(tunnel) {
            Some(t) => (t.next_ns(), t.expected_ns()),
            None => {
                let cause: String = format!("tunnel vanished before delivery");
                error!("recv(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };

        if pkt.is_zlb() {
            trace!("recv(): zlb ns={} nr={}", pkt.ns, pkt.nr);
            return Ok(());
        }

        if pkt.ns != expected {
            if seq_before(pkt.ns, expected) {
                // Already seen: the peer missed our acknowledgement.
                debug!("recv(): duplicate ns={} (expected {}), re-acknowledging", pkt.ns, expected);
                let reply: Reply = tunnel_reply(registry, tunnel)?;
                return self.flush(registry, tunnel, reply, Vec::new());
            }
            debug!("recv(): out of order ns={} (expected {}), discarding", pkt.ns, expected);
            return Ok(());
        }

        let message_type: MessageType = match pkt.message_type() {
            Ok(Some(message_type)) => message_type,
            Ok(None) | Err(_) => {
                registry.stats_mut().bad_rcvd_frames += 1;
                let cause: String = format!("control message does not start with a message type");
                debug!("recv(): {}", cause);
                return Err(Fail::new(EBADMSG, &cause));
            },
        };
        registry.tunnel_set_sequence(tunnel, ns, expected.wrapping_add(1))?;
        registry.stats_mut().count_rx(message_type);

        if let Err(e) = self.deliver(registry, tunnel, &pkt, message_type) {
            registry.stats_mut().count_rx_bad(message_type);
            return Err(e);
        }
        Ok(())
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Checks whether `a` precedes `b` in 16-bit serial number arithmetic.
fn seq_before(a: u16, b: u16) -> bool {
    (b.wrapping_sub(a) as i16) > 0
}

fn tunnel_reply(registry: &Registry, tunnel: TunnelHandle) -> Result<Reply, Fail> {
    match registry.tunnel(tunnel) {
        Some(t) => Ok(Reply {
            peer_tunnel_id: t.peer_tunnel_id(),
            peer_session_id: 0,
            tunnel_id: t.tunnel_id(),
            session_id: 0,
        }),
        None => Err(Fail::new(libc::EINVAL, "tunnel vanished")),
    }
}

fn session_reply(registry: &Registry, tunnel: TunnelHandle, session: SessionHandle) -> Result<Reply, Fail> {
    let reply: Reply = tunnel_reply(registry, tunnel)?;
    match registry.session(session) {
        Some(s) => Ok(Reply {
            peer_session_id: s.ids().peer_session_id,
            session_id: s.session_id(),
            ..reply
        }),
        None => Err(Fail::new(libc::EINVAL, "session vanished")),
    }
}

fn encode_reply(
    registry: &Registry,
    tunnel: TunnelHandle,
    reply: Reply,
    message_type: MessageType,
) -> Result<Vec<u8>, Fail> {
    let mut payload: Vec<u8> = avp::encode_message_type(message_type).to_vec();
    match message_type {
        MessageType::Sccrq | MessageType::Sccrp => {
            let host_name: &str = registry.tunnel(tunnel).map(|t| t.host_name()).unwrap_or("l2tpd");
            payload.extend_from_slice(&avp::encode_host_name(host_name)?);
            payload.extend_from_slice(&avp::encode_assigned_tunnel_id(reply.tunnel_id));
        },
        MessageType::StopCcn => payload.extend_from_slice(&avp::encode_assigned_tunnel_id(reply.tunnel_id)),
        MessageType::Icrq | MessageType::Icrp | MessageType::Cdn => {
            payload.extend_from_slice(&avp::encode_assigned_session_id(reply.session_id))
        },
        _ => (),
    }
    Ok(payload)
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
