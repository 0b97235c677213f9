// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Receive path for control datagrams.
//!
//! A datagram is validated, matched to its tunnel or used to bootstrap a new one, and handed to the transport. Every
//! rejection is a local drop counted in [L2tpStats](crate::l2tp::stats::L2tpStats): nothing here is fatal to the
//! process.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    l2tp::{
        channel::{
            ChannelFactory,
            ControlChannel,
        },
        peer::PeerHandle,
        profile::DEFAULT_PROFILE_NAME,
        protocol::{
            avp::{
                self,
                Bootstrap,
            },
            header::{
                ParsedHeader,
                L2TP_MIN_FRAME_LEN,
                L2TP_VERSION,
            },
            packet::ControlPacket,
        },
        registry::Registry,
        transport::Transport,
        tunnel::TunnelHandle,
    },
    runtime::fail::Fail,
};
use ::std::net::{
    Ipv4Addr,
    SocketAddrV4,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// One received datagram.
#[derive(Clone, Debug)]
pub struct Datagram {
    pub buf: Vec<u8>,
    /// Sender, or `None` when the datagram came in on a tunnel's connected socket.
    pub from: Option<SocketAddrV4>,
    /// Local address the datagram was sent to, when the socket reports it.
    pub local: Option<Ipv4Addr>,
}

/// Why a datagram was not delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    ShortFrame,
    BadFrame,
    WrongVersion,
    UnexpectedData,
    MissingSequence,
    NoMatchingTunnel,
    NotTunnelRequest,
    Retransmit,
    NoResources,
    SetupFailed,
    SocketError,
    TransportError,
}

/// What became of a datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Dropped(DropReason),
    Delivered { tunnel: TunnelHandle, created: bool },
}

/// Ties the codec, the object model and the transport together.
pub struct Dispatcher {
    transport: Box<dyn Transport>,
    channels: Box<dyn ChannelFactory>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Datagram {
    pub fn new(buf: Vec<u8>, from: Option<SocketAddrV4>, local: Option<Ipv4Addr>) -> Self {
        Self { buf, from, local }
    }
}

impl Dispatcher {
    pub fn new(transport: Box<dyn Transport>, channels: Box<dyn ChannelFactory>) -> Self {
        Self { transport, channels }
    }

    /// Processes one datagram to completion.
    pub fn dispatch(&mut self, registry: &mut Registry, dgram: Datagram) -> Disposition {
        let total_len: usize = dgram.buf.len();
        if total_len < L2TP_MIN_FRAME_LEN {
            registry.stats_mut().short_frames += 1;
            return Disposition::Dropped(DropReason::ShortFrame);
        }

        let hdr: ParsedHeader = match ParsedHeader::parse(&dgram.buf, total_len) {
            Ok(hdr) => hdr,
            Err(_) => {
                registry.stats_mut().bad_rcvd_frames += 1;
                return Disposition::Dropped(DropReason::BadFrame);
            },
        };
        if hdr.version != L2TP_VERSION {
            registry.stats_mut().wrong_version_frames += 1;
            return Disposition::Dropped(DropReason::WrongVersion);
        }
        // Data frames belong to the kernel data plane.
        if hdr.is_data {
            registry.stats_mut().unexpected_data_frames += 1;
            return Disposition::Dropped(DropReason::UnexpectedData);
        }

        if !hdr.has_length {
            debug!("dispatch(): control message without length bit, accepting");
        }
        if !hdr.has_sequence {
            debug!("dispatch(): control message without sequence bit, discarding");
            registry.stats_mut().bad_rcvd_frames += 1;
            return Disposition::Dropped(DropReason::MissingSequence);
        }
        if hdr.has_offset {
            debug!("dispatch(): control message with offset bit, accepting");
        }
        if hdr.has_priority {
            debug!("dispatch(): control message with priority bit, accepting");
        }

        trace!(
            "dispatch(): received len {} tunl {} ses {} from {:?}",
            total_len,
            hdr.tunnel_id,
            hdr.session_id,
            dgram.from
        );
        // ZLBs are not counted as received frames.
        if hdr.avp_len > 0 {
            registry.stats_mut().total_rcvd_control_frames += 1;
        }
        let pkt: ControlPacket = match ControlPacket::received(dgram.buf, &hdr) {
            Ok(pkt) => pkt,
            Err(_) => {
                registry.stats_mut().bad_rcvd_frames += 1;
                return Disposition::Dropped(DropReason::BadFrame);
            },
        };

        let (tunnel, created): (TunnelHandle, bool) = if hdr.tunnel_id != 0 {
            match registry.tunnel_find_by_id(hdr.tunnel_id) {
                Some(tunnel) => (tunnel, false),
                None => {
                    registry.stats_mut().no_matching_tunnel_id_discards += 1;
                    return Disposition::Dropped(DropReason::NoMatchingTunnel);
                },
            }
        } else {
            let bootstrap: Bootstrap = match avp::preparse(&pkt.avp_region(), pkt.avp_len) {
                Ok(bootstrap) => bootstrap,
                Err(e) if e.is_resource_exhaustion() => {
                    registry.stats_mut().no_control_frame_resources += 1;
                    return Disposition::Dropped(DropReason::NoResources);
                },
                Err(_) => {
                    match dgram.from {
                        Some(from) => debug!("dispatch(): dropping non-SCCRQ from {}", from),
                        None => debug!("dispatch(): dropping non-SCCRQ on tunnel socket"),
                    }
                    registry.stats_mut().no_matching_tunnel_id_discards += 1;
                    return Disposition::Dropped(DropReason::NotTunnelRequest);
                },
            };
            let from: SocketAddrV4 = match dgram.from {
                Some(from) => from,
                None => {
                    debug!("dispatch(): dropping SCCRQ retransmit on tunnel socket");
                    return Disposition::Dropped(DropReason::Retransmit);
                },
            };
            if registry.tunnel_find_by_remote(from).is_some() {
                debug!("dispatch(): dropping SCCRQ retransmit from {}", from);
                return Disposition::Dropped(DropReason::Retransmit);
            }
            match self.bootstrap(registry, from, dgram.local, bootstrap.host_name) {
                Ok(tunnel) => (tunnel, true),
                Err(reason) => {
                    registry.stats_mut().tunnel_setup_failures += 1;
                    return Disposition::Dropped(reason);
                },
            }
        };

        let connected: bool = registry.tunnel(tunnel).map(|t| t.is_connected()).unwrap_or(false);
        if !connected {
            if let Err(e) = registry.tunnel_connect(tunnel, dgram.from) {
                warn!("dispatch(): cannot connect tunnel socket ({:?})", e);
                registry.stats_mut().socket_errors += 1;
                if created {
                    registry.stats_mut().tunnel_setup_failures += 1;
                    release_tunnel(registry, tunnel);
                }
                return Disposition::Dropped(DropReason::SocketError);
            }
        }

        if let Err(e) = registry.tunnel_inc_use_count(tunnel) {
            error!("dispatch(): {:?}", e);
            return Disposition::Dropped(DropReason::TransportError);
        }
        let result: Result<(), Fail> = self.transport.recv(registry, tunnel, pkt);
        if let Err(e) = registry.tunnel_dec_use_count(tunnel) {
            error!("dispatch(): {:?}", e);
        }
        match result {
            Ok(()) => Disposition::Delivered { tunnel, created },
            Err(e) => {
                debug!("dispatch(): transport rejected packet ({:?})", e);
                Disposition::Dropped(DropReason::TransportError)
            },
        }
    }

    /// Creates the peer, tunnel and channel for a new tunnel request. On failure everything acquired so far is
    /// released in reverse order.
    fn bootstrap(
        &mut self,
        registry: &mut Registry,
        from: SocketAddrV4,
        local: Option<Ipv4Addr>,
        host_name: Option<String>,
    ) -> Result<TunnelHandle, DropReason> {
        // A remote peer cannot name a profile before its tunnel exists.
        let (peer_profile_name, tunnel_profile_name): (String, String) =
            match registry.profiles().peer_profile_get(DEFAULT_PROFILE_NAME) {
                Ok(profile) => (profile.name.clone(), profile.default_tunnel_profile_name.clone()),
                Err(e) => {
                    error!("bootstrap(): {:?}", e);
                    return Err(DropReason::SetupFailed);
                },
            };
        debug!(
            "bootstrap(): using peer profile {} for {:?} ({})",
            peer_profile_name, host_name, from
        );

        let local_addr: Ipv4Addr = local.unwrap_or(Ipv4Addr::UNSPECIFIED);
        let peer: PeerHandle = match registry.peer_find(local_addr, *from.ip()) {
            Some(peer) => match registry.peer_inc_use_count(peer) {
                Ok(_) => peer,
                Err(_) => return Err(DropReason::SetupFailed),
            },
            None => match registry.peer_alloc(local_addr, *from.ip()) {
                Ok(peer) => peer,
                Err(e) => return Err(resource_failure(registry, &e)),
            },
        };

        let tunnel: TunnelHandle = match registry.tunnel_alloc(0, &tunnel_profile_name, &peer_profile_name) {
            Ok(tunnel) => tunnel,
            Err(e) => {
                let reason: DropReason = resource_failure(registry, &e);
                release_peer(registry, peer);
                return Err(reason);
            },
        };
        info!(
            "bootstrap(): creating tunnel with profile '{}' for {:?} ({})",
            tunnel_profile_name, host_name, from
        );
        let linked: Result<(), Fail> = registry
            .tunnel_link(tunnel)
            .and_then(|_| registry.tunnel_set_peer_host_name(tunnel, host_name));
        if linked.is_err() {
            release_tunnel(registry, tunnel);
            release_peer(registry, peer);
            return Err(DropReason::SetupFailed);
        }

        let bound: Result<(), Fail> = self
            .channels
            .open(local, from)
            .and_then(|channel: Box<dyn ControlChannel>| registry.tunnel_bind(tunnel, Some(peer), from, channel));
        // The tunnel holds its own reference now.
        release_peer(registry, peer);
        if let Err(e) = bound {
            let reason: DropReason = resource_failure(registry, &e);
            release_tunnel(registry, tunnel);
            return Err(reason);
        }

        if let Err(e) = registry.tunnel_created(tunnel) {
            warn!("bootstrap(): tunnel listener refused tunnel ({:?})", e);
            release_tunnel(registry, tunnel);
            return Err(DropReason::SetupFailed);
        }
        Ok(tunnel)
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn resource_failure(registry: &mut Registry, e: &Fail) -> DropReason {
    if e.is_resource_exhaustion() {
        registry.stats_mut().no_control_frame_resources += 1;
        DropReason::NoResources
    } else {
        DropReason::SetupFailed
    }
}

fn release_peer(registry: &mut Registry, peer: PeerHandle) {
    if let Err(e) = registry.peer_dec_use_count(peer) {
        error!("release_peer(): {:?}", e);
    }
}

fn release_tunnel(registry: &mut Registry, tunnel: TunnelHandle) {
    if let Err(e) = registry.tunnel_release(tunnel) {
        error!("release_tunnel(): {:?}", e);
    }
}
