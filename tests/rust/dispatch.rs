// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::{
    CaptureTransport,
    Handoff,
    MockFactory,
    Recorder,
    LOCAL,
    REMOTE,
};
use ::anyhow::Result;
use ::crossbeam_channel::Receiver;
use ::l2tpd::{
    ensure_eq,
    l2tp::{
        peer::PeerHandle,
        protocol::{
            avp,
            MessageType,
        },
        tunnel::TunnelHandle,
    },
    Dispatcher,
    Disposition,
    DropReason,
    L2tpStats,
    Registry,
};
use ::std::{
    cell::RefCell,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

struct Harness {
    registry: Registry,
    dispatcher: Dispatcher,
    factory: MockFactory,
    handoffs: Receiver<Handoff>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Harness {
    fn new() -> Result<Self> {
        let (transport, handoffs): (CaptureTransport, Receiver<Handoff>) = CaptureTransport::new();
        Self::with_transport(transport, handoffs)
    }

    fn with_transport(transport: CaptureTransport, handoffs: Receiver<Handoff>) -> Result<Self> {
        let factory: MockFactory = MockFactory::new();
        Ok(Self {
            registry: common::registry()?,
            dispatcher: Dispatcher::new(Box::new(transport), Box::new(factory.clone())),
            factory,
            handoffs,
        })
    }

    fn from_remote(&mut self, buf: Vec<u8>, port: u16) -> Disposition {
        self.dispatcher.dispatch(&mut self.registry, common::from_remote(buf, port))
    }

    fn nothing_created(&self) -> Result<()> {
        ensure_eq!(self.registry.peer_count(), 0);
        ensure_eq!(self.registry.tunnel_count(), 0);
        ensure_eq!(self.factory.opened(), 0);
        ensure_eq!(self.handoffs.try_recv().is_err(), true);
        Ok(())
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Counters with only the named fields set.
fn stats(f: impl FnOnce(&mut L2tpStats)) -> L2tpStats {
    let mut stats: L2tpStats = L2tpStats::default();
    f(&mut stats);
    stats
}

fn delivered_tunnel(disposition: Disposition, expect_created: bool) -> Result<TunnelHandle> {
    match disposition {
        Disposition::Delivered { tunnel, created } => {
            ensure_eq!(created, expect_created);
            Ok(tunnel)
        },
        other => anyhow::bail!("expected delivery, got {:?}", other),
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[test]
fn two_byte_frame_is_short() -> Result<()> {
    let mut harness: Harness = Harness::new()?;

    let disposition: Disposition = harness.from_remote(vec![0xc8, 0x02], 1701);
    ensure_eq!(disposition, Disposition::Dropped(DropReason::ShortFrame));
    ensure_eq!(*harness.registry.stats(), stats(|s| s.short_frames = 1));
    harness.nothing_created()
}

#[test]
fn sccrq_bootstraps_peer_and_tunnel() -> Result<()> {
    let mut harness: Harness = Harness::new()?;
    let log: Rc<RefCell<Vec<String>>> = Recorder::register(&mut harness.registry, false);

    let disposition: Disposition = harness.from_remote(common::sccrq("lac.example.net", 0x4444)?, 1701);
    let tunnel: TunnelHandle = delivered_tunnel(disposition, true)?;

    ensure_eq!(harness.registry.peer_count(), 1);
    ensure_eq!(harness.registry.tunnel_count(), 1);
    let peer: PeerHandle = match harness.registry.peer_find(LOCAL, REMOTE) {
        Some(peer) => peer,
        None => anyhow::bail!("peer was not indexed"),
    };
    // The tunnel holds the only peer reference, and its own link reference is all that is left after delivery.
    ensure_eq!(harness.registry.peer(peer).map(|p| p.use_count()), Some(1));
    ensure_eq!(harness.registry.tunnel(tunnel).map(|t| t.use_count()), Some(1));
    ensure_eq!(harness.registry.tunnel(tunnel).map(|t| t.peer()), Some(Some(peer)));
    ensure_eq!(
        harness.registry.tunnel(tunnel).and_then(|t| t.peer_host_name().map(str::to_string)),
        Some("lac.example.net".to_string())
    );
    ensure_eq!(harness.registry.tunnel_find_by_remote(common::remote(1701)), Some(tunnel));

    let handoff: Handoff = harness.handoffs.try_recv()?;
    ensure_eq!(handoff.tunnel, tunnel);
    ensure_eq!(handoff.message_type, Some(MessageType::Sccrq));
    ensure_eq!(harness.handoffs.try_recv().is_err(), true);

    ensure_eq!(harness.factory.opened(), 1);
    ensure_eq!(harness.factory.channel(0).borrow().connects, vec![common::remote(1701)]);
    ensure_eq!(*log.borrow(), vec!["tunnel 0".to_string()]);
    ensure_eq!(harness.registry.stats().total_rcvd_control_frames, 1);
    Ok(())
}

#[test]
fn sccrq_replay_is_a_retransmit() -> Result<()> {
    let mut harness: Harness = Harness::new()?;
    let frame: Vec<u8> = common::sccrq("lac.example.net", 0x4444)?;

    delivered_tunnel(harness.from_remote(frame.clone(), 1701), true)?;
    harness.handoffs.try_recv()?;

    ensure_eq!(
        harness.from_remote(frame.clone(), 1701),
        Disposition::Dropped(DropReason::Retransmit)
    );
    ensure_eq!(harness.registry.tunnel_count(), 1);
    ensure_eq!(harness.registry.peer_count(), 1);
    ensure_eq!(harness.factory.opened(), 1);
    ensure_eq!(harness.handoffs.try_recv().is_err(), true);
    ensure_eq!(harness.registry.stats().tunnel_setup_failures, 0);

    // Once connected, a replay arrives on the tunnel socket without a sender address.
    let disposition: Disposition = harness
        .dispatcher
        .dispatch(&mut harness.registry, common::on_tunnel_socket(frame));
    ensure_eq!(disposition, Disposition::Dropped(DropReason::Retransmit));
    ensure_eq!(harness.registry.tunnel_count(), 1);
    Ok(())
}

#[test]
fn data_frame_is_not_for_the_control_plane() -> Result<()> {
    let mut harness: Harness = Harness::new()?;

    let frame: Vec<u8> = vec![0x00, 0x02, 0x00, 0x01, 0x00, 0x01, 0xff, 0x03];
    ensure_eq!(
        harness.from_remote(frame, 1701),
        Disposition::Dropped(DropReason::UnexpectedData)
    );
    ensure_eq!(*harness.registry.stats(), stats(|s| s.unexpected_data_frames = 1));
    harness.nothing_created()
}

#[test]
fn wrong_version_is_counted() -> Result<()> {
    let mut harness: Harness = Harness::new()?;

    let mut frame: Vec<u8> = common::sccrq("lac", 1)?;
    frame[1] = 0x03;
    ensure_eq!(
        harness.from_remote(frame, 1701),
        Disposition::Dropped(DropReason::WrongVersion)
    );
    ensure_eq!(*harness.registry.stats(), stats(|s| s.wrong_version_frames = 1));
    harness.nothing_created()
}

#[test]
fn truncated_frame_is_bad() -> Result<()> {
    let mut harness: Harness = Harness::new()?;

    let mut frame: Vec<u8> = common::sccrq("lac", 1)?;
    frame.truncate(frame.len() - 4);
    ensure_eq!(harness.from_remote(frame, 1701), Disposition::Dropped(DropReason::BadFrame));
    ensure_eq!(*harness.registry.stats(), stats(|s| s.bad_rcvd_frames = 1));
    harness.nothing_created()
}

#[test]
fn control_frame_without_sequence_bit_is_bad() -> Result<()> {
    let mut harness: Harness = Harness::new()?;

    // T and L set, S clear: tunnel 5, session 0, no attributes.
    let frame: Vec<u8> = vec![0xc0, 0x02, 0x00, 0x08, 0x00, 0x05, 0x00, 0x00];
    ensure_eq!(
        harness.from_remote(frame, 1701),
        Disposition::Dropped(DropReason::MissingSequence)
    );
    ensure_eq!(*harness.registry.stats(), stats(|s| s.bad_rcvd_frames = 1));
    harness.nothing_created()
}

#[test]
fn unknown_tunnel_id_is_discarded() -> Result<()> {
    let mut harness: Harness = Harness::new()?;

    let frame: Vec<u8> = common::message(0x1234, 0, 0, 0, MessageType::Hello, &[])?;
    ensure_eq!(
        harness.from_remote(frame, 1701),
        Disposition::Dropped(DropReason::NoMatchingTunnel)
    );
    ensure_eq!(harness.registry.stats().no_matching_tunnel_id_discards, 1);
    harness.nothing_created()
}

#[test]
fn zero_id_without_message_type_opens_nothing() -> Result<()> {
    let mut harness: Harness = Harness::new()?;

    let host_name_avp: Vec<u8> = avp::encode_host_name("lac")?;
    let frame: Vec<u8> = common::control_frame(0, 0, 0, 0, &[&host_name_avp])?;
    ensure_eq!(
        harness.from_remote(frame, 1701),
        Disposition::Dropped(DropReason::NotTunnelRequest)
    );
    ensure_eq!(harness.registry.stats().no_matching_tunnel_id_discards, 1);
    harness.nothing_created()
}

#[test]
fn zero_id_non_sccrq_opens_nothing() -> Result<()> {
    let mut harness: Harness = Harness::new()?;

    let frame: Vec<u8> = common::message(0, 0, 0, 0, MessageType::Icrq, &[])?;
    ensure_eq!(
        harness.from_remote(frame, 1701),
        Disposition::Dropped(DropReason::NotTunnelRequest)
    );
    ensure_eq!(harness.registry.stats().no_matching_tunnel_id_discards, 1);
    ensure_eq!(harness.registry.stats().tunnel_setup_failures, 0);
    harness.nothing_created()
}

#[test]
fn sccrq_without_length_field_opens_nothing() -> Result<()> {
    let mut harness: Harness = Harness::new()?;

    // Same request with the L bit cleared and the length field removed: the attributes are no longer read.
    let mut frame: Vec<u8> = common::sccrq("lac.example.net", 0x4444)?;
    frame[0] &= !0x40;
    frame.drain(2..4);
    ensure_eq!(
        harness.from_remote(frame, 1701),
        Disposition::Dropped(DropReason::NotTunnelRequest)
    );
    ensure_eq!(
        *harness.registry.stats(),
        stats(|s| s.no_matching_tunnel_id_discards = 1)
    );
    harness.nothing_created()
}

#[test]
fn peer_is_shared_across_tunnels() -> Result<()> {
    let mut harness: Harness = Harness::new()?;

    let first: TunnelHandle = delivered_tunnel(harness.from_remote(common::sccrq("lac", 1)?, 1701), true)?;
    let second: TunnelHandle = delivered_tunnel(harness.from_remote(common::sccrq("lac", 2)?, 1702), true)?;
    ensure_eq!(first == second, false);

    ensure_eq!(harness.registry.peer_count(), 1);
    ensure_eq!(harness.registry.tunnel_count(), 2);
    let peer: PeerHandle = match harness.registry.peer_find(LOCAL, REMOTE) {
        Some(peer) => peer,
        None => anyhow::bail!("peer was not indexed"),
    };
    ensure_eq!(harness.registry.peer(peer).map(|p| p.use_count()), Some(2));

    harness.registry.tunnel_release(first)?;
    ensure_eq!(harness.registry.peer(peer).map(|p| p.use_count()), Some(1));
    harness.registry.tunnel_release(second)?;
    ensure_eq!(harness.registry.peer_count(), 0);
    Ok(())
}

#[test]
fn channel_exhaustion_rolls_back() -> Result<()> {
    let mut harness: Harness = Harness::new()?;
    harness.factory.fail_open(libc::ENOMEM);

    ensure_eq!(
        harness.from_remote(common::sccrq("lac", 1)?, 1701),
        Disposition::Dropped(DropReason::NoResources)
    );
    ensure_eq!(
        *harness.registry.stats(),
        stats(|s| {
            s.total_rcvd_control_frames = 1;
            s.no_control_frame_resources = 1;
            s.tunnel_setup_failures = 1;
        })
    );
    harness.nothing_created()
}

#[test]
fn channel_failure_rolls_back() -> Result<()> {
    let mut harness: Harness = Harness::new()?;
    harness.factory.fail_open(libc::EADDRINUSE);

    ensure_eq!(
        harness.from_remote(common::sccrq("lac", 1)?, 1701),
        Disposition::Dropped(DropReason::SetupFailed)
    );
    ensure_eq!(harness.registry.stats().tunnel_setup_failures, 1);
    ensure_eq!(harness.registry.stats().no_control_frame_resources, 0);
    harness.nothing_created()
}

#[test]
fn connect_failure_releases_new_tunnel() -> Result<()> {
    let mut harness: Harness = Harness::new()?;
    harness.factory.fail_connect();

    ensure_eq!(
        harness.from_remote(common::sccrq("lac", 1)?, 1701),
        Disposition::Dropped(DropReason::SocketError)
    );
    ensure_eq!(harness.registry.stats().socket_errors, 1);
    ensure_eq!(harness.registry.stats().tunnel_setup_failures, 1);
    ensure_eq!(harness.registry.peer_count(), 0);
    ensure_eq!(harness.registry.tunnel_count(), 0);
    ensure_eq!(harness.registry.tunnel_find_by_remote(common::remote(1701)), None);
    ensure_eq!(harness.handoffs.try_recv().is_err(), true);
    Ok(())
}

#[test]
fn disabled_tunnel_creation_is_a_policy_refusal() -> Result<()> {
    let mut harness: Harness = Harness::new()?;
    harness.registry.config_mut().tunnel_creation_enabled = false;

    ensure_eq!(
        harness.from_remote(common::sccrq("lac", 1)?, 1701),
        Disposition::Dropped(DropReason::SetupFailed)
    );
    ensure_eq!(harness.registry.stats().too_many_tunnels, 1);
    ensure_eq!(harness.registry.stats().tunnel_setup_failures, 1);
    ensure_eq!(harness.registry.stats().no_control_frame_resources, 0);
    harness.nothing_created()
}

#[test]
fn refused_tunnel_is_released() -> Result<()> {
    let mut harness: Harness = Harness::new()?;
    let log: Rc<RefCell<Vec<String>>> = Recorder::register(&mut harness.registry, true);

    ensure_eq!(
        harness.from_remote(common::sccrq("lac", 1)?, 1701),
        Disposition::Dropped(DropReason::SetupFailed)
    );
    ensure_eq!(*log.borrow(), vec!["tunnel 0".to_string()]);
    ensure_eq!(harness.registry.peer_count(), 0);
    ensure_eq!(harness.registry.tunnel_count(), 0);
    ensure_eq!(harness.handoffs.try_recv().is_err(), true);
    Ok(())
}

#[test]
fn transport_failure_keeps_the_tunnel() -> Result<()> {
    let (transport, handoffs): (CaptureTransport, Receiver<Handoff>) = CaptureTransport::failing();
    let mut harness: Harness = Harness::with_transport(transport, handoffs)?;

    ensure_eq!(
        harness.from_remote(common::sccrq("lac", 1)?, 1701),
        Disposition::Dropped(DropReason::TransportError)
    );
    ensure_eq!(harness.handoffs.try_recv().is_ok(), true);
    // The transport owns the fate of a tunnel once it has seen a packet for it.
    ensure_eq!(harness.registry.tunnel_count(), 1);
    let tunnel: Option<TunnelHandle> = harness.registry.tunnel_find_by_remote(common::remote(1701));
    ensure_eq!(
        tunnel.and_then(|t| harness.registry.tunnel(t)).map(|t| t.use_count()),
        Some(1)
    );
    Ok(())
}

#[test]
fn zlb_is_delivered_but_not_counted() -> Result<()> {
    let mut harness: Harness = Harness::new()?;

    let tunnel: TunnelHandle = delivered_tunnel(harness.from_remote(common::sccrq("lac", 1)?, 1701), true)?;
    harness.handoffs.try_recv()?;
    let tunnel_id: u16 = harness.registry.tunnel_assign_id(tunnel)?;

    let zlb: Vec<u8> = common::control_frame(tunnel_id, 0, 1, 1, &[])?;
    let disposition: Disposition = harness.from_remote(zlb, 1701);
    ensure_eq!(delivered_tunnel(disposition, false)?, tunnel);
    ensure_eq!(harness.registry.stats().total_rcvd_control_frames, 1);

    let handoff: Handoff = harness.handoffs.try_recv()?;
    ensure_eq!(handoff.message_type, None);
    ensure_eq!((handoff.ns, handoff.nr), (1, 1));
    Ok(())
}
