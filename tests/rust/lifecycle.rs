// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::{
    MockFactory,
    Recorder,
};
use ::anyhow::Result;
use ::l2tpd::{
    ensure_eq,
    l2tp::{
        protocol::{
            avp,
            header::ParsedHeader,
            MessageType,
        },
        transport::SequencedTransport,
        tunnel::{
            TunnelHandle,
            TunnelState,
        },
    },
    Dispatcher,
    Disposition,
    L2tpStats,
    Registry,
};
use ::std::{
    cell::RefCell,
    rc::Rc,
};

//======================================================================================================================
// Constants
//======================================================================================================================

const PEER_TUNNEL_ID: u16 = 0x4444;
const PEER_SESSION_ID: u16 = 0x0077;
const PORT: u16 = 1701;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A control message the engine sent, decoded.
#[derive(Debug)]
struct Sent {
    tunnel_id: u16,
    session_id: u16,
    ns: u16,
    nr: u16,
    message_type: Option<MessageType>,
    assigned_tunnel_id: Option<u16>,
    assigned_session_id: Option<u16>,
}

struct Harness {
    registry: Registry,
    dispatcher: Dispatcher,
    factory: MockFactory,
    log: Rc<RefCell<Vec<String>>>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Harness {
    fn new() -> Result<Self> {
        let mut registry: Registry = common::registry()?;
        let log: Rc<RefCell<Vec<String>>> = Recorder::register(&mut registry, false);
        let factory: MockFactory = MockFactory::new();
        Ok(Self {
            registry,
            dispatcher: Dispatcher::new(Box::new(SequencedTransport::new()), Box::new(factory.clone())),
            factory,
            log,
        })
    }

    fn receive(&mut self, buf: Vec<u8>) -> Disposition {
        self.dispatcher.dispatch(&mut self.registry, common::from_remote(buf, PORT))
    }

    /// Everything sent on the first tunnel's channel.
    fn sent(&self) -> Result<Vec<Sent>> {
        let mut sent: Vec<Sent> = Vec::new();
        for bytes in self.factory.channel(0).borrow().sent.iter() {
            let hdr: ParsedHeader = ParsedHeader::parse(bytes, bytes.len())?;
            let region: &[u8] = &bytes[hdr.avp_offset..hdr.avp_offset + hdr.avp_len];
            sent.push(Sent {
                tunnel_id: hdr.tunnel_id,
                session_id: hdr.session_id,
                ns: hdr.ns,
                nr: hdr.nr,
                message_type: avp::peek_message_type(region)?,
                assigned_tunnel_id: avp::assigned_tunnel_id(region)?,
                assigned_session_id: avp::assigned_session_id(region)?,
            });
        }
        Ok(sent)
    }

    fn last_sent(&self) -> Result<Sent> {
        match self.sent()?.pop() {
            Some(sent) => Ok(sent),
            None => anyhow::bail!("nothing was sent"),
        }
    }

    /// Runs the SCCRQ/SCCRP/SCCCN exchange and returns the tunnel and its local id.
    fn establish(&mut self) -> Result<(TunnelHandle, u16)> {
        let tunnel: TunnelHandle = match self.receive(common::sccrq("lac.example.net", PEER_TUNNEL_ID)?) {
            Disposition::Delivered { tunnel, created: true } => tunnel,
            other => anyhow::bail!("tunnel was not created: {:?}", other),
        };

        let sccrp: Sent = self.last_sent()?;
        ensure_eq!(sccrp.message_type, Some(MessageType::Sccrp));
        ensure_eq!((sccrp.tunnel_id, sccrp.session_id), (PEER_TUNNEL_ID, 0));
        ensure_eq!((sccrp.ns, sccrp.nr), (0, 1));
        let tunnel_id: u16 = match sccrp.assigned_tunnel_id {
            Some(id) if id != 0 => id,
            other => anyhow::bail!("SCCRP carries no usable tunnel id: {:?}", other),
        };
        ensure_eq!(self.registry.tunnel_find_by_id(tunnel_id), Some(tunnel));
        ensure_eq!(self.state(tunnel), Some(TunnelState::WaitCtlConn));

        let scccn: Vec<u8> = common::message(tunnel_id, 0, 1, 1, MessageType::Scccn, &[])?;
        ensure_eq!(
            self.receive(scccn),
            Disposition::Delivered {
                tunnel,
                created: false
            }
        );
        ensure_eq!(self.state(tunnel), Some(TunnelState::Established));
        let ack: Sent = self.last_sent()?;
        ensure_eq!(ack.message_type, None);
        ensure_eq!((ack.ns, ack.nr), (1, 2));
        Ok((tunnel, tunnel_id))
    }

    fn state(&self, tunnel: TunnelHandle) -> Option<TunnelState> {
        self.registry.tunnel(tunnel).map(|t| t.state())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[test]
fn incoming_call_from_setup_to_teardown() -> Result<()> {
    let mut harness: Harness = Harness::new()?;
    let (tunnel, tunnel_id): (TunnelHandle, u16) = harness.establish()?;

    // Incoming call.
    let assigned: [u8; 8] = avp::encode_assigned_session_id(PEER_SESSION_ID);
    harness.receive(common::message(tunnel_id, 0, 2, 1, MessageType::Icrq, &[&assigned])?);
    let icrp: Sent = harness.last_sent()?;
    ensure_eq!(icrp.message_type, Some(MessageType::Icrp));
    ensure_eq!((icrp.tunnel_id, icrp.session_id), (PEER_TUNNEL_ID, PEER_SESSION_ID));
    ensure_eq!((icrp.ns, icrp.nr), (1, 3));
    let session_id: u16 = match icrp.assigned_session_id {
        Some(id) if id != 0 => id,
        other => anyhow::bail!("ICRP carries no usable session id: {:?}", other),
    };
    ensure_eq!(harness.registry.session_count(), 1);
    ensure_eq!(harness.registry.session_find(tunnel, session_id).is_some(), true);

    harness.receive(common::message(tunnel_id, session_id, 3, 2, MessageType::Iccn, &[])?);
    let ack: Sent = harness.last_sent()?;
    ensure_eq!(ack.message_type, None);
    ensure_eq!((ack.ns, ack.nr), (2, 4));

    harness.receive(common::message(tunnel_id, session_id, 4, 2, MessageType::Cdn, &[&assigned])?);
    ensure_eq!(harness.registry.session_count(), 0);
    ensure_eq!(
        *harness.log.borrow(),
        vec![
            "tunnel 0".to_string(),
            format!("created {}", session_id),
            format!("up {}", session_id),
            format!("down {}", session_id),
            format!("deleted {}", session_id),
        ]
    );

    // Tearing down the control connection frees the tunnel and, with it, the peer.
    let peer_id: [u8; 8] = avp::encode_assigned_tunnel_id(PEER_TUNNEL_ID);
    harness.receive(common::message(tunnel_id, 0, 5, 2, MessageType::StopCcn, &[&peer_id])?);
    ensure_eq!(harness.registry.tunnel(tunnel).is_none(), true);
    ensure_eq!(harness.registry.tunnel_find_by_id(tunnel_id), None);
    ensure_eq!(harness.registry.tunnel_count(), 0);
    ensure_eq!(harness.registry.peer_count(), 0);

    let sent: usize = harness.sent()?.len();
    let stats: &L2tpStats = harness.registry.stats();
    ensure_eq!(stats.total_rcvd_control_frames, 6);
    ensure_eq!(stats.total_sent_control_frames as usize, sent);
    Ok(())
}

#[test]
fn duplicate_is_acknowledged_again() -> Result<()> {
    let mut harness: Harness = Harness::new()?;
    let (tunnel, tunnel_id): (TunnelHandle, u16) = harness.establish()?;
    let before: usize = harness.sent()?.len();

    harness.receive(common::message(tunnel_id, 0, 1, 1, MessageType::Scccn, &[])?);
    let sent: Vec<Sent> = harness.sent()?;
    ensure_eq!(sent.len(), before + 1);
    let ack: &Sent = &sent[sent.len() - 1];
    ensure_eq!(ack.message_type, None);
    ensure_eq!((ack.ns, ack.nr), (1, 2));
    ensure_eq!(harness.state(tunnel), Some(TunnelState::Established));
    Ok(())
}

#[test]
fn message_from_the_future_is_dropped_silently() -> Result<()> {
    let mut harness: Harness = Harness::new()?;
    let (tunnel, tunnel_id): (TunnelHandle, u16) = harness.establish()?;
    let before: usize = harness.sent()?.len();

    harness.receive(common::message(tunnel_id, 0, 9, 1, MessageType::Hello, &[])?);
    ensure_eq!(harness.sent()?.len(), before);
    ensure_eq!(harness.registry.tunnel(tunnel).map(|t| t.expected_ns()), Some(2));
    Ok(())
}

#[test]
fn call_for_unknown_session_is_discarded() -> Result<()> {
    let mut harness: Harness = Harness::new()?;
    let (_, tunnel_id): (TunnelHandle, u16) = harness.establish()?;

    harness.receive(common::message(tunnel_id, 0x0999, 2, 1, MessageType::Iccn, &[])?);
    ensure_eq!(harness.registry.stats().no_matching_session_id_discards, 1);
    ensure_eq!(harness.registry.session_count(), 0);
    // The message was still in sequence, so it is acknowledged.
    let ack: Sent = harness.last_sent()?;
    ensure_eq!(ack.message_type, None);
    ensure_eq!(ack.nr, 3);
    Ok(())
}

#[test]
fn stopping_the_registry_frees_everything() -> Result<()> {
    let mut harness: Harness = Harness::new()?;
    let (_, tunnel_id): (TunnelHandle, u16) = harness.establish()?;
    let assigned: [u8; 8] = avp::encode_assigned_session_id(PEER_SESSION_ID);
    harness.receive(common::message(tunnel_id, 0, 2, 1, MessageType::Icrq, &[&assigned])?);
    ensure_eq!(harness.registry.session_count(), 1);

    harness.registry.shutdown();
    ensure_eq!(harness.registry.session_count(), 0);
    ensure_eq!(harness.registry.tunnel_count(), 0);
    ensure_eq!(harness.registry.peer_count(), 0);
    Ok(())
}
