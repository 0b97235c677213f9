// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Test doubles and frame builders shared by the integration tests.

#![allow(dead_code)]

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::l2tpd::{
    collections::id_alloc::IdAllocator,
    l2tp::{
        channel::{
            ChannelFactory,
            ControlChannel,
            RecvOutcome,
        },
        hooks::{
            L2tpListener,
            SessionIds,
            SessionLink,
            TunnelEvent,
        },
        profile::ProfileStore,
        protocol::{
            avp,
            header::ControlHeader,
            packet::ControlPacket,
            MessageType,
        },
        transport::Transport,
        tunnel::TunnelHandle,
    },
    Datagram,
    Fail,
    Registry,
    RegistryConfig,
};
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    os::unix::io::RawFd,
    rc::Rc,
};

//======================================================================================================================
// Constants
//======================================================================================================================

pub const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
pub const REMOTE: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 7);

//======================================================================================================================
// Structures
//======================================================================================================================

/// What happened on one mock channel.
#[derive(Default)]
pub struct ChannelLog {
    pub connects: Vec<SocketAddrV4>,
    pub sent: Vec<Vec<u8>>,
    pub pmtu_discovery: Option<bool>,
}

/// A control channel that records instead of touching the network.
pub struct MockChannel {
    log: Rc<RefCell<ChannelLog>>,
    connected: bool,
    fail_connect: bool,
}

/// Opens [MockChannel]s and keeps a handle on each one's log.
#[derive(Clone, Default)]
pub struct MockFactory {
    channels: Rc<RefCell<Vec<Rc<RefCell<ChannelLog>>>>>,
    open_errno: Rc<Cell<Option<i32>>>,
    fail_connect: Rc<Cell<bool>>,
}

/// A packet the dispatcher handed to the transport.
#[derive(Clone, Debug)]
pub struct Handoff {
    pub tunnel: TunnelHandle,
    pub message_type: Option<MessageType>,
    pub ns: u16,
    pub nr: u16,
}

/// A transport that forwards every packet it receives to a channel.
pub struct CaptureTransport {
    tx: Sender<Handoff>,
    fail: bool,
}

/// Records lifecycle hooks as short strings.
pub struct Recorder {
    log: Rc<RefCell<Vec<String>>>,
    refuse_tunnels: bool,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `open()` fail with `errno`.
    pub fn fail_open(&self, errno: i32) {
        self.open_errno.set(Some(errno));
    }

    /// Makes channels opened from now on refuse to connect.
    pub fn fail_connect(&self) {
        self.fail_connect.set(true);
    }

    pub fn opened(&self) -> usize {
        self.channels.borrow().len()
    }

    pub fn channel(&self, index: usize) -> Rc<RefCell<ChannelLog>> {
        self.channels.borrow()[index].clone()
    }
}

impl CaptureTransport {
    pub fn new() -> (Self, Receiver<Handoff>) {
        let (tx, rx): (Sender<Handoff>, Receiver<Handoff>) = crossbeam_channel::unbounded();
        (Self { tx, fail: false }, rx)
    }

    /// A transport that records the packet and then rejects it.
    pub fn failing() -> (Self, Receiver<Handoff>) {
        let (tx, rx): (Sender<Handoff>, Receiver<Handoff>) = crossbeam_channel::unbounded();
        (Self { tx, fail: true }, rx)
    }
}

impl Recorder {
    pub fn register(registry: &mut Registry, refuse_tunnels: bool) -> Rc<RefCell<Vec<String>>> {
        let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        registry.hooks_mut().register(Box::new(Recorder {
            log: log.clone(),
            refuse_tunnels,
        }));
        log
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl ControlChannel for MockChannel {
    fn fd(&self) -> Option<RawFd> {
        None
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self, remote: SocketAddrV4) -> Result<SocketAddrV4, Fail> {
        if self.fail_connect {
            return Err(Fail::new(libc::ECONNREFUSED, "connect refused"));
        }
        self.log.borrow_mut().connects.push(remote);
        self.connected = true;
        Ok(remote)
    }

    fn send(&mut self, pkt: &ControlPacket) -> Result<usize, Fail> {
        let bytes: Vec<u8> = pkt.to_bytes();
        let len: usize = bytes.len();
        self.log.borrow_mut().sent.push(bytes);
        Ok(len)
    }

    fn recv(&mut self, _buf: &mut [u8]) -> Result<RecvOutcome, Fail> {
        Ok(RecvOutcome::WouldBlock)
    }

    fn set_pmtu_discovery(&mut self, enabled: bool) -> Result<(), Fail> {
        self.log.borrow_mut().pmtu_discovery = Some(enabled);
        Ok(())
    }
}

impl ChannelFactory for MockFactory {
    fn open(&mut self, _local: Option<Ipv4Addr>, _remote: SocketAddrV4) -> Result<Box<dyn ControlChannel>, Fail> {
        if let Some(errno) = self.open_errno.get() {
            return Err(Fail::new(errno, "cannot open channel"));
        }
        let log: Rc<RefCell<ChannelLog>> = Rc::new(RefCell::new(ChannelLog::default()));
        self.channels.borrow_mut().push(log.clone());
        Ok(Box::new(MockChannel {
            log,
            connected: false,
            fail_connect: self.fail_connect.get(),
        }))
    }
}

impl Transport for CaptureTransport {
    fn recv(&mut self, _registry: &mut Registry, tunnel: TunnelHandle, pkt: ControlPacket) -> Result<(), Fail> {
        let handoff: Handoff = Handoff {
            tunnel,
            message_type: pkt.message_type().ok().flatten(),
            ns: pkt.ns,
            nr: pkt.nr,
        };
        if self.tx.send(handoff).is_err() {
            return Err(Fail::new(libc::EPIPE, "nobody is listening for handoffs"));
        }
        if self.fail {
            return Err(Fail::new(libc::EIO, "transport rejected packet"));
        }
        Ok(())
    }
}

impl L2tpListener for Recorder {
    fn tunnel_created(&mut self, event: &TunnelEvent) -> Result<(), Fail> {
        self.log.borrow_mut().push(format!("tunnel {}", event.tunnel_id));
        if self.refuse_tunnels {
            return Err(Fail::new(libc::EPERM, "tunnel refused"));
        }
        Ok(())
    }

    fn session_created(&mut self, link: &SessionLink) -> Result<(), Fail> {
        self.log.borrow_mut().push(format!("created {}", link.ids.session_id));
        Ok(())
    }

    fn session_up(&mut self, ids: &SessionIds) -> Result<(), Fail> {
        self.log.borrow_mut().push(format!("up {}", ids.session_id));
        Ok(())
    }

    fn session_down(&mut self, ids: &SessionIds) -> Result<(), Fail> {
        self.log.borrow_mut().push(format!("down {}", ids.session_id));
        Ok(())
    }

    fn session_deleted(&mut self, ids: &SessionIds) -> Result<(), Fail> {
        self.log.borrow_mut().push(format!("deleted {}", ids.session_id));
        Ok(())
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// A registry with default profiles and a seeded id allocator.
pub fn registry() -> Result<Registry> {
    let mut registry: Registry = Registry::new(RegistryConfig::default(), ProfileStore::new())?;
    registry.set_id_allocator(IdAllocator::with_seed(42));
    Ok(registry)
}

pub fn remote(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(REMOTE, port)
}

/// A datagram received on the unconnected socket.
pub fn from_remote(buf: Vec<u8>, port: u16) -> Datagram {
    Datagram::new(buf, Some(remote(port)), Some(LOCAL))
}

/// A datagram received on a tunnel's connected socket.
pub fn on_tunnel_socket(buf: Vec<u8>) -> Datagram {
    Datagram::new(buf, None, Some(LOCAL))
}

/// A control frame carrying `avps` verbatim.
pub fn control_frame(tunnel_id: u16, session_id: u16, ns: u16, nr: u16, avps: &[&[u8]]) -> Result<Vec<u8>> {
    let payload: Vec<u8> = avps.concat();
    let header: ControlHeader = ControlHeader::new(tunnel_id, session_id, ns, nr);
    let mut frame: Vec<u8> = header.serialize(payload.len())?.to_vec();
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// A control message of `message_type` followed by `avps`.
pub fn message(
    tunnel_id: u16,
    session_id: u16,
    ns: u16,
    nr: u16,
    message_type: MessageType,
    avps: &[&[u8]],
) -> Result<Vec<u8>> {
    let mut all: Vec<&[u8]> = Vec::with_capacity(avps.len() + 1);
    let message_type_avp: [u8; 8] = avp::encode_message_type(message_type);
    all.push(&message_type_avp);
    all.extend_from_slice(avps);
    control_frame(tunnel_id, session_id, ns, nr, &all)
}

/// A tunnel setup request from a peer that calls its end `peer_tunnel_id`.
pub fn sccrq(host_name: &str, peer_tunnel_id: u16) -> Result<Vec<u8>> {
    let host_name_avp: Vec<u8> = avp::encode_host_name(host_name)?;
    let assigned_avp: [u8; 8] = avp::encode_assigned_tunnel_id(peer_tunnel_id);
    message(0, 0, 0, 0, MessageType::Sccrq, &[&host_name_avp, &assigned_avp])
}
