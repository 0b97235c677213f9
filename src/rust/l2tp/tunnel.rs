// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    l2tp::{
        channel::ControlChannel,
        peer::PeerHandle,
        protocol::MessageType,
        session::SessionHandle,
    },
    runtime::{
        fail::Fail,
        fsm::{
            FsmAction,
            FsmEntry,
            FsmInstance,
            FsmLabel,
            FsmTable,
        },
    },
};
use ::std::{
    collections::HashMap,
    net::SocketAddrV4,
    os::unix::io::RawFd,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Generation-checked reference to a [Tunnel] held by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TunnelHandle {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TunnelState {
    Idle,
    WaitCtlReply,
    WaitCtlConn,
    Established,
    Closing,
    Dead,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TunnelEvent {
    LocalOpen,
    RxSccrq,
    RxSccrp,
    RxScccn,
    RxStopCcn,
    LocalClose,
    CloseTimeout,
}

/// Work a tunnel action asks the registry to carry out once the transition completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunnelRequest {
    AssignId,
    Release,
}

/// Side effects collected while a tunnel event is handled.
#[derive(Debug, Default)]
pub struct TunnelActions {
    pub outbox: Vec<MessageType>,
    pub requests: Vec<TunnelRequest>,
}

pub type TunnelFsmTable = FsmTable<TunnelState, TunnelEvent, TunnelActions>;
pub type TunnelFsm = FsmInstance<TunnelState, TunnelEvent, TunnelActions>;

/// One control connection.
pub struct Tunnel {
    pub(crate) generation: u64,
    pub(crate) tunnel_id: u16,
    pub(crate) peer_tunnel_id: u16,
    pub(crate) peer: Option<PeerHandle>,
    pub(crate) tunnel_profile_name: String,
    pub(crate) peer_profile_name: String,
    pub(crate) host_name: String,
    pub(crate) peer_host_name: Option<String>,
    pub(crate) channel: Option<Box<dyn ControlChannel>>,
    pub(crate) remote: Option<SocketAddrV4>,
    pub(crate) mtu: u16,
    pub(crate) max_sessions: usize,
    pub(crate) use_count: u32,
    pub(crate) linked: bool,
    pub(crate) sessions: HashMap<u16, SessionHandle>,
    /// Sequence number of the next message we send.
    pub(crate) ns: u16,
    /// Sequence number we expect next from the peer.
    pub(crate) nr: u16,
    pub(crate) fsm: TunnelFsm,
    pub(crate) actions: TunnelActions,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl TunnelEvent {
    /// Event raised by a received message, if the message drives the tunnel state machine.
    pub fn from_message(message_type: MessageType) -> Option<Self> {
        match message_type {
            MessageType::Sccrq => Some(TunnelEvent::RxSccrq),
            MessageType::Sccrp => Some(TunnelEvent::RxSccrp),
            MessageType::Scccn => Some(TunnelEvent::RxScccn),
            MessageType::StopCcn => Some(TunnelEvent::RxStopCcn),
            _ => None,
        }
    }
}

impl Tunnel {
    pub fn tunnel_id(&self) -> u16 {
        self.tunnel_id
    }

    pub fn peer_tunnel_id(&self) -> u16 {
        self.peer_tunnel_id
    }

    pub fn peer(&self) -> Option<PeerHandle> {
        self.peer
    }

    pub fn tunnel_profile_name(&self) -> &str {
        &self.tunnel_profile_name
    }

    pub fn peer_profile_name(&self) -> &str {
        &self.peer_profile_name
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn peer_host_name(&self) -> Option<&str> {
        self.peer_host_name.as_deref()
    }

    pub fn remote(&self) -> Option<SocketAddrV4> {
        self.remote
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    pub fn state(&self) -> TunnelState {
        self.fsm.state()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionHandle> {
        self.sessions.values()
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.channel.as_ref().and_then(|c| c.fd())
    }

    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().map(|c| c.is_connected()).unwrap_or(false)
    }

    pub fn next_ns(&self) -> u16 {
        self.ns
    }

    pub fn expected_ns(&self) -> u16 {
        self.nr
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl FsmLabel for TunnelState {
    fn name(&self) -> &'static str {
        match self {
            TunnelState::Idle => "IDLE",
            TunnelState::WaitCtlReply => "WAITCTLREPLY",
            TunnelState::WaitCtlConn => "WAITCTLCONN",
            TunnelState::Established => "ESTABLISHED",
            TunnelState::Closing => "CLOSING",
            TunnelState::Dead => "DEAD",
        }
    }
}

impl FsmLabel for TunnelEvent {
    fn name(&self) -> &'static str {
        match self {
            TunnelEvent::LocalOpen => "OPEN_REQ",
            TunnelEvent::RxSccrq => "SCCRQ_ACCEPT",
            TunnelEvent::RxSccrp => "SCCRP_ACCEPT",
            TunnelEvent::RxScccn => "SCCCN_ACCEPT",
            TunnelEvent::RxStopCcn => "STOPCCN",
            TunnelEvent::LocalClose => "CLOSE_REQ",
            TunnelEvent::CloseTimeout => "CLOSE_TIMER",
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn send_sccrq(_: TunnelState, a: &mut TunnelActions) {
    a.outbox.push(MessageType::Sccrq);
}

fn accept_sccrq(_: TunnelState, a: &mut TunnelActions) {
    a.requests.push(TunnelRequest::AssignId);
    a.outbox.push(MessageType::Sccrp);
}

fn send_scccn(_: TunnelState, a: &mut TunnelActions) {
    a.outbox.push(MessageType::Scccn);
}

fn send_stopccn(_: TunnelState, a: &mut TunnelActions) {
    a.outbox.push(MessageType::StopCcn);
}

fn release(_: TunnelState, a: &mut TunnelActions) {
    a.requests.push(TunnelRequest::Release);
}

/// Builds the control connection state table.
pub fn tunnel_fsm_table() -> Result<Rc<TunnelFsmTable>, Fail> {
    use TunnelEvent::*;
    use TunnelState::*;

    let mut rows: Vec<FsmEntry<TunnelState, TunnelEvent, TunnelActions>> = vec![
        FsmEntry::new(Idle, LocalOpen, FsmAction::Call(send_sccrq), WaitCtlReply),
        FsmEntry::new(Idle, RxSccrq, FsmAction::Call(accept_sccrq), WaitCtlConn),
        FsmEntry::new(Idle, LocalClose, FsmAction::Call(release), Dead),
        FsmEntry::new(WaitCtlReply, RxSccrp, FsmAction::Call(send_scccn), Established),
        FsmEntry::new(WaitCtlConn, RxScccn, FsmAction::Ignore, Established),
        FsmEntry::new(Closing, RxStopCcn, FsmAction::Call(release), Dead),
        FsmEntry::new(Closing, CloseTimeout, FsmAction::Call(release), Dead),
    ];
    for state in [WaitCtlReply, WaitCtlConn, Established] {
        rows.push(FsmEntry::new(state, RxStopCcn, FsmAction::Call(release), Dead));
        rows.push(FsmEntry::new(state, LocalClose, FsmAction::Call(send_stopccn), Closing));
    }
    Ok(Rc::new(FsmTable::new("tunnel", rows)?))
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
