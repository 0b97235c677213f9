// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    l2tp::{
        hooks::{
            SessionIds,
            SessionLink,
        },
        profile::PppProfile,
        protocol::MessageType,
        tunnel::TunnelHandle,
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
use ::std::rc::Rc;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Generation-checked reference to a [Session] held by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    WaitConnect,
    Established,
    Dead,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    RxIcrq,
    RxIccn,
    RxCdn,
    LocalClose,
    TunnelDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionRequest {
    Up,
    Down,
    Release,
}

/// Side effects collected while a session event is handled.
#[derive(Debug, Default)]
pub struct SessionActions {
    pub outbox: Vec<MessageType>,
    pub requests: Vec<SessionRequest>,
}

/// Fields of an in-flight session that may be changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionModify {
    pub use_sequence_numbers: Option<bool>,
    pub sequencing_required: Option<bool>,
    pub reorder_timeout: Option<u32>,
    /// Recorded, but only applied to the next session created with this profile.
    pub ppp_profile_name: Option<String>,
}

pub type SessionFsmTable = FsmTable<SessionState, SessionEvent, SessionActions>;
pub type SessionFsm = FsmInstance<SessionState, SessionEvent, SessionActions>;

/// One call inside a tunnel.
pub struct Session {
    pub(crate) generation: u64,
    pub(crate) tunnel: TunnelHandle,
    pub(crate) ids: SessionIds,
    pub(crate) profile_name: String,
    pub(crate) ppp_profile_name: String,
    pub(crate) ppp: PppProfile,
    pub(crate) use_sequence_numbers: bool,
    pub(crate) sequencing_required: bool,
    pub(crate) reorder_timeout: u32,
    pub(crate) mtu: u16,
    pub(crate) mru: u16,
    pub(crate) use_count: u32,
    pub(crate) fsm: SessionFsm,
    pub(crate) actions: SessionActions,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl SessionEvent {
    pub fn from_message(message_type: MessageType) -> Option<Self> {
        match message_type {
            MessageType::Icrq => Some(SessionEvent::RxIcrq),
            MessageType::Iccn => Some(SessionEvent::RxIccn),
            MessageType::Cdn => Some(SessionEvent::RxCdn),
            _ => None,
        }
    }
}

impl Session {
    pub fn tunnel(&self) -> TunnelHandle {
        self.tunnel
    }

    pub fn ids(&self) -> SessionIds {
        self.ids
    }

    pub fn session_id(&self) -> u16 {
        self.ids.session_id
    }

    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    pub fn ppp_profile_name(&self) -> &str {
        &self.ppp_profile_name
    }

    pub fn use_sequence_numbers(&self) -> bool {
        self.use_sequence_numbers
    }

    pub fn sequencing_required(&self) -> bool {
        self.sequencing_required
    }

    pub fn reorder_timeout(&self) -> u32 {
        self.reorder_timeout
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn mru(&self) -> u16 {
        self.mru
    }

    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    pub fn state(&self) -> SessionState {
        self.fsm.state()
    }

    pub(crate) fn link(&self) -> SessionLink {
        SessionLink {
            ids: self.ids,
            ppp: self.ppp.clone(),
            mtu: self.mtu,
            mru: self.mru,
            use_sequence_numbers: self.use_sequence_numbers,
            reorder_timeout: self.reorder_timeout,
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl FsmLabel for SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::WaitConnect => "WAITCONNECT",
            SessionState::Established => "ESTABLISHED",
            SessionState::Dead => "DEAD",
        }
    }
}

impl FsmLabel for SessionEvent {
    fn name(&self) -> &'static str {
        match self {
            SessionEvent::RxIcrq => "ICRQ_ACCEPT",
            SessionEvent::RxIccn => "ICCN_ACCEPT",
            SessionEvent::RxCdn => "CDN",
            SessionEvent::LocalClose => "CLOSE_REQ",
            SessionEvent::TunnelDown => "TUNNEL_DOWN",
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn send_icrp(_: SessionState, a: &mut SessionActions) {
    a.outbox.push(MessageType::Icrp);
}

fn session_up(_: SessionState, a: &mut SessionActions) {
    a.requests.push(SessionRequest::Up);
}

fn session_down(state: SessionState, a: &mut SessionActions) {
    if state == SessionState::Established {
        a.requests.push(SessionRequest::Down);
    }
}

fn close(state: SessionState, a: &mut SessionActions) {
    session_down(state, a);
    a.requests.push(SessionRequest::Release);
}

fn send_cdn(state: SessionState, a: &mut SessionActions) {
    a.outbox.push(MessageType::Cdn);
    close(state, a);
}

/// Builds the incoming call state table.
pub fn session_fsm_table() -> Result<Rc<SessionFsmTable>, Fail> {
    use SessionEvent::*;
    use SessionState::*;

    let mut rows: Vec<FsmEntry<SessionState, SessionEvent, SessionActions>> = vec![
        FsmEntry::new(Idle, RxIcrq, FsmAction::Call(send_icrp), WaitConnect),
        FsmEntry::new(Idle, LocalClose, FsmAction::Call(close), Dead),
        FsmEntry::new(Idle, TunnelDown, FsmAction::Ignore, Dead),
        FsmEntry::new(WaitConnect, RxIccn, FsmAction::Call(session_up), Established),
    ];
    for state in [WaitConnect, Established] {
        rows.push(FsmEntry::new(state, RxCdn, FsmAction::Call(close), Dead));
        rows.push(FsmEntry::new(state, LocalClose, FsmAction::Call(send_cdn), Dead));
        rows.push(FsmEntry::new(state, TunnelDown, FsmAction::Call(session_down), Dead));
    }
    Ok(Rc::new(FsmTable::new("session", rows)?))
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
