// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Extension points for the PPP collaborator.
//!
//! Listeners are called in registration order. The first listener that fails aborts the operation that raised the
//! event, and later listeners are not called.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    l2tp::profile::PppProfile,
    runtime::fail::Fail,
};
use ::std::net::SocketAddrV4;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A tunnel that was just bootstrapped from an inbound request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TunnelEvent {
    pub tunnel_id: u16,
    pub remote: Option<SocketAddrV4>,
}

/// Local and peer identifiers of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionIds {
    pub tunnel_id: u16,
    pub session_id: u16,
    pub peer_tunnel_id: u16,
    pub peer_session_id: u16,
}

/// Link parameters a session was configured with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionLink {
    pub ids: SessionIds,
    pub ppp: PppProfile,
    pub mtu: u16,
    pub mru: u16,
    pub use_sequence_numbers: bool,
    pub reorder_timeout: u32,
}

/// Traffic counters filled in by listeners on request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub data_rx_packets: u64,
    pub data_rx_bytes: u64,
    pub data_tx_packets: u64,
    pub data_tx_bytes: u64,
}

/// Receives tunnel and session lifecycle events. Every method defaults to doing nothing.
pub trait L2tpListener {
    fn tunnel_created(&mut self, _event: &TunnelEvent) -> Result<(), Fail> {
        Ok(())
    }

    fn session_created(&mut self, _link: &SessionLink) -> Result<(), Fail> {
        Ok(())
    }

    fn session_up(&mut self, _ids: &SessionIds) -> Result<(), Fail> {
        Ok(())
    }

    fn session_down(&mut self, _ids: &SessionIds) -> Result<(), Fail> {
        Ok(())
    }

    fn session_modified(&mut self, _link: &SessionLink) -> Result<(), Fail> {
        Ok(())
    }

    fn session_deleted(&mut self, _ids: &SessionIds) -> Result<(), Fail> {
        Ok(())
    }

    fn session_get_stats(&mut self, _ids: &SessionIds, _stats: &mut SessionStats) -> Result<(), Fail> {
        Ok(())
    }
}

/// Ordered listener list.
#[derive(Default)]
pub struct Hooks {
    listeners: Vec<Box<dyn L2tpListener>>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Box<dyn L2tpListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn tunnel_created(&mut self, event: &TunnelEvent) -> Result<(), Fail> {
        self.listeners.iter_mut().try_for_each(|l| l.tunnel_created(event))
    }

    pub fn session_created(&mut self, link: &SessionLink) -> Result<(), Fail> {
        self.listeners.iter_mut().try_for_each(|l| l.session_created(link))
    }

    pub fn session_up(&mut self, ids: &SessionIds) -> Result<(), Fail> {
        self.listeners.iter_mut().try_for_each(|l| l.session_up(ids))
    }

    pub fn session_down(&mut self, ids: &SessionIds) -> Result<(), Fail> {
        self.listeners.iter_mut().try_for_each(|l| l.session_down(ids))
    }

    pub fn session_modified(&mut self, link: &SessionLink) -> Result<(), Fail> {
        self.listeners.iter_mut().try_for_each(|l| l.session_modified(link))
    }

    pub fn session_deleted(&mut self, ids: &SessionIds) -> Result<(), Fail> {
        self.listeners.iter_mut().try_for_each(|l| l.session_deleted(ids))
    }

    pub fn session_get_stats(&mut self, ids: &SessionIds) -> Result<SessionStats, Fail> {
        let mut stats: SessionStats = SessionStats::default();
        for listener in self.listeners.iter_mut() {
            listener.session_get_stats(ids, &mut stats)?;
        }
        Ok(stats)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
