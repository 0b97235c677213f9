// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Owner of every peer, tunnel and session.
//!
//! Objects live in slab arenas and are referenced through generation-checked handles. Each object carries a use count
//! that starts at one on allocation. Dropping the count to zero frees the object synchronously; for a tunnel this
//! tears down its sessions first, then releases its peer, then frees the tunnel itself. Any use of a freed handle,
//! including a decrement past zero, fails with `EINVAL`.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::id_alloc::IdAllocator,
    l2tp::{
        channel::{
            ControlChannel,
            RecvOutcome,
        },
        hooks::{
            Hooks,
            SessionIds,
            SessionStats,
            TunnelEvent as TunnelCreated,
        },
        peer::{
            Peer,
            PeerHandle,
        },
        profile::{
            PppProfile,
            ProfileStore,
            SessionProfile,
        },
        protocol::{
            packet::ControlPacket,
            MessageType,
        },
        session::{
            session_fsm_table,
            Session,
            SessionActions,
            SessionEvent,
            SessionFsmTable,
            SessionHandle,
            SessionModify,
            SessionRequest,
            SessionState,
        },
        stats::L2tpStats,
        tunnel::{
            tunnel_fsm_table,
            Tunnel,
            TunnelActions,
            TunnelEvent,
            TunnelFsmTable,
            TunnelHandle,
            TunnelRequest,
            TunnelState,
        },
    },
    runtime::{
        fail::Fail,
        fsm::FsmInstance,
    },
};
use ::libc::{
    EEXIST,
    EINVAL,
    ENOTCONN,
    EPERM,
};
use ::slab::Slab;
use ::std::{
    collections::HashMap,
    mem,
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    os::unix::io::RawFd,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Administrative limits. A limit of zero means unlimited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    pub max_peers: usize,
    pub max_tunnels: usize,
    pub max_sessions: usize,
    pub tunnel_creation_enabled: bool,
    pub session_creation_enabled: bool,
}

/// Peer, tunnel and session tables plus everything that observes them.
pub struct Registry {
    config: RegistryConfig,
    profiles: ProfileStore,
    hooks: Hooks,
    stats: L2tpStats,
    ids: IdAllocator,
    generation: u64,
    peers: Slab<Peer>,
    peer_index: HashMap<(Ipv4Addr, Ipv4Addr), usize>,
    tunnels: Slab<Tunnel>,
    tunnel_index: HashMap<u16, usize>,
    /// Linked tunnels keyed by the remote address that bootstrapped them.
    by_remote: HashMap<SocketAddrV4, usize>,
    sessions: Slab<Session>,
    tunnel_table: Rc<TunnelFsmTable>,
    session_table: Rc<SessionFsmTable>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Registry {
    pub fn new(config: RegistryConfig, profiles: ProfileStore) -> Result<Self, Fail> {
        Ok(Self {
            config,
            profiles,
            hooks: Hooks::new(),
            stats: L2tpStats::default(),
            ids: IdAllocator::new(),
            generation: 0,
            peers: Slab::new(),
            peer_index: HashMap::new(),
            tunnels: Slab::new(),
            tunnel_index: HashMap::new(),
            by_remote: HashMap::new(),
            sessions: Slab::new(),
            tunnel_table: tunnel_fsm_table()?,
            session_table: session_fsm_table()?,
        })
    }

    /// Replaces the identifier source, e.g. with a seeded one.
    pub fn set_id_allocator(&mut self, ids: IdAllocator) {
        self.ids = ids;
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RegistryConfig {
        &mut self.config
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn profiles_mut(&mut self) -> &mut ProfileStore {
        &mut self.profiles
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    pub fn stats(&self) -> &L2tpStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut L2tpStats {
        &mut self.stats
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn tunnel_count(&self) -> usize {
        self.tunnels.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    //==================================================================================================================
    // Peers
    //==================================================================================================================

    pub fn peer_find(&self, local: Ipv4Addr, remote: Ipv4Addr) -> Option<PeerHandle> {
        let index: usize = *self.peer_index.get(&(local, remote))?;
        let peer: &Peer = self.peers.get(index)?;
        Some(PeerHandle {
            index,
            generation: peer.generation,
        })
    }

    /// Creates a peer with a use count of one.
    pub fn peer_alloc(&mut self, local: Ipv4Addr, remote: Ipv4Addr) -> Result<PeerHandle, Fail> {
        if self.peer_index.contains_key(&(local, remote)) {
            let cause: String = format!("peer already exists (local={}, remote={})", local, remote);
            error!("peer_alloc(): {}", cause);
            return Err(Fail::new(EEXIST, &cause));
        }
        if self.config.max_peers != 0 && self.peers.len() >= self.config.max_peers {
            self.stats.no_peer_resources += 1;
            let cause: String = format!("peer table full (max={})", self.config.max_peers);
            warn!("peer_alloc(): {}", cause);
            return Err(Fail::new(libc::ENOMEM, &cause));
        }
        let generation: u64 = self.next_generation();
        let index: usize = self.peers.insert(Peer::new(generation, local, remote));
        self.peer_index.insert((local, remote), index);
        debug!("peer_alloc(): local={} remote={}", local, remote);
        Ok(PeerHandle { index, generation })
    }

    pub fn peer(&self, handle: PeerHandle) -> Option<&Peer> {
        self.peers.get(handle.index).filter(|p| p.generation == handle.generation)
    }

    pub fn peer_inc_use_count(&mut self, handle: PeerHandle) -> Result<u32, Fail> {
        let peer: &mut Peer = self.peer_entry(handle, "peer_inc_use_count")?;
        peer.use_count += 1;
        Ok(peer.use_count)
    }

    /// Drops one reference and frees the peer on the last one. Returns the remaining count.
    pub fn peer_dec_use_count(&mut self, handle: PeerHandle) -> Result<u32, Fail> {
        let peer: &mut Peer = self.peer_entry(handle, "peer_dec_use_count")?;
        peer.use_count -= 1;
        let remaining: u32 = peer.use_count;
        if remaining == 0 {
            let peer: Peer = self.peers.remove(handle.index);
            self.peer_index.remove(&peer.key());
            debug!("peer_dec_use_count(): freed peer {}", peer.remote());
        }
        Ok(remaining)
    }

    fn peer_entry(&mut self, handle: PeerHandle, op: &str) -> Result<&mut Peer, Fail> {
        match self.peers.get_mut(handle.index) {
            Some(peer) if peer.generation == handle.generation => Ok(peer),
            _ => Err(stale(op, "peer")),
        }
    }

    //==================================================================================================================
    // Tunnels
    //==================================================================================================================

    /// Looks up an established tunnel. Id zero never matches: it only ever announces a new tunnel.
    pub fn tunnel_find_by_id(&self, tunnel_id: u16) -> Option<TunnelHandle> {
        if tunnel_id == 0 {
            return None;
        }
        self.tunnel_handle(*self.tunnel_index.get(&tunnel_id)?)
    }

    /// Looks up the live tunnel bootstrapped by `remote`, whether or not it has an id yet.
    pub fn tunnel_find_by_remote(&self, remote: SocketAddrV4) -> Option<TunnelHandle> {
        self.tunnel_handle(*self.by_remote.get(&remote)?)
    }

    pub fn tunnel_find_by_fd(&self, fd: RawFd) -> Option<TunnelHandle> {
        self.tunnels
            .iter()
            .find(|(_, t)| t.fd() == Some(fd))
            .map(|(index, t)| TunnelHandle {
                index,
                generation: t.generation,
            })
    }

    /// Descriptors of every tunnel channel that has one.
    pub fn tunnel_fds(&self) -> Vec<RawFd> {
        self.tunnels.iter().filter_map(|(_, t)| t.fd()).collect()
    }

    fn tunnel_handle(&self, index: usize) -> Option<TunnelHandle> {
        let tunnel: &Tunnel = self.tunnels.get(index)?;
        Some(TunnelHandle {
            index,
            generation: tunnel.generation,
        })
    }

    pub fn tunnel(&self, handle: TunnelHandle) -> Option<&Tunnel> {
        self.tunnels.get(handle.index).filter(|t| t.generation == handle.generation)
    }

    fn tunnel_entry(&mut self, handle: TunnelHandle, op: &str) -> Result<&mut Tunnel, Fail> {
        match self.tunnels.get_mut(handle.index) {
            Some(tunnel) if tunnel.generation == handle.generation => Ok(tunnel),
            _ => Err(stale(op, "tunnel")),
        }
    }

    /// Creates an unlinked tunnel with a use count of one.
    ///
    /// Policy refusals fail with `EPERM` and count in `too_many_tunnels`; they are not worth retrying.
    pub fn tunnel_alloc(
        &mut self,
        tunnel_id: u16,
        tunnel_profile_name: &str,
        peer_profile_name: &str,
    ) -> Result<TunnelHandle, Fail> {
        if !self.config.tunnel_creation_enabled {
            self.stats.too_many_tunnels += 1;
            let cause: String = format!("tunnel creation is disabled");
            info!("tunnel_alloc(): {}", cause);
            return Err(Fail::new(EPERM, &cause));
        }
        if self.config.max_tunnels != 0 && self.tunnels.len() >= self.config.max_tunnels {
            self.stats.too_many_tunnels += 1;
            let cause: String = format!("tunnel limit reached (max={})", self.config.max_tunnels);
            warn!("tunnel_alloc(): {}", cause);
            return Err(Fail::new(EPERM, &cause));
        }
        if tunnel_id != 0 && self.tunnel_index.contains_key(&tunnel_id) {
            let cause: String = format!("tunnel id {} already in use", tunnel_id);
            error!("tunnel_alloc(): {}", cause);
            return Err(Fail::new(EEXIST, &cause));
        }
        self.profiles.peer_profile_get(peer_profile_name)?;
        let (host_name, mtu, max_sessions): (String, u16, usize) = {
            let profile = self.profiles.tunnel_profile_get(tunnel_profile_name)?;
            (profile.host_name.clone(), profile.mtu, profile.max_sessions)
        };

        let generation: u64 = self.next_generation();
        let tunnel: Tunnel = Tunnel {
            generation,
            tunnel_id,
            peer_tunnel_id: 0,
            peer: None,
            tunnel_profile_name: tunnel_profile_name.to_string(),
            peer_profile_name: peer_profile_name.to_string(),
            host_name,
            peer_host_name: None,
            channel: None,
            remote: None,
            mtu,
            max_sessions,
            use_count: 1,
            linked: false,
            sessions: HashMap::new(),
            ns: 0,
            nr: 0,
            fsm: FsmInstance::new(&format!("tunl {}", tunnel_id), TunnelState::Idle, self.tunnel_table.clone()),
            actions: TunnelActions::default(),
        };
        let index: usize = self.tunnels.insert(tunnel);
        debug!("tunnel_alloc(): id={} profile={}", tunnel_id, tunnel_profile_name);
        Ok(TunnelHandle { index, generation })
    }

    /// Makes a tunnel visible to lookups. The allocation reference becomes the link reference.
    pub fn tunnel_link(&mut self, handle: TunnelHandle) -> Result<(), Fail> {
        let tunnel: &mut Tunnel = self.tunnel_entry(handle, "tunnel_link")?;
        tunnel.linked = true;
        self.index_tunnel(handle.index);
        Ok(())
    }

    fn index_tunnel(&mut self, index: usize) {
        if let Some(tunnel) = self.tunnels.get(index) {
            if !tunnel.linked {
                return;
            }
            if tunnel.tunnel_id != 0 {
                self.tunnel_index.insert(tunnel.tunnel_id, index);
            }
            if let Some(remote) = tunnel.remote {
                self.by_remote.insert(remote, index);
            }
        }
    }

    fn unindex_tunnel(&mut self, index: usize) {
        if let Some(tunnel) = self.tunnels.get(index) {
            if self.tunnel_index.get(&tunnel.tunnel_id) == Some(&index) {
                self.tunnel_index.remove(&tunnel.tunnel_id);
            }
            if let Some(remote) = tunnel.remote {
                if self.by_remote.get(&remote) == Some(&index) {
                    self.by_remote.remove(&remote);
                }
            }
        }
    }

    /// Attaches the peer, remote address and control channel. Takes a reference on the peer.
    pub fn tunnel_bind(
        &mut self,
        handle: TunnelHandle,
        peer: Option<PeerHandle>,
        remote: SocketAddrV4,
        channel: Box<dyn ControlChannel>,
    ) -> Result<(), Fail> {
        if self.tunnel_entry(handle, "tunnel_bind")?.channel.is_some() {
            let cause: String = format!("tunnel is already bound");
            error!("tunnel_bind(): {}", cause);
            return Err(Fail::new(EEXIST, &cause));
        }
        if let Some(peer) = peer {
            self.peer_inc_use_count(peer)?;
        }
        self.unindex_tunnel(handle.index);
        let tunnel: &mut Tunnel = self.tunnel_entry(handle, "tunnel_bind")?;
        tunnel.peer = peer;
        tunnel.remote = Some(remote);
        tunnel.channel = Some(channel);
        self.index_tunnel(handle.index);
        Ok(())
    }

    pub fn tunnel_set_peer_host_name(&mut self, handle: TunnelHandle, host_name: Option<String>) -> Result<(), Fail> {
        self.tunnel_entry(handle, "tunnel_set_peer_host_name")?.peer_host_name = host_name;
        Ok(())
    }

    pub fn tunnel_set_peer_tunnel_id(&mut self, handle: TunnelHandle, peer_tunnel_id: u16) -> Result<(), Fail> {
        self.tunnel_entry(handle, "tunnel_set_peer_tunnel_id")?.peer_tunnel_id = peer_tunnel_id;
        Ok(())
    }

    /// Records a new remote address, e.g. when the peer answers from another port.
    pub fn tunnel_set_remote(&mut self, handle: TunnelHandle, remote: SocketAddrV4) -> Result<(), Fail> {
        self.tunnel_entry(handle, "tunnel_set_remote")?;
        self.unindex_tunnel(handle.index);
        self.tunnel_entry(handle, "tunnel_set_remote")?.remote = Some(remote);
        self.index_tunnel(handle.index);
        Ok(())
    }

    /// Updates the path MTU and lets every session of the tunnel re-derive its link MTU.
    pub fn tunnel_update_mtu(&mut self, handle: TunnelHandle, mtu: u16) -> Result<(), Fail> {
        let tunnel: &mut Tunnel = self.tunnel_entry(handle, "tunnel_update_mtu")?;
        if tunnel.mtu == mtu {
            return Ok(());
        }
        info!("tunnel_update_mtu(): tunnel {} mtu {} -> {}", tunnel.tunnel_id, tunnel.mtu, mtu);
        tunnel.mtu = mtu;
        let sessions: Vec<SessionHandle> = tunnel.sessions.values().copied().collect();
        for handle in sessions {
            let session: &mut Session = self.session_entry(handle, "tunnel_update_mtu")?;
            let (link_mtu, link_mru): (u16, u16) = session.ppp.link_mtu_mru(mtu);
            session.mtu = link_mtu;
            session.mru = link_mru;
            let link = session.link();
            self.hooks.session_modified(&link)?;
        }
        Ok(())
    }

    /// Picks a random unused id for a tunnel still using id zero and indexes it under that id.
    pub fn tunnel_assign_id(&mut self, handle: TunnelHandle) -> Result<u16, Fail> {
        let current: u16 = self.tunnel_entry(handle, "tunnel_assign_id")?.tunnel_id;
        if current != 0 {
            return Ok(current);
        }
        let index: &HashMap<u16, usize> = &self.tunnel_index;
        let tunnel_id: u16 = match self.ids.allocate(|id| index.contains_key(&id)) {
            Ok(id) => id,
            Err(e) => {
                self.stats.no_tunnel_resources += 1;
                return Err(e);
            },
        };
        self.unindex_tunnel(handle.index);
        let tunnel: &mut Tunnel = self.tunnel_entry(handle, "tunnel_assign_id")?;
        tunnel.tunnel_id = tunnel_id;
        tunnel.fsm.rename(&format!("tunl {}", tunnel_id));
        self.index_tunnel(handle.index);
        debug!("tunnel_assign_id(): assigned tunnel id {}", tunnel_id);
        Ok(tunnel_id)
    }

    pub fn tunnel_inc_use_count(&mut self, handle: TunnelHandle) -> Result<u32, Fail> {
        let tunnel: &mut Tunnel = self.tunnel_entry(handle, "tunnel_inc_use_count")?;
        tunnel.use_count += 1;
        Ok(tunnel.use_count)
    }

    /// Drops one reference. On the last one the tunnel's sessions are torn down, then its peer reference is released,
    /// then the tunnel is freed. Returns the remaining count.
    pub fn tunnel_dec_use_count(&mut self, handle: TunnelHandle) -> Result<u32, Fail> {
        let tunnel: &mut Tunnel = self.tunnel_entry(handle, "tunnel_dec_use_count")?;
        tunnel.use_count -= 1;
        let remaining: u32 = tunnel.use_count;
        if remaining == 0 {
            self.tunnel_destroy(handle.index);
        }
        Ok(remaining)
    }

    /// Drops the link reference, hiding the tunnel from lookups. Repeated calls are no-ops.
    pub fn tunnel_release(&mut self, handle: TunnelHandle) -> Result<u32, Fail> {
        let tunnel: &mut Tunnel = self.tunnel_entry(handle, "tunnel_release")?;
        if !tunnel.linked {
            return Ok(tunnel.use_count);
        }
        self.unindex_tunnel(handle.index);
        self.tunnel_entry(handle, "tunnel_release")?.linked = false;
        self.tunnel_dec_use_count(handle)
    }

    fn tunnel_destroy(&mut self, index: usize) {
        let sessions: Vec<SessionHandle> = match self.tunnels.get(index) {
            Some(tunnel) => tunnel.sessions.values().copied().collect(),
            None => return,
        };
        for session in sessions {
            self.session_destroy(session, true);
        }

        let peer: Option<PeerHandle> = self.tunnels.get(index).and_then(|t| t.peer);
        if let Some(peer) = peer {
            if let Err(e) = self.peer_dec_use_count(peer) {
                error!("tunnel_destroy(): cannot release peer ({:?})", e);
            }
        }

        self.unindex_tunnel(index);
        let tunnel: Tunnel = self.tunnels.remove(index);
        info!("tunnel_destroy(): freed tunnel {}", tunnel.tunnel_id);
    }

    /// Connects the tunnel's channel to its peer, or to `remote` when given, and records where it ended up.
    pub fn tunnel_connect(&mut self, handle: TunnelHandle, remote: Option<SocketAddrV4>) -> Result<(), Fail> {
        let tunnel: &mut Tunnel = self.tunnel_entry(handle, "tunnel_connect")?;
        let remote: SocketAddrV4 = match remote.or(tunnel.remote) {
            Some(remote) => remote,
            None => {
                let cause: String = format!("tunnel {} has no peer address", tunnel.tunnel_id);
                error!("tunnel_connect(): {}", cause);
                return Err(Fail::new(EINVAL, &cause));
            },
        };
        let channel: &mut Box<dyn ControlChannel> = match tunnel.channel.as_mut() {
            Some(channel) => channel,
            None => return Err(no_channel("tunnel_connect", tunnel.tunnel_id)),
        };
        let actual: SocketAddrV4 = channel.connect(remote)?;
        if tunnel.remote != Some(actual) {
            self.tunnel_set_remote(handle, actual)?;
        }
        Ok(())
    }

    /// Sends a packet on the tunnel's channel, counting the outcome.
    pub fn tunnel_send(&mut self, handle: TunnelHandle, pkt: &ControlPacket) -> Result<usize, Fail> {
        let tunnel: &mut Tunnel = self.tunnel_entry(handle, "tunnel_send")?;
        let result: Result<usize, Fail> = match tunnel.channel.as_mut() {
            Some(channel) => channel.send(pkt),
            None => Err(no_channel("tunnel_send", tunnel.tunnel_id)),
        };
        match result {
            Ok(len) => {
                self.stats.total_sent_control_frames += 1;
                Ok(len)
            },
            Err(e) => {
                self.stats.total_control_frame_send_fails += 1;
                Err(e)
            },
        }
    }

    /// Reads one datagram from the tunnel's channel.
    pub fn tunnel_recv(&mut self, handle: TunnelHandle, buf: &mut [u8]) -> Result<RecvOutcome, Fail> {
        let tunnel: &mut Tunnel = self.tunnel_entry(handle, "tunnel_recv")?;
        match tunnel.channel.as_mut() {
            Some(channel) => channel.recv(buf),
            None => Err(no_channel("tunnel_recv", tunnel.tunnel_id)),
        }
    }

    pub fn tunnel_set_pmtu_discovery(&mut self, handle: TunnelHandle, enabled: bool) -> Result<(), Fail> {
        let tunnel: &mut Tunnel = self.tunnel_entry(handle, "tunnel_set_pmtu_discovery")?;
        match tunnel.channel.as_mut() {
            Some(channel) => channel.set_pmtu_discovery(enabled),
            None => Err(no_channel("tunnel_set_pmtu_discovery", tunnel.tunnel_id)),
        }
    }

    /// Updates the transport sequence state of a tunnel.
    pub fn tunnel_set_sequence(&mut self, handle: TunnelHandle, ns: u16, nr: u16) -> Result<(), Fail> {
        let tunnel: &mut Tunnel = self.tunnel_entry(handle, "tunnel_set_sequence")?;
        tunnel.ns = ns;
        tunnel.nr = nr;
        Ok(())
    }

    /// Feeds an event to the tunnel state machine and returns the messages it wants sent.
    pub fn tunnel_handle_event(&mut self, handle: TunnelHandle, event: TunnelEvent) -> Result<Vec<MessageType>, Fail> {
        let tunnel: &mut Tunnel = self.tunnel_entry(handle, "tunnel_handle_event")?;
        tunnel.fsm.handle_event(event, &mut tunnel.actions);
        let outbox: Vec<MessageType> = mem::take(&mut tunnel.actions.outbox);
        let requests: Vec<TunnelRequest> = mem::take(&mut tunnel.actions.requests);
        for request in requests {
            match request {
                TunnelRequest::AssignId => {
                    self.tunnel_assign_id(handle)?;
                },
                TunnelRequest::Release => {
                    self.tunnel_release(handle)?;
                },
            }
        }
        Ok(outbox)
    }

    /// Tells listeners a tunnel was bootstrapped from an inbound request.
    pub fn tunnel_created(&mut self, handle: TunnelHandle) -> Result<(), Fail> {
        let tunnel: &mut Tunnel = self.tunnel_entry(handle, "tunnel_created")?;
        let event: TunnelCreated = TunnelCreated {
            tunnel_id: tunnel.tunnel_id,
            remote: tunnel.remote,
        };
        self.hooks.tunnel_created(&event)
    }

    //==================================================================================================================
    // Sessions
    //==================================================================================================================

    pub fn session(&self, handle: SessionHandle) -> Option<&Session> {
        self.sessions.get(handle.index).filter(|s| s.generation == handle.generation)
    }

    fn session_entry(&mut self, handle: SessionHandle, op: &str) -> Result<&mut Session, Fail> {
        match self.sessions.get_mut(handle.index) {
            Some(session) if session.generation == handle.generation => Ok(session),
            _ => Err(stale(op, "session")),
        }
    }

    pub fn session_find(&self, tunnel: TunnelHandle, session_id: u16) -> Option<SessionHandle> {
        self.tunnel(tunnel)?.sessions.get(&session_id).copied()
    }

    /// Creates a session inside an established tunnel, with a use count of one.
    ///
    /// `profile_name` defaults to the peer profile's session profile. The session profile must name an existing PPP
    /// profile: a missing one fails the creation.
    pub fn session_alloc(&mut self, handle: TunnelHandle, profile_name: Option<&str>) -> Result<SessionHandle, Fail> {
        match self.session_build(handle, profile_name) {
            Ok(session) => Ok(session),
            Err(e) => {
                if e.is_resource_exhaustion() {
                    self.stats.no_session_resources += 1;
                } else if e.is_policy_refusal() {
                    self.stats.too_many_sessions += 1;
                } else {
                    self.stats.session_setup_failures += 1;
                }
                Err(e)
            },
        }
    }

    fn session_build(&mut self, handle: TunnelHandle, profile_name: Option<&str>) -> Result<SessionHandle, Fail> {
        if !self.config.session_creation_enabled {
            let cause: String = format!("session creation is disabled");
            info!("session_alloc(): {}", cause);
            return Err(Fail::new(EPERM, &cause));
        }
        if self.config.max_sessions != 0 && self.sessions.len() >= self.config.max_sessions {
            let cause: String = format!("session limit reached (max={})", self.config.max_sessions);
            warn!("session_alloc(): {}", cause);
            return Err(Fail::new(EPERM, &cause));
        }

        let tunnel: &Tunnel = match self.tunnels.get(handle.index) {
            Some(tunnel) if tunnel.generation == handle.generation => tunnel,
            _ => return Err(stale("session_alloc", "tunnel")),
        };
        if tunnel.tunnel_id == 0 {
            let cause: String = format!("tunnel has no id yet");
            error!("session_alloc(): {}", cause);
            return Err(Fail::new(EINVAL, &cause));
        }
        if tunnel.max_sessions != 0 && tunnel.sessions.len() >= tunnel.max_sessions {
            let cause: String = format!(
                "tunnel {} session limit reached (max={})",
                tunnel.tunnel_id, tunnel.max_sessions
            );
            warn!("session_alloc(): {}", cause);
            return Err(Fail::new(EPERM, &cause));
        }

        let profile: SessionProfile = match profile_name {
            Some(name) => self.profiles.session_profile_get(name)?.clone(),
            None => {
                let peer_profile = self.profiles.peer_profile_get(&tunnel.peer_profile_name)?;
                self.profiles.session_profile_get(&peer_profile.default_session_profile_name)?.clone()
            },
        };
        let ppp: PppProfile = self.profiles.ppp_profile_get(&profile.ppp_profile_name)?.clone();
        let (mtu, mru): (u16, u16) = ppp.link_mtu_mru(tunnel.mtu);
        let tunnel_id: u16 = tunnel.tunnel_id;
        let peer_tunnel_id: u16 = tunnel.peer_tunnel_id;

        let taken: &HashMap<u16, SessionHandle> = &tunnel.sessions;
        let session_id: u16 = self.ids.allocate(|id| taken.contains_key(&id))?;

        let generation: u64 = self.next_generation();
        let session: Session = Session {
            generation,
            tunnel: handle,
            ids: SessionIds {
                tunnel_id,
                session_id,
                peer_tunnel_id,
                peer_session_id: 0,
            },
            profile_name: profile.name.clone(),
            ppp_profile_name: profile.ppp_profile_name.clone(),
            ppp,
            use_sequence_numbers: profile.use_sequence_numbers,
            sequencing_required: profile.sequencing_required,
            reorder_timeout: profile.reorder_timeout,
            mtu,
            mru,
            use_count: 1,
            fsm: FsmInstance::new(
                &format!("sess {}/{}", tunnel_id, session_id),
                SessionState::Idle,
                self.session_table.clone(),
            ),
            actions: SessionActions::default(),
        };
        let link = session.link();
        let index: usize = self.sessions.insert(session);
        let session_handle: SessionHandle = SessionHandle { index, generation };
        self.tunnel_entry(handle, "session_alloc")?.sessions.insert(session_id, session_handle);

        if let Err(e) = self.hooks.session_created(&link) {
            warn!("session_alloc(): listener refused session {}/{} ({:?})", tunnel_id, session_id, e);
            self.sessions.remove(index);
            self.tunnel_entry(handle, "session_alloc")?.sessions.remove(&session_id);
            return Err(e);
        }
        debug!("session_alloc(): created session {}/{}", tunnel_id, session_id);
        Ok(session_handle)
    }

    pub fn session_set_peer_session_id(&mut self, handle: SessionHandle, peer_session_id: u16) -> Result<(), Fail> {
        self.session_entry(handle, "session_set_peer_session_id")?.ids.peer_session_id = peer_session_id;
        Ok(())
    }

    pub fn session_inc_use_count(&mut self, handle: SessionHandle) -> Result<u32, Fail> {
        let session: &mut Session = self.session_entry(handle, "session_inc_use_count")?;
        session.use_count += 1;
        Ok(session.use_count)
    }

    /// Drops one reference and deletes the session on the last one. Returns the remaining count.
    pub fn session_dec_use_count(&mut self, handle: SessionHandle) -> Result<u32, Fail> {
        let session: &mut Session = self.session_entry(handle, "session_dec_use_count")?;
        session.use_count -= 1;
        let remaining: u32 = session.use_count;
        if remaining == 0 {
            self.session_destroy(handle, false);
        }
        Ok(remaining)
    }

    /// Frees a session regardless of its use count. With `tunnel_down`, the session state machine is told first so
    /// that a running call reports going down.
    fn session_destroy(&mut self, handle: SessionHandle, tunnel_down: bool) {
        let session: &mut Session = match self.sessions.get_mut(handle.index) {
            Some(session) if session.generation == handle.generation => session,
            _ => return,
        };
        if tunnel_down {
            session.fsm.handle_event(SessionEvent::TunnelDown, &mut session.actions);
            let requests: Vec<SessionRequest> = mem::take(&mut session.actions.requests);
            session.actions.outbox.clear();
            if requests.contains(&SessionRequest::Down) {
                let ids: SessionIds = session.ids;
                if let Err(e) = self.hooks.session_down(&ids) {
                    warn!("session_destroy(): down hook failed ({:?})", e);
                }
            }
        }

        let session: Session = self.sessions.remove(handle.index);
        if let Some(tunnel) = self.tunnels.get_mut(session.tunnel.index) {
            if tunnel.generation == session.tunnel.generation {
                tunnel.sessions.remove(&session.ids.session_id);
            }
        }
        if let Err(e) = self.hooks.session_deleted(&session.ids) {
            warn!("session_destroy(): deleted hook failed ({:?})", e);
        }
        debug!(
            "session_destroy(): freed session {}/{}",
            session.ids.tunnel_id, session.ids.session_id
        );
    }

    /// Feeds an event to the session state machine and returns the messages it wants sent.
    pub fn session_handle_event(
        &mut self,
        handle: SessionHandle,
        event: SessionEvent,
    ) -> Result<Vec<MessageType>, Fail> {
        let session: &mut Session = self.session_entry(handle, "session_handle_event")?;
        session.fsm.handle_event(event, &mut session.actions);
        let outbox: Vec<MessageType> = mem::take(&mut session.actions.outbox);
        let requests: Vec<SessionRequest> = mem::take(&mut session.actions.requests);
        for request in requests {
            match request {
                SessionRequest::Up => self.session_up(handle)?,
                SessionRequest::Down => self.session_down(handle)?,
                SessionRequest::Release => {
                    self.session_dec_use_count(handle)?;
                },
            }
        }
        Ok(outbox)
    }

    pub fn session_up(&mut self, handle: SessionHandle) -> Result<(), Fail> {
        let ids: SessionIds = self.session_entry(handle, "session_up")?.ids;
        info!("session_up(): {}/{} peer {}/{}", ids.tunnel_id, ids.session_id, ids.peer_tunnel_id, ids.peer_session_id);
        self.hooks.session_up(&ids)
    }

    pub fn session_down(&mut self, handle: SessionHandle) -> Result<(), Fail> {
        let ids: SessionIds = self.session_entry(handle, "session_down")?.ids;
        info!("session_down(): {}/{}", ids.tunnel_id, ids.session_id);
        self.hooks.session_down(&ids)
    }

    /// Changes an in-flight session. Sequencing settings take effect at once; a new PPP profile name is recorded but
    /// the running link keeps its negotiated parameters.
    pub fn session_modify(&mut self, handle: SessionHandle, change: SessionModify) -> Result<(), Fail> {
        if let Some(name) = change.ppp_profile_name.as_deref() {
            self.profiles.ppp_profile_get(name)?;
        }
        let session: &mut Session = self.session_entry(handle, "session_modify")?;
        if let Some(value) = change.use_sequence_numbers {
            session.use_sequence_numbers = value;
        }
        if let Some(value) = change.sequencing_required {
            session.sequencing_required = value;
        }
        if let Some(value) = change.reorder_timeout {
            session.reorder_timeout = value;
        }
        if let Some(name) = change.ppp_profile_name {
            session.ppp_profile_name = name;
        }
        let link = session.link();
        self.hooks.session_modified(&link)
    }

    pub fn session_get_stats(&mut self, handle: SessionHandle) -> Result<SessionStats, Fail> {
        let ids: SessionIds = self.session_entry(handle, "session_get_stats")?.ids;
        self.hooks.session_get_stats(&ids)
    }

    //==================================================================================================================
    // Shutdown
    //==================================================================================================================

    /// Frees every object regardless of outstanding references.
    pub fn shutdown(&mut self) {
        let indices: Vec<usize> = self.tunnels.iter().map(|(index, _)| index).collect();
        for index in indices {
            self.tunnel_destroy(index);
        }
        if !self.peers.is_empty() {
            warn!("shutdown(): {} peers still referenced", self.peers.len());
        }
        self.peers.clear();
        self.peer_index.clear();
        self.by_remote.clear();
        self.tunnel_index.clear();
        info!("shutdown(): registry cleared");
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_peers: 0,
            max_tunnels: 0,
            max_sessions: 0,
            tunnel_creation_enabled: true,
            session_creation_enabled: true,
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn stale(op: &str, kind: &str) -> Fail {
    let cause: String = format!("stale or released {} handle", kind);
    error!("{}(): {}", op, cause);
    Fail::new(EINVAL, &cause)
}

fn no_channel(op: &str, tunnel_id: u16) -> Fail {
    let cause: String = format!("tunnel {} has no control channel", tunnel_id);
    error!("{}(): {}", op, cause);
    Fail::new(ENOTCONN, &cause)
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
