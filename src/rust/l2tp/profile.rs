// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Named parameter bundles for peers, tunnels, sessions and the PPP collaborator.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits::DEFAULT_TUNNEL_MTU,
};
use ::std::{
    collections::HashMap,
    net::Ipv4Addr,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Every profile table carries one entry with this name.
pub const DEFAULT_PROFILE_NAME: &str = "default";

pub const PPP_AUTH_REFUSE_PAP: u32 = 0x0001;
pub const PPP_AUTH_REFUSE_CHAP: u32 = 0x0002;
pub const PPP_AUTH_REFUSE_MSCHAP: u32 = 0x0004;
pub const PPP_AUTH_REFUSE_MSCHAPV2: u32 = 0x0008;
pub const PPP_AUTH_REFUSE_EAP: u32 = 0x0010;
pub const PPP_AUTH_REQUIRE_PAP: u32 = 0x0100;
pub const PPP_AUTH_REQUIRE_CHAP: u32 = 0x0200;
pub const PPP_AUTH_REQUIRE_MSCHAP: u32 = 0x0400;
pub const PPP_AUTH_REQUIRE_MSCHAPV2: u32 = 0x0800;
pub const PPP_AUTH_REQUIRE_EAP: u32 = 0x1000;
pub const PPP_AUTH_REQUIRE_NONE: u32 = 0x8000;

pub const PPP_COMP_MPPC: u32 = 0x0001;
pub const PPP_COMP_ACCOMP: u32 = 0x0002;
pub const PPP_COMP_PCOMP: u32 = 0x0004;
pub const PPP_COMP_BSDCOMP: u32 = 0x0008;
pub const PPP_COMP_DEFLATE: u32 = 0x0010;
pub const PPP_COMP_PREDICTOR1: u32 = 0x0020;
pub const PPP_COMP_VJ: u32 = 0x0040;
pub const PPP_COMP_CCOMP_VJ: u32 = 0x0080;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Parameters applied to a remote endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerProfile {
    pub name: String,
    pub peer_addr: Option<Ipv4Addr>,
    pub default_tunnel_profile_name: String,
    pub default_session_profile_name: String,
}

/// Parameters of a control connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelProfile {
    pub name: String,
    /// Host name advertised to peers.
    pub host_name: String,
    pub mtu: u16,
    pub use_udp_checksums: bool,
    pub max_sessions: usize,
}

/// Parameters of a call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionProfile {
    pub name: String,
    pub use_sequence_numbers: bool,
    pub sequencing_required: bool,
    /// Milliseconds; zero disables reordering.
    pub reorder_timeout: u32,
    pub ppp_profile_name: String,
}

/// PPP negotiation parameters handed to the PPP collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PppProfile {
    pub name: String,
    pub asyncmap: u32,
    pub mtu: u16,
    pub mru: u16,
    pub auth_flags: u32,
    pub comp_flags: u32,
    pub chap_interval: u32,
    pub chap_max_challenge: u32,
    pub chap_restart: u32,
    pub pap_max_auth_requests: u32,
    pub pap_restart_interval: u32,
    pub pap_timeout: u32,
    pub idle_timeout: u32,
    pub ipcp_max_config_requests: u32,
    pub ipcp_max_config_naks: u32,
    pub ipcp_max_terminate_requests: u32,
    pub ipcp_retransmit_interval: u32,
    pub lcp_echo_failure_count: u32,
    pub lcp_echo_interval: u32,
    pub lcp_max_config_requests: u32,
    pub lcp_max_config_naks: u32,
    pub lcp_max_terminate_requests: u32,
    pub lcp_retransmit_interval: u32,
    pub max_connect_time: u32,
    pub max_failure_count: u32,
    pub local_ip_addr: Option<Ipv4Addr>,
    pub peer_ip_addr: Option<Ipv4Addr>,
    pub dns_addr_1: Option<Ipv4Addr>,
    pub dns_addr_2: Option<Ipv4Addr>,
    pub wins_addr_1: Option<Ipv4Addr>,
    pub wins_addr_2: Option<Ipv4Addr>,
    pub multilink: bool,
}

/// Profile tables. The `default` entries always exist.
#[derive(Clone, Debug)]
pub struct ProfileStore {
    peers: HashMap<String, PeerProfile>,
    tunnels: HashMap<String, TunnelProfile>,
    sessions: HashMap<String, SessionProfile>,
    ppps: HashMap<String, PppProfile>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl PeerProfile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

impl TunnelProfile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

impl SessionProfile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

impl PppProfile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// MTU and MRU a session may use over a tunnel of `tunnel_mtu`.
    pub fn link_mtu_mru(&self, tunnel_mtu: u16) -> (u16, u16) {
        (tunnel_mtu.min(self.mtu), tunnel_mtu.min(self.mru))
    }
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer_profile_get(&self, name: &str) -> Result<&PeerProfile, Fail> {
        self.peers.get(name).ok_or_else(|| not_found("peer", name))
    }

    pub fn tunnel_profile_get(&self, name: &str) -> Result<&TunnelProfile, Fail> {
        self.tunnels.get(name).ok_or_else(|| not_found("tunnel", name))
    }

    pub fn session_profile_get(&self, name: &str) -> Result<&SessionProfile, Fail> {
        self.sessions.get(name).ok_or_else(|| not_found("session", name))
    }

    pub fn ppp_profile_get(&self, name: &str) -> Result<&PppProfile, Fail> {
        self.ppps.get(name).ok_or_else(|| not_found("ppp", name))
    }

    /// Adds or replaces a peer profile.
    pub fn set_peer_profile(&mut self, profile: PeerProfile) {
        self.peers.insert(profile.name.clone(), profile);
    }

    pub fn set_tunnel_profile(&mut self, profile: TunnelProfile) {
        self.tunnels.insert(profile.name.clone(), profile);
    }

    pub fn set_session_profile(&mut self, profile: SessionProfile) {
        self.sessions.insert(profile.name.clone(), profile);
    }

    pub fn set_ppp_profile(&mut self, profile: PppProfile) {
        self.ppps.insert(profile.name.clone(), profile);
    }

    /// Removes a PPP profile. The default one cannot be removed.
    pub fn remove_ppp_profile(&mut self, name: &str) -> Result<PppProfile, Fail> {
        if name == DEFAULT_PROFILE_NAME {
            let cause: String = format!("cannot delete the default ppp profile");
            warn!("remove_ppp_profile(): {}", cause);
            return Err(Fail::new(libc::EPERM, &cause));
        }
        self.ppps.remove(name).ok_or_else(|| not_found("ppp", name))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for PeerProfile {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROFILE_NAME.to_string(),
            peer_addr: None,
            default_tunnel_profile_name: DEFAULT_PROFILE_NAME.to_string(),
            default_session_profile_name: DEFAULT_PROFILE_NAME.to_string(),
        }
    }
}

impl Default for TunnelProfile {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROFILE_NAME.to_string(),
            host_name: "l2tpd".to_string(),
            mtu: DEFAULT_TUNNEL_MTU,
            use_udp_checksums: false,
            max_sessions: 0,
        }
    }
}

impl Default for SessionProfile {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROFILE_NAME.to_string(),
            use_sequence_numbers: false,
            sequencing_required: false,
            reorder_timeout: 0,
            ppp_profile_name: DEFAULT_PROFILE_NAME.to_string(),
        }
    }
}

impl Default for PppProfile {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROFILE_NAME.to_string(),
            asyncmap: 0,
            mtu: 1500,
            mru: 1500,
            auth_flags: 0,
            comp_flags: 0,
            chap_interval: 0,
            chap_max_challenge: 10,
            chap_restart: 3,
            pap_max_auth_requests: 10,
            pap_restart_interval: 3,
            pap_timeout: 0,
            idle_timeout: 0,
            ipcp_max_config_requests: 10,
            ipcp_max_config_naks: 10,
            ipcp_max_terminate_requests: 3,
            ipcp_retransmit_interval: 3,
            lcp_echo_failure_count: 0,
            lcp_echo_interval: 0,
            lcp_max_config_requests: 10,
            lcp_max_config_naks: 10,
            lcp_max_terminate_requests: 3,
            lcp_retransmit_interval: 3,
            max_connect_time: 0,
            max_failure_count: 10,
            local_ip_addr: None,
            peer_ip_addr: None,
            dns_addr_1: None,
            dns_addr_2: None,
            wins_addr_1: None,
            wins_addr_2: None,
            multilink: false,
        }
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        let mut store: ProfileStore = ProfileStore {
            peers: HashMap::new(),
            tunnels: HashMap::new(),
            sessions: HashMap::new(),
            ppps: HashMap::new(),
        };
        store.set_peer_profile(PeerProfile::default());
        store.set_tunnel_profile(TunnelProfile::default());
        store.set_session_profile(SessionProfile::default());
        store.set_ppp_profile(PppProfile::default());
        store
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn not_found(kind: &str, name: &str) -> Fail {
    let cause: String = format!("{} profile '{}' not found", kind, name);
    debug!("profile_get(): {}", cause);
    Fail::new(libc::ENOENT, &cause)
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
