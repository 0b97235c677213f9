// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    l2tp::{
        profile::{
            PeerProfile,
            PppProfile,
            ProfileStore,
            SessionProfile,
            TunnelProfile,
        },
        registry::RegistryConfig,
    },
    runtime::fail::Fail,
};
use ::std::{
    fs::File,
    io::Read,
    net::Ipv4Addr,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Daemon-wide options. Each may be overridden by an environment variable named after the upper-cased key.
mod l2tpd_config {
    pub const SECTION_NAME: &str = "l2tpd";
    pub const UDP_PORT: &str = "udp_port";
    pub const BIND_ADDR: &str = "bind_addr";
    pub const USE_UDP_CHECKSUMS: &str = "use_udp_checksums";
    pub const MAX_PEERS: &str = "max_peers";
    pub const MAX_TUNNELS: &str = "max_tunnels";
    pub const MAX_SESSIONS: &str = "max_sessions";
    pub const TUNNEL_CREATION_ENABLED: &str = "tunnel_creation_enabled";
    pub const SESSION_CREATION_ENABLED: &str = "session_creation_enabled";
}

// Profile lists. Each list item is a map carrying a `name`.
mod profiles_config {
    pub const SECTION_NAME: &str = "profiles";
    pub const PEER: &str = "peer";
    pub const TUNNEL: &str = "tunnel";
    pub const SESSION: &str = "session";
    pub const PPP: &str = "ppp";
    pub const NAME: &str = "name";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Daemon configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        let mut file: File = match File::open(config_path) {
            Ok(file) => file,
            Err(e) => {
                let cause: String = format!("cannot open {}: {:?}", config_path, e);
                error!("new(): {}", cause);
                return Err(Fail::new(libc::ENOENT, &cause));
            },
        };
        file.read_to_string(&mut config_s)?;
        Self::from_yaml_str(&config_s)
    }

    /// Parses a configuration document held in memory.
    pub fn from_yaml_str(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("malformed configuration: {}", e);
                error!("from_yaml_str(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        let config_obj: &Yaml = match &config[..] {
            &[ref c] => c,
            _ => return Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        };

        Ok(Self(config_obj.clone()))
    }

    /// An empty configuration: every option takes its default.
    pub fn empty() -> Self {
        Self(Yaml::Hash(Default::default()))
    }

    fn get_l2tpd_config(&self) -> Option<&Yaml> {
        Self::get_optional_subsection(&self.0, l2tpd_config::SECTION_NAME)
    }

    fn get_profiles_config(&self) -> Option<&Yaml> {
        Self::get_optional_subsection(&self.0, profiles_config::SECTION_NAME)
    }

    /// UDP port of the unconnected socket. Zero means "look it up in the services database".
    pub fn udp_port(&self) -> Result<u16, Fail> {
        self.l2tpd_int(l2tpd_config::UDP_PORT, 0)
    }

    pub fn bind_addr(&self) -> Result<Ipv4Addr, Fail> {
        if let Some(addr) = Self::get_typed_env_option(l2tpd_config::BIND_ADDR)? {
            return Ok(addr);
        }
        match self.get_l2tpd_config() {
            Some(section) if Self::has_option(section, l2tpd_config::BIND_ADDR) => {
                Self::get_typed_str_option(section, l2tpd_config::BIND_ADDR, |val: &str| val.parse().ok())
            },
            _ => Ok(Ipv4Addr::UNSPECIFIED),
        }
    }

    pub fn use_udp_checksums(&self) -> Result<bool, Fail> {
        self.l2tpd_bool(l2tpd_config::USE_UDP_CHECKSUMS, false)
    }

    /// Administrative limits and switches for the object registry.
    pub fn registry_config(&self) -> Result<RegistryConfig, Fail> {
        let defaults: RegistryConfig = RegistryConfig::default();
        Ok(RegistryConfig {
            max_peers: self.l2tpd_int(l2tpd_config::MAX_PEERS, defaults.max_peers)?,
            max_tunnels: self.l2tpd_int(l2tpd_config::MAX_TUNNELS, defaults.max_tunnels)?,
            max_sessions: self.l2tpd_int(l2tpd_config::MAX_SESSIONS, defaults.max_sessions)?,
            tunnel_creation_enabled: self
                .l2tpd_bool(l2tpd_config::TUNNEL_CREATION_ENABLED, defaults.tunnel_creation_enabled)?,
            session_creation_enabled: self
                .l2tpd_bool(l2tpd_config::SESSION_CREATION_ENABLED, defaults.session_creation_enabled)?,
        })
    }

    /// Builds the profile tables. Profiles named `default` replace the built-in ones.
    pub fn profiles(&self) -> Result<ProfileStore, Fail> {
        let mut store: ProfileStore = ProfileStore::new();
        let section: &Yaml = match self.get_profiles_config() {
            Some(section) => section,
            None => return Ok(store),
        };
        for item in Self::get_list(section, profiles_config::PEER)? {
            store.set_peer_profile(Self::peer_profile(item)?);
        }
        for item in Self::get_list(section, profiles_config::TUNNEL)? {
            store.set_tunnel_profile(Self::tunnel_profile(item)?);
        }
        for item in Self::get_list(section, profiles_config::SESSION)? {
            store.set_session_profile(Self::session_profile(item)?);
        }
        for item in Self::get_list(section, profiles_config::PPP)? {
            store.set_ppp_profile(Self::ppp_profile(item)?);
        }
        Ok(store)
    }

    fn l2tpd_int<T: TryFrom<i64>>(&self, index: &str, default: T) -> Result<T, Fail> {
        if let Some(value) = Self::get_typed_env_option::<i64>(index)? {
            return Self::int_in_range(index, value);
        }
        match self.get_l2tpd_config() {
            Some(section) => Self::get_int_or(section, index, default),
            None => Ok(default),
        }
    }

    fn l2tpd_bool(&self, index: &str, default: bool) -> Result<bool, Fail> {
        if let Some(value) = Self::get_typed_env_option(index)? {
            return Ok(value);
        }
        match self.get_l2tpd_config() {
            Some(section) => Self::get_bool_or(section, index, default),
            None => Ok(default),
        }
    }

    //==================================================================================================================
    // Profile Parsers
    //==================================================================================================================

    fn peer_profile(item: &Yaml) -> Result<PeerProfile, Fail> {
        let defaults: PeerProfile = PeerProfile::new(&Self::profile_name(item)?);
        Ok(PeerProfile {
            peer_addr: Self::get_ipv4_or(item, "peer_addr", defaults.peer_addr)?,
            default_tunnel_profile_name: Self::get_str_or(
                item,
                "tunnel_profile_name",
                &defaults.default_tunnel_profile_name,
            )?,
            default_session_profile_name: Self::get_str_or(
                item,
                "session_profile_name",
                &defaults.default_session_profile_name,
            )?,
            ..defaults
        })
    }

    fn tunnel_profile(item: &Yaml) -> Result<TunnelProfile, Fail> {
        let defaults: TunnelProfile = TunnelProfile::new(&Self::profile_name(item)?);
        Ok(TunnelProfile {
            host_name: Self::get_str_or(item, "host_name", &defaults.host_name)?,
            mtu: Self::get_int_or(item, "mtu", defaults.mtu)?,
            use_udp_checksums: Self::get_bool_or(item, "use_udp_checksums", defaults.use_udp_checksums)?,
            max_sessions: Self::get_int_or(item, "max_sessions", defaults.max_sessions)?,
            ..defaults
        })
    }

    fn session_profile(item: &Yaml) -> Result<SessionProfile, Fail> {
        let defaults: SessionProfile = SessionProfile::new(&Self::profile_name(item)?);
        Ok(SessionProfile {
            use_sequence_numbers: Self::get_bool_or(item, "use_sequence_numbers", defaults.use_sequence_numbers)?,
            sequencing_required: Self::get_bool_or(item, "sequencing_required", defaults.sequencing_required)?,
            reorder_timeout: Self::get_int_or(item, "reorder_timeout", defaults.reorder_timeout)?,
            ppp_profile_name: Self::get_str_or(item, "ppp_profile_name", &defaults.ppp_profile_name)?,
            ..defaults
        })
    }

    fn ppp_profile(item: &Yaml) -> Result<PppProfile, Fail> {
        let defaults: PppProfile = PppProfile::new(&Self::profile_name(item)?);
        Ok(PppProfile {
            asyncmap: Self::get_int_or(item, "asyncmap", defaults.asyncmap)?,
            mtu: Self::get_int_or(item, "mtu", defaults.mtu)?,
            mru: Self::get_int_or(item, "mru", defaults.mru)?,
            auth_flags: Self::get_int_or(item, "auth_flags", defaults.auth_flags)?,
            comp_flags: Self::get_int_or(item, "comp_flags", defaults.comp_flags)?,
            idle_timeout: Self::get_int_or(item, "idle_timeout", defaults.idle_timeout)?,
            lcp_echo_failure_count: Self::get_int_or(item, "lcp_echo_failure_count", defaults.lcp_echo_failure_count)?,
            lcp_echo_interval: Self::get_int_or(item, "lcp_echo_interval", defaults.lcp_echo_interval)?,
            max_connect_time: Self::get_int_or(item, "max_connect_time", defaults.max_connect_time)?,
            local_ip_addr: Self::get_ipv4_or(item, "local_ip_addr", defaults.local_ip_addr)?,
            peer_ip_addr: Self::get_ipv4_or(item, "peer_ip_addr", defaults.peer_ip_addr)?,
            dns_addr_1: Self::get_ipv4_or(item, "dns_addr_1", defaults.dns_addr_1)?,
            dns_addr_2: Self::get_ipv4_or(item, "dns_addr_2", defaults.dns_addr_2)?,
            multilink: Self::get_bool_or(item, "multilink", defaults.multilink)?,
            ..defaults
        })
    }

    fn profile_name(item: &Yaml) -> Result<String, Fail> {
        Self::get_typed_str_option(item, profiles_config::NAME, |val: &str| {
            if val.is_empty() {
                None
            } else {
                Some(val.to_string())
            }
        })
    }

    //==================================================================================================================
    // Static Functions
    //==================================================================================================================

    fn get_optional_subsection<'a>(yaml: &'a Yaml, index: &str) -> Option<&'a Yaml> {
        let section: &'a Yaml = yaml.index(index);
        match section {
            Yaml::Hash(_) => Some(section),
            _ => None,
        }
    }

    fn has_option(yaml: &Yaml, index: &str) -> bool {
        !yaml.index(index).is_badvalue()
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
            value => Ok(value),
        }
    }

    /// Index `yaml` to find the value at `index`, validating that it exists and that the receiver returns Some(_).
    fn get_typed_option<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        let option: &'a Yaml = Self::get_option(yaml, index)?;
        match receiver(option) {
            Some(value) => Ok(value),
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find value at `index`, validating it as a string.
    fn get_typed_str_option<T, Fn>(yaml: &Yaml, index: &str, parser: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&str) -> Option<T>,
    {
        let option: &Yaml = Self::get_option(yaml, index)?;
        if let Some(value) = option.as_str() {
            if let Some(value) = parser(value) {
                return Ok(value);
            }
        }
        let message: String = format!("parameter {} has unexpected type", index);
        Err(Fail::new(libc::EINVAL, message.as_str()))
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Reads an integer and verifies that the destination type may hold it. Absent options yield `default`.
    fn get_int_or<T: TryFrom<i64>>(yaml: &Yaml, index: &str, default: T) -> Result<T, Fail> {
        if !Self::has_option(yaml, index) {
            return Ok(default);
        }
        let val: i64 = Self::get_typed_option(yaml, index, &Yaml::as_i64)?;
        Self::int_in_range(index, val)
    }

    fn int_in_range<T: TryFrom<i64>>(index: &str, val: i64) -> Result<T, Fail> {
        match T::try_from(val) {
            Ok(val) => Ok(val),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }

    fn get_bool_or(yaml: &Yaml, index: &str, default: bool) -> Result<bool, Fail> {
        if !Self::has_option(yaml, index) {
            return Ok(default);
        }
        Self::get_typed_option(yaml, index, &Yaml::as_bool)
    }

    fn get_str_or(yaml: &Yaml, index: &str, default: &str) -> Result<String, Fail> {
        if !Self::has_option(yaml, index) {
            return Ok(default.to_string());
        }
        Self::get_typed_str_option(yaml, index, |val: &str| Some(val.to_string()))
    }

    fn get_ipv4_or(yaml: &Yaml, index: &str, default: Option<Ipv4Addr>) -> Result<Option<Ipv4Addr>, Fail> {
        if !Self::has_option(yaml, index) {
            return Ok(default);
        }
        Self::get_typed_str_option(yaml, index, |val: &str| val.parse().ok().map(Some))
    }

    /// Items of an optional list. A present value that is not a list is malformed.
    fn get_list<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a [Yaml], Fail> {
        if !Self::has_option(yaml, index) {
            return Ok(&[]);
        }
        Self::get_typed_option(yaml, index, |yaml: &'a Yaml| match yaml {
            Yaml::Array(ref arr) => Some(arr.as_slice()),
            _ => None,
        })
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
