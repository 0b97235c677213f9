// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::net::Ipv4Addr;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Generation-checked reference to a [Peer] held by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerHandle {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

/// A remote IP endpoint, keyed by the local address it reached us on and its own address.
#[derive(Debug)]
pub struct Peer {
    pub(crate) generation: u64,
    local: Ipv4Addr,
    remote: Ipv4Addr,
    pub(crate) use_count: u32,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Peer {
    pub(crate) fn new(generation: u64, local: Ipv4Addr, remote: Ipv4Addr) -> Self {
        Self {
            generation,
            local,
            remote,
            use_count: 1,
        }
    }

    pub fn local(&self) -> Ipv4Addr {
        self.local
    }

    pub fn remote(&self) -> Ipv4Addr {
        self.remote
    }

    pub fn key(&self) -> (Ipv4Addr, Ipv4Addr) {
        (self.local, self.remote)
    }

    pub fn use_count(&self) -> u32 {
        self.use_count
    }
}
