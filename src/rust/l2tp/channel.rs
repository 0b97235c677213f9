// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    l2tp::protocol::packet::ControlPacket,
    runtime::fail::Fail,
};
use ::std::{
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    os::unix::io::RawFd,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Result of one receive on a connected channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecvOutcome {
    /// A datagram of this many bytes was read.
    Received(usize),
    WouldBlock,
    /// The kernel reported a smaller path MTU.
    MtuChanged(u16),
    /// The peer's port is unreachable. Not an error: the tunnel ages out on its own.
    PeerGone,
}

/// The per-tunnel socket a tunnel sends and receives its control traffic on.
pub trait ControlChannel {
    /// Descriptor to register with the event loop, if the channel has one.
    fn fd(&self) -> Option<RawFd>;

    fn is_connected(&self) -> bool;

    /// Connects to `remote` and returns the peer address the kernel settled on.
    fn connect(&mut self, remote: SocketAddrV4) -> Result<SocketAddrV4, Fail>;

    fn send(&mut self, pkt: &ControlPacket) -> Result<usize, Fail>;

    fn recv(&mut self, buf: &mut [u8]) -> Result<RecvOutcome, Fail>;

    /// Turns path MTU discovery on or off for this channel.
    fn set_pmtu_discovery(&mut self, enabled: bool) -> Result<(), Fail>;
}

/// Opens control channels for freshly bootstrapped tunnels.
pub trait ChannelFactory {
    /// `local` is the address the request arrived on, when known.
    fn open(&mut self, local: Option<Ipv4Addr>, remote: SocketAddrV4) -> Result<Box<dyn ControlChannel>, Fail>;
}
