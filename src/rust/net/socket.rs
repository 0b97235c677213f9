// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! UDP sockets carrying L2TP control traffic.
//!
//! The daemon listens on one unconnected socket that reports the local destination address of every datagram. Each
//! tunnel then gets its own socket, bound to the address the peer reached and connected to the peer, so that the
//! kernel hands the tunnel's traffic and its ICMP feedback straight to it.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    l2tp::{
        channel::{
            ChannelFactory,
            ControlChannel,
            RecvOutcome,
        },
        dispatch::Datagram,
        protocol::packet::ControlPacket,
    },
    runtime::fail::Fail,
};
use ::libc::{
    c_int,
    c_void,
    socklen_t,
    EINTR,
    IPPROTO_IP,
    IP_MTU,
    IP_MTU_DISCOVER,
    IP_PKTINFO,
    IP_PMTUDISC_DO,
    IP_PMTUDISC_DONT,
    SOL_SOCKET,
    SO_NO_CHECK,
};
use ::socket2::{
    Domain,
    Protocol,
    SockAddr,
    Socket,
    Type,
};
use ::std::{
    io::{
        self,
        ErrorKind,
        Read,
    },
    mem,
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    os::unix::io::{
        AsRawFd,
        RawFd,
    },
    ptr,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Room for one `in_pktinfo` control message, in 8-byte words so the buffer is suitably aligned.
const CMSG_BUF_WORDS: usize = 8;

//======================================================================================================================
// Structures
//======================================================================================================================

/// The daemon's well-known-port socket. Receives tunnel requests and traffic for tunnels without a socket of their own.
pub struct UnconnectedSocket {
    socket: Socket,
}

/// A tunnel's own socket.
pub struct UdpChannel {
    socket: Socket,
    connected: bool,
}

/// Opens [UdpChannel]s bound to the L2TP port.
pub struct UdpChannelFactory {
    port: u16,
    use_udp_checksums: bool,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl UnconnectedSocket {
    /// Creates the socket and binds it to `bind_addr:port`.
    pub fn bind(bind_addr: Ipv4Addr, port: u16, use_udp_checksums: bool) -> Result<Self, Fail> {
        let socket: Socket = udp_socket(use_udp_checksums)?;
        setsockopt_int(socket.as_raw_fd(), IPPROTO_IP, IP_PKTINFO, 1)?;
        let local: SocketAddrV4 = SocketAddrV4::new(bind_addr, port);
        if let Err(e) = socket.bind(&SockAddr::from(local)) {
            error!("bind(): cannot bind to {} ({:?})", local, e);
            return Err(Fail::from(e));
        }
        info!("bind(): listening on {}", local);
        Ok(Self { socket })
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn local_addr(&self) -> Result<SocketAddrV4, Fail> {
        sock_addr_v4(&self.socket.local_addr()?)
    }

    /// Reads one datagram together with its sender and local destination address. Returns `None` when nothing is
    /// pending or when the read only carried an ICMP error for a vanished peer.
    pub fn recv(&self) -> Result<Option<Datagram>, Fail> {
        let mut buf: Vec<u8> = vec![0; crate::runtime::limits::MAX_FRAME_LEN];
        loop {
            match recv_with_pktinfo(self.socket.as_raw_fd(), &mut buf) {
                Ok((0, _, _)) => return Ok(None),
                Ok((len, from, local)) => {
                    buf.truncate(len);
                    return Ok(Some(Datagram::new(buf, from, local)));
                },
                Err(e) => match e.raw_os_error() {
                    Some(EINTR) => continue,
                    Some(libc::ECONNREFUSED) => {
                        debug!("recv(): peer unreachable");
                        return Ok(None);
                    },
                    _ if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                    _ => {
                        warn!("recv(): {:?}", e);
                        return Err(Fail::from(e));
                    },
                },
            }
        }
    }

    /// Sends raw bytes to `remote`.
    pub fn send_to(&self, buf: &[u8], remote: SocketAddrV4) -> Result<usize, Fail> {
        Ok(self.socket.send_to(buf, &SockAddr::from(remote))?)
    }
}

impl UdpChannel {
    /// Creates a tunnel socket bound to `local:port`.
    pub fn bind(local: Option<Ipv4Addr>, port: u16, use_udp_checksums: bool) -> Result<Self, Fail> {
        let socket: Socket = udp_socket(use_udp_checksums)?;
        let local: SocketAddrV4 = SocketAddrV4::new(local.unwrap_or(Ipv4Addr::UNSPECIFIED), port);
        if let Err(e) = socket.bind(&SockAddr::from(local)) {
            error!("bind(): cannot bind tunnel socket to {} ({:?})", local, e);
            return Err(Fail::from(e));
        }
        Ok(Self {
            socket,
            connected: false,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddrV4, Fail> {
        sock_addr_v4(&self.socket.local_addr()?)
    }

    /// Current path MTU towards the connected peer.
    pub fn query_mtu(&self) -> Result<u16, Fail> {
        let mtu: c_int = getsockopt_int(self.socket.as_raw_fd(), IPPROTO_IP, IP_MTU)?;
        match u16::try_from(mtu) {
            Ok(mtu) => Ok(mtu),
            Err(_) => {
                let cause: String = format!("kernel reported invalid mtu {}", mtu);
                error!("query_mtu(): {}", cause);
                Err(Fail::new(libc::ERANGE, &cause))
            },
        }
    }
}

impl UdpChannelFactory {
    pub fn new(port: u16, use_udp_checksums: bool) -> Self {
        Self {
            port,
            use_udp_checksums,
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl ControlChannel for UdpChannel {
    fn fd(&self) -> Option<RawFd> {
        Some(self.socket.as_raw_fd())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    /// Connects to `remote`, which may be any port the peer sent from, and returns the address the kernel recorded.
    fn connect(&mut self, remote: SocketAddrV4) -> Result<SocketAddrV4, Fail> {
        if let Err(e) = self.socket.connect(&SockAddr::from(remote)) {
            warn!("connect(): cannot connect to {} ({:?})", remote, e);
            return Err(Fail::from(e));
        }
        let actual: SocketAddrV4 = sock_addr_v4(&self.socket.peer_addr()?)?;
        self.connected = true;
        trace!("connect(): connected to {}", actual);
        Ok(actual)
    }

    fn send(&mut self, pkt: &ControlPacket) -> Result<usize, Fail> {
        loop {
            match self.socket.send_vectored(&pkt.io_slices()) {
                Ok(len) => {
                    trace!("send(): {} bytes", len);
                    return Ok(len);
                },
                Err(e) if e.raw_os_error() == Some(EINTR) => continue,
                Err(e) => {
                    debug!("send(): {:?}", e);
                    return Err(Fail::from(e));
                },
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<RecvOutcome, Fail> {
        loop {
            match self.socket.read(buf) {
                // Empty datagrams carry nothing worth dispatching.
                Ok(0) => continue,
                Ok(len) => return Ok(RecvOutcome::Received(len)),
                Err(e) => match e.raw_os_error() {
                    Some(EINTR) => continue,
                    Some(libc::ECONNREFUSED) => return Ok(RecvOutcome::PeerGone),
                    Some(libc::EMSGSIZE) if self.connected => return Ok(RecvOutcome::MtuChanged(self.query_mtu()?)),
                    _ if e.kind() == ErrorKind::WouldBlock => return Ok(RecvOutcome::WouldBlock),
                    _ => return Err(Fail::from(e)),
                },
            }
        }
    }

    fn set_pmtu_discovery(&mut self, enabled: bool) -> Result<(), Fail> {
        let mode: c_int = if enabled { IP_PMTUDISC_DO } else { IP_PMTUDISC_DONT };
        setsockopt_int(self.socket.as_raw_fd(), IPPROTO_IP, IP_MTU_DISCOVER, mode)
    }
}

impl ChannelFactory for UdpChannelFactory {
    fn open(&mut self, local: Option<Ipv4Addr>, remote: SocketAddrV4) -> Result<Box<dyn ControlChannel>, Fail> {
        let channel: UdpChannel = UdpChannel::bind(local, self.port, self.use_udp_checksums)?;
        debug!("open(): tunnel socket for {} on {:?}", remote, channel.local_addr().ok());
        Ok(Box::new(channel))
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Non-blocking UDP socket with address reuse, shared by both socket kinds.
fn udp_socket(use_udp_checksums: bool) -> Result<Socket, Fail> {
    let socket: Socket = match Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)) {
        Ok(socket) => socket,
        Err(e) => {
            error!("udp_socket(): failed to create socket ({:?})", e);
            return Err(Fail::from(e));
        },
    };
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.set_cloexec(true)?;
    if !use_udp_checksums {
        setsockopt_int(socket.as_raw_fd(), SOL_SOCKET, SO_NO_CHECK, 1)?;
    }
    Ok(socket)
}

fn sock_addr_v4(addr: &SockAddr) -> Result<SocketAddrV4, Fail> {
    match addr.as_socket_ipv4() {
        Some(addr) => Ok(addr),
        None => {
            let cause: String = format!("not an IPv4 address");
            error!("sock_addr_v4(): {}", cause);
            Err(Fail::new(libc::EAFNOSUPPORT, &cause))
        },
    }
}

fn setsockopt_int(fd: RawFd, level: c_int, name: c_int, value: c_int) -> Result<(), Fail> {
    let rc: c_int = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const c_int as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        )
    };
    if rc != 0 {
        let e: io::Error = io::Error::last_os_error();
        warn!("setsockopt_int(): level={} name={} ({:?})", level, name, e);
        return Err(Fail::from(e));
    }
    Ok(())
}

fn getsockopt_int(fd: RawFd, level: c_int, name: c_int) -> Result<c_int, Fail> {
    let mut value: c_int = 0;
    let mut len: socklen_t = mem::size_of::<c_int>() as socklen_t;
    let rc: c_int =
        unsafe { libc::getsockopt(fd, level, name, &mut value as *mut c_int as *mut c_void, &mut len) };
    if rc != 0 {
        let e: io::Error = io::Error::last_os_error();
        warn!("getsockopt_int(): level={} name={} ({:?})", level, name, e);
        return Err(Fail::from(e));
    }
    Ok(value)
}

/// `recvmsg()` returning the sender and, from the `IP_PKTINFO` control message, the local destination address.
fn recv_with_pktinfo(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddrV4>, Option<Ipv4Addr>)> {
    let mut from: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut iov: libc::iovec = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut c_void,
        iov_len: buf.len(),
    };
    let mut control: [u64; CMSG_BUF_WORDS] = [0; CMSG_BUF_WORDS];
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = &mut from as *mut libc::sockaddr_in as *mut c_void;
    msg.msg_namelen = mem::size_of::<libc::sockaddr_in>() as socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut c_void;
    msg.msg_controllen = mem::size_of_val(&control) as _;

    let len: isize = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut local: Option<Ipv4Addr> = None;
    unsafe {
        let mut cmsg: *mut libc::cmsghdr = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == IPPROTO_IP && (*cmsg).cmsg_type == IP_PKTINFO {
                let info: libc::in_pktinfo = ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo);
                local = Some(Ipv4Addr::from(u32::from_be(info.ipi_addr.s_addr)));
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    let from: Option<SocketAddrV4> = if msg.msg_namelen as usize >= mem::size_of::<libc::sockaddr_in>()
        && from.sin_family == libc::AF_INET as libc::sa_family_t
    {
        Some(SocketAddrV4::new(
            Ipv4Addr::from(u32::from_be(from.sin_addr.s_addr)),
            u16::from_be(from.sin_port),
        ))
    } else {
        None
    };
    Ok((len as usize, from, local))
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
