// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The daemon's event loop.
//!
//! One readiness event is serviced to completion before the next one: a datagram is read, dispatched, and every tunnel
//! socket the dispatch created or destroyed is reconciled with the poller before control returns to `epoll_wait()`.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    l2tp::{
        channel::RecvOutcome,
        dispatch::{
            Datagram,
            Dispatcher,
            Disposition,
        },
        registry::Registry,
        transport::SequencedTransport,
        tunnel::TunnelHandle,
    },
    net::{
        epoll::EventLoop,
        services::{
            self,
            L2TP_SERVICE_NAME,
            L2TP_SERVICE_PROTOCOL,
        },
        socket::{
            UdpChannelFactory,
            UnconnectedSocket,
        },
    },
    runtime::{
        fail::Fail,
        limits::MAX_FRAME_LEN,
        shutdown::Shutdown,
    },
};
use ::std::{
    collections::HashSet,
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    os::unix::io::RawFd,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Upper bound on how long a stop request may go unnoticed.
const POLL_TIMEOUT_MS: i32 = 100;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Where and how the daemon listens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerOptions {
    pub bind_addr: Ipv4Addr,
    pub udp_port: u16,
    pub use_udp_checksums: bool,
}

pub struct L2tpServer {
    registry: Registry,
    dispatcher: Dispatcher,
    events: EventLoop,
    socket: Option<UnconnectedSocket>,
    socket_fd: RawFd,
    tunnel_fds: HashSet<RawFd>,
    stop: Shutdown,
    dead: Shutdown,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl ServerOptions {
    /// Resolves a port of zero through the services database.
    pub fn resolved(self) -> Result<Self, Fail> {
        if self.udp_port != 0 {
            return Ok(self);
        }
        let udp_port: u16 = services::resolve_port(L2TP_SERVICE_NAME, L2TP_SERVICE_PROTOCOL)?;
        Ok(Self { udp_port, ..self })
    }
}

impl L2tpServer {
    pub fn new(options: ServerOptions, registry: Registry) -> Result<Self, Fail> {
        let socket: UnconnectedSocket =
            UnconnectedSocket::bind(options.bind_addr, options.udp_port, options.use_udp_checksums)?;
        let local: SocketAddrV4 = socket.local_addr()?;
        let mut events: EventLoop = EventLoop::new()?;
        let socket_fd: RawFd = socket.fd();
        events.register(socket_fd)?;
        let dispatcher: Dispatcher = Dispatcher::new(
            Box::new(SequencedTransport::new()),
            Box::new(UdpChannelFactory::new(local.port(), options.use_udp_checksums)),
        );
        Ok(Self {
            registry,
            dispatcher,
            events,
            socket: Some(socket),
            socket_fd,
            tunnel_fds: HashSet::new(),
            stop: Shutdown::new(),
            dead: Shutdown::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddrV4, Fail> {
        match self.socket.as_ref() {
            Some(socket) => socket.local_addr(),
            None => Err(Fail::new(libc::ENOTCONN, "server is shut down")),
        }
    }

    /// A handle that stops [Self::run] from another thread.
    pub fn stop_handle(&self) -> Shutdown {
        self.stop.clone()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Serves sockets until stopped, then cleans up.
    pub fn run(&mut self) -> Result<(), Fail> {
        info!("run(): serving l2tp on {:?}", self.local_addr().ok());
        let result: Result<(), Fail> = loop {
            if self.stop.is_triggered() {
                break Ok(());
            }
            if let Err(e) = self.poll_once(POLL_TIMEOUT_MS) {
                break Err(e);
            }
        };
        self.die();
        result
    }

    /// Waits once for readiness and services every ready socket.
    pub fn poll_once(&mut self, timeout_ms: i32) -> Result<(), Fail> {
        if self.dead.is_triggered() {
            return Ok(());
        }
        for fd in self.events.wait(timeout_ms)? {
            if fd == self.socket_fd {
                self.service_unconnected()?;
            } else {
                self.service_tunnel(fd);
            }
            self.sync_tunnel_fds();
        }
        Ok(())
    }

    /// Cleans up exactly once, however often it is called.
    pub fn die(&mut self) {
        self.stop.trigger();
        if !self.dead.trigger() {
            return;
        }
        info!("die(): shutting down");
        let fds: Vec<RawFd> = self.tunnel_fds.drain().collect();
        for fd in fds {
            if let Err(e) = self.events.unregister(fd) {
                warn!("die(): {:?}", e);
            }
        }
        self.registry.shutdown();
        if let Err(e) = self.events.unregister(self.socket_fd) {
            warn!("die(): {:?}", e);
        }
        self.socket = None;
    }

    fn service_unconnected(&mut self) -> Result<(), Fail> {
        let dgram: Datagram = match self.socket.as_ref() {
            Some(socket) => match socket.recv() {
                Ok(Some(dgram)) => dgram,
                Ok(None) => return Ok(()),
                Err(e) => {
                    self.registry.stats_mut().socket_errors += 1;
                    warn!("service_unconnected(): {:?}", e);
                    return Ok(());
                },
            },
            None => return Ok(()),
        };
        if let Disposition::Dropped(reason) = self.dispatcher.dispatch(&mut self.registry, dgram) {
            debug!("service_unconnected(): dropped ({:?})", reason);
        }
        Ok(())
    }

    fn service_tunnel(&mut self, fd: RawFd) {
        let tunnel: TunnelHandle = match self.registry.tunnel_find_by_fd(fd) {
            Some(tunnel) => tunnel,
            None => {
                debug!("service_tunnel(): fd {} has no tunnel", fd);
                return;
            },
        };
        let mut buf: Vec<u8> = vec![0; MAX_FRAME_LEN];
        match self.registry.tunnel_recv(tunnel, &mut buf) {
            Ok(RecvOutcome::Received(len)) => {
                buf.truncate(len);
                if let Disposition::Dropped(reason) =
                    self.dispatcher.dispatch(&mut self.registry, Datagram::new(buf, None, None))
                {
                    debug!("service_tunnel(): dropped ({:?})", reason);
                }
            },
            Ok(RecvOutcome::MtuChanged(mtu)) => {
                if let Err(e) = self.registry.tunnel_update_mtu(tunnel, mtu) {
                    warn!("service_tunnel(): cannot apply mtu {} ({:?})", mtu, e);
                }
            },
            Ok(RecvOutcome::PeerGone) => debug!("service_tunnel(): peer on fd {} unreachable", fd),
            Ok(RecvOutcome::WouldBlock) => (),
            Err(e) => {
                self.registry.stats_mut().socket_errors += 1;
                warn!("service_tunnel(): {:?}", e);
            },
        }
    }

    /// Watches sockets of new tunnels and forgets those of freed ones.
    fn sync_tunnel_fds(&mut self) {
        let live: HashSet<RawFd> = self.registry.tunnel_fds().into_iter().collect();
        let gone: Vec<RawFd> = self.tunnel_fds.difference(&live).copied().collect();
        for fd in gone {
            self.tunnel_fds.remove(&fd);
            if let Err(e) = self.events.unregister(fd) {
                warn!("sync_tunnel_fds(): {:?}", e);
            }
        }
        let new: Vec<RawFd> = live.difference(&self.tunnel_fds).copied().collect();
        for fd in new {
            if let Err(e) = self.events.register(fd) {
                warn!("sync_tunnel_fds(): {:?}", e);
                continue;
            }
            self.tunnel_fds.insert(fd);
            if let Some(tunnel) = self.registry.tunnel_find_by_fd(fd) {
                if let Err(e) = self.registry.tunnel_set_pmtu_discovery(tunnel, true) {
                    warn!("sync_tunnel_fds(): cannot enable path mtu discovery ({:?})", e);
                }
            }
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for L2tpServer {
    fn drop(&mut self) {
        self.die();
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
