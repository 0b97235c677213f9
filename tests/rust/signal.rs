// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg(target_os = "linux")]

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::Recorder;
use ::anyhow::Result;
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::l2tpd::{
    ensure_eq,
    l2tp::{
        protocol::{
            avp,
            header::ParsedHeader,
            MessageType,
        },
        server::{
            L2tpServer,
            ServerOptions,
        },
    },
    runtime::shutdown::Shutdown,
    Registry,
};
use ::signal_hook::consts::{
    SIGINT,
    SIGTERM,
};
use ::std::{
    cell::RefCell,
    net::{
        Ipv4Addr,
        SocketAddr,
        SocketAddrV4,
        UdpSocket,
    },
    rc::Rc,
    thread::{
        self,
        JoinHandle,
    },
    time::Duration,
};

//======================================================================================================================
// Constants
//======================================================================================================================

const PEER_TUNNEL_ID: u16 = 0x0202;
const PEER_SESSION_ID: u16 = 0x0033;
const TIMEOUT: Duration = Duration::from_secs(5);

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn recv_reply(client: &UdpSocket) -> Result<(ParsedHeader, Vec<u8>, SocketAddr)> {
    let mut buf: [u8; 1500] = [0; 1500];
    let (len, from): (usize, SocketAddr) = client.recv_from(&mut buf)?;
    let hdr: ParsedHeader = ParsedHeader::parse(&buf[..len], len)?;
    let region: Vec<u8> = buf[hdr.avp_offset..hdr.avp_offset + hdr.avp_len].to_vec();
    Ok((hdr, region, from))
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[test]
fn repeated_signals_clean_up_once() -> Result<()> {
    let (tx, rx): (Sender<(SocketAddrV4, Shutdown)>, Receiver<(SocketAddrV4, Shutdown)>) =
        crossbeam_channel::bounded(1);
    let handle: JoinHandle<Result<()>> = thread::spawn(move || -> Result<()> {
        let mut registry: Registry = common::registry()?;
        let log: Rc<RefCell<Vec<String>>> = Recorder::register(&mut registry, false);
        let options: ServerOptions = ServerOptions {
            bind_addr: Ipv4Addr::LOCALHOST,
            udp_port: 0,
            use_udp_checksums: true,
        };
        let mut server: L2tpServer = L2tpServer::new(options, registry)?;
        tx.send((server.local_addr()?, server.stop_handle()))?;
        server.run()?;
        server.die();

        ensure_eq!(server.registry().tunnel_count(), 0);
        ensure_eq!(server.registry().session_count(), 0);
        ensure_eq!(server.local_addr().is_err(), true);
        let deleted: usize = log.borrow().iter().filter(|e| e.starts_with("deleted ")).count();
        ensure_eq!(deleted, 1);
        Ok(())
    });
    let (server_addr, stop): (SocketAddrV4, Shutdown) = rx.recv_timeout(TIMEOUT)?;
    stop.register_signals()?;

    // Bring up a tunnel with one session so that cleanup has something to release.
    let client: UdpSocket = UdpSocket::bind("127.0.0.1:0")?;
    client.set_read_timeout(Some(TIMEOUT))?;
    client.send_to(&common::sccrq("lac.example.net", PEER_TUNNEL_ID)?, server_addr)?;
    let (_, region, tunnel_addr): (ParsedHeader, Vec<u8>, SocketAddr) = recv_reply(&client)?;
    let tunnel_id: u16 = match avp::assigned_tunnel_id(&region)? {
        Some(id) => id,
        None => anyhow::bail!("SCCRP carries no tunnel id"),
    };
    client.send_to(&common::message(tunnel_id, 0, 1, 1, MessageType::Scccn, &[])?, tunnel_addr)?;
    recv_reply(&client)?;
    let assigned: [u8; 8] = avp::encode_assigned_session_id(PEER_SESSION_ID);
    client.send_to(
        &common::message(tunnel_id, 0, 2, 1, MessageType::Icrq, &[&assigned])?,
        tunnel_addr,
    )?;
    let (_, region, _): (ParsedHeader, Vec<u8>, SocketAddr) = recv_reply(&client)?;
    ensure_eq!(avp::peek_message_type(&region)?, Some(MessageType::Icrp));

    // The handlers only raise the flag, so the test process survives every one of these.
    ::signal_hook::low_level::raise(SIGTERM)?;
    ::signal_hook::low_level::raise(SIGTERM)?;
    ::signal_hook::low_level::raise(SIGINT)?;
    ensure_eq!(stop.is_triggered(), true);
    ensure_eq!(stop.trigger(), false);

    match handle.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("server thread panicked"),
    }
}
