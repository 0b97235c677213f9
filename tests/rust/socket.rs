// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg(target_os = "linux")]

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::l2tpd::{
    ensure_eq,
    ensure_neq,
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
use ::std::{
    net::{
        Ipv4Addr,
        SocketAddr,
        SocketAddrV4,
        UdpSocket,
    },
    thread::{
        self,
        JoinHandle,
    },
    time::Duration,
};

//======================================================================================================================
// Constants
//======================================================================================================================

const PEER_TUNNEL_ID: u16 = 0x0101;
const TIMEOUT: Duration = Duration::from_secs(5);

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Runs a server on an ephemeral loopback port and reports where it listens.
fn spawn_server() -> Result<(SocketAddrV4, Shutdown, JoinHandle<Result<()>>)> {
    let (tx, rx): (Sender<(SocketAddrV4, Shutdown)>, Receiver<(SocketAddrV4, Shutdown)>) =
        crossbeam_channel::bounded(1);
    let handle: JoinHandle<Result<()>> = thread::spawn(move || -> Result<()> {
        let registry: Registry = common::registry()?;
        let options: ServerOptions = ServerOptions {
            bind_addr: Ipv4Addr::LOCALHOST,
            udp_port: 0,
            use_udp_checksums: true,
        };
        let mut server: L2tpServer = L2tpServer::new(options, registry)?;
        tx.send((server.local_addr()?, server.stop_handle()))?;
        server.run()?;
        ensure_eq!(server.registry().tunnel_count(), 0);
        Ok(())
    });
    let (addr, stop): (SocketAddrV4, Shutdown) = rx.recv_timeout(TIMEOUT)?;
    Ok((addr, stop, handle))
}

fn stop_server(stop: Shutdown, handle: JoinHandle<Result<()>>) -> Result<()> {
    stop.trigger();
    match handle.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("server thread panicked"),
    }
}

/// Waits for one reply and returns its header, attribute region and sender.
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
fn tunnel_setup_over_loopback() -> Result<()> {
    let (server_addr, stop, handle): (SocketAddrV4, Shutdown, JoinHandle<Result<()>>) = spawn_server()?;

    let client: UdpSocket = UdpSocket::bind("127.0.0.1:0")?;
    client.set_read_timeout(Some(TIMEOUT))?;
    client.send_to(&common::sccrq("lac.example.net", PEER_TUNNEL_ID)?, server_addr)?;

    // The reply comes from the tunnel's own socket, which shares the server's address.
    let (hdr, region, from): (ParsedHeader, Vec<u8>, SocketAddr) = recv_reply(&client)?;
    ensure_eq!(from, SocketAddr::V4(server_addr));
    ensure_eq!(hdr.tunnel_id, PEER_TUNNEL_ID);
    ensure_eq!(avp::peek_message_type(&region)?, Some(MessageType::Sccrp));
    let tunnel_id: u16 = match avp::assigned_tunnel_id(&region)? {
        Some(id) => id,
        None => anyhow::bail!("SCCRP carries no tunnel id"),
    };
    ensure_neq!(tunnel_id, 0);

    client.send_to(&common::message(tunnel_id, 0, 1, 1, MessageType::Scccn, &[])?, from)?;
    let (ack, region, _): (ParsedHeader, Vec<u8>, SocketAddr) = recv_reply(&client)?;
    ensure_eq!(region.is_empty(), true);
    ensure_eq!(ack.tunnel_id, PEER_TUNNEL_ID);
    ensure_eq!((ack.ns, ack.nr), (1, 2));

    stop_server(stop, handle)
}

#[test]
fn garbage_does_not_stop_the_server() -> Result<()> {
    let (server_addr, stop, handle): (SocketAddrV4, Shutdown, JoinHandle<Result<()>>) = spawn_server()?;

    let client: UdpSocket = UdpSocket::bind("127.0.0.1:0")?;
    client.set_read_timeout(Some(TIMEOUT))?;
    client.send_to(&[0xc8, 0x02], server_addr)?;
    client.send_to(&[0x00, 0x02, 0x00, 0x01, 0x00, 0x01], server_addr)?;
    client.send_to(&common::sccrq("lac", PEER_TUNNEL_ID)?, server_addr)?;

    let (hdr, region, _): (ParsedHeader, Vec<u8>, SocketAddr) = recv_reply(&client)?;
    ensure_eq!(hdr.tunnel_id, PEER_TUNNEL_ID);
    ensure_eq!(avp::peek_message_type(&region)?, Some(MessageType::Sccrp));

    stop_server(stop, handle)
}
