// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Minimal attribute handling: enough to recognise a tunnel setup request before any tunnel exists, and to emit the
//! Message Type attribute on transmit.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    l2tp::protocol::MessageType,
    runtime::fail::Fail,
};
use ::libc::{
    EBADMSG,
    EINVAL,
    ENOMSG,
    EPROTO,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Attribute header: flags and length, vendor id, attribute type.
pub const AVP_HEADER_LEN: usize = 6;

const AVP_MANDATORY: u16 = 0x8000;
const AVP_HIDDEN: u16 = 0x4000;
const AVP_LENGTH_MASK: u16 = 0x03ff;

const VENDOR_IETF: u16 = 0;
const ATTR_MESSAGE_TYPE: u16 = 0;
const ATTR_HOST_NAME: u16 = 7;
const ATTR_ASSIGNED_TUNNEL_ID: u16 = 9;
const ATTR_ASSIGNED_SESSION_ID: u16 = 14;

//======================================================================================================================
// Structures
//======================================================================================================================

/// What the preparser extracted from a tunnel setup request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bootstrap {
    pub message_type: MessageType,
    pub host_name: Option<String>,
}

/// One attribute as seen on the wire.
struct RawAvp<'a> {
    hidden: bool,
    vendor: u16,
    attr: u16,
    value: &'a [u8],
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Scans `payload` for the Message Type and Host Name attributes of a request that carries tunnel id zero.
///
/// Only a Start-Control-Connection-Request may open a tunnel, anything else fails with `EPROTO`. A stream without a
/// Message Type fails with `ENOMSG`, a corrupt one with `EBADMSG`.
pub fn preparse(payload: &[u8], avp_len: usize) -> Result<Bootstrap, Fail> {
    if avp_len > payload.len() {
        let cause: String = format!("attribute region overruns payload (avp_len={}, len={})", avp_len, payload.len());
        debug!("preparse(): {}", cause);
        return Err(Fail::new(EBADMSG, &cause));
    }

    let mut region: &[u8] = &payload[..avp_len];
    let mut message_type: Option<MessageType> = None;
    let mut host_name: Option<String> = None;

    while !region.is_empty() && (message_type.is_none() || host_name.is_none()) {
        let (avp, rest): (RawAvp, &[u8]) = next_avp(region)?;
        region = rest;
        if avp.vendor != VENDOR_IETF {
            continue;
        }
        match avp.attr {
            ATTR_MESSAGE_TYPE if message_type.is_none() => {
                if avp.hidden || avp.value.len() != 2 {
                    let cause: String = format!("malformed message type attribute (len={})", avp.value.len());
                    debug!("preparse(): {}", cause);
                    return Err(Fail::new(EBADMSG, &cause));
                }
                message_type = Some(MessageType::from(u16::from_be_bytes([avp.value[0], avp.value[1]])));
            },
            ATTR_HOST_NAME if host_name.is_none() => {
                // A hidden host name needs the tunnel secret, which is unknown at this point.
                if !avp.hidden {
                    host_name = Some(String::from_utf8_lossy(avp.value).into_owned());
                }
            },
            _ => (),
        }
    }

    match message_type {
        Some(MessageType::Sccrq) => Ok(Bootstrap {
            message_type: MessageType::Sccrq,
            host_name,
        }),
        Some(other) => {
            let cause: String = format!("{} cannot open a tunnel", other);
            debug!("preparse(): {}", cause);
            Err(Fail::new(EPROTO, &cause))
        },
        None => {
            let cause: String = format!("no message type attribute");
            debug!("preparse(): {}", cause);
            Err(Fail::new(ENOMSG, &cause))
        },
    }
}

/// Encodes the mandatory Message Type attribute.
pub fn encode_message_type(message_type: MessageType) -> [u8; AVP_HEADER_LEN + 2] {
    encode_u16(ATTR_MESSAGE_TYPE, message_type.as_u16())
}

/// Encodes the mandatory Host Name attribute.
pub fn encode_host_name(name: &str) -> Result<Vec<u8>, Fail> {
    let total: usize = AVP_HEADER_LEN + name.len();
    if name.is_empty() || total > AVP_LENGTH_MASK as usize {
        let cause: String = format!("host name length out of range (len={})", name.len());
        error!("encode_host_name(): {}", cause);
        return Err(Fail::new(EINVAL, &cause));
    }
    let mut buf: Vec<u8> = Vec::with_capacity(total);
    buf.extend_from_slice(&(AVP_MANDATORY | total as u16).to_be_bytes());
    buf.extend_from_slice(&VENDOR_IETF.to_be_bytes());
    buf.extend_from_slice(&ATTR_HOST_NAME.to_be_bytes());
    buf.extend_from_slice(name.as_bytes());
    Ok(buf)
}

/// Reads the message type of an already-validated control message, if its first attribute carries one.
pub fn peek_message_type(payload: &[u8]) -> Result<Option<MessageType>, Fail> {
    if payload.is_empty() {
        return Ok(None);
    }
    let (avp, _): (RawAvp, &[u8]) = next_avp(payload)?;
    if avp.vendor != VENDOR_IETF || avp.attr != ATTR_MESSAGE_TYPE || avp.hidden || avp.value.len() != 2 {
        return Ok(None);
    }
    Ok(Some(MessageType::from(u16::from_be_bytes([avp.value[0], avp.value[1]]))))
}

/// Assigned Tunnel ID carried by SCCRQ, SCCRP and StopCCN.
pub fn assigned_tunnel_id(payload: &[u8]) -> Result<Option<u16>, Fail> {
    find_u16(payload, ATTR_ASSIGNED_TUNNEL_ID)
}

/// Assigned Session ID carried by ICRQ, ICRP and CDN.
pub fn assigned_session_id(payload: &[u8]) -> Result<Option<u16>, Fail> {
    find_u16(payload, ATTR_ASSIGNED_SESSION_ID)
}

pub fn encode_assigned_tunnel_id(tunnel_id: u16) -> [u8; AVP_HEADER_LEN + 2] {
    encode_u16(ATTR_ASSIGNED_TUNNEL_ID, tunnel_id)
}

pub fn encode_assigned_session_id(session_id: u16) -> [u8; AVP_HEADER_LEN + 2] {
    encode_u16(ATTR_ASSIGNED_SESSION_ID, session_id)
}

fn encode_u16(attr: u16, value: u16) -> [u8; AVP_HEADER_LEN + 2] {
    let mut buf: [u8; AVP_HEADER_LEN + 2] = [0; AVP_HEADER_LEN + 2];
    let flags_len: u16 = AVP_MANDATORY | (AVP_HEADER_LEN as u16 + 2);
    buf[0..2].copy_from_slice(&flags_len.to_be_bytes());
    buf[2..4].copy_from_slice(&VENDOR_IETF.to_be_bytes());
    buf[4..6].copy_from_slice(&attr.to_be_bytes());
    buf[6..8].copy_from_slice(&value.to_be_bytes());
    buf
}

fn find_u16(mut region: &[u8], attr: u16) -> Result<Option<u16>, Fail> {
    while !region.is_empty() {
        let (avp, rest): (RawAvp, &[u8]) = next_avp(region)?;
        region = rest;
        if avp.vendor == VENDOR_IETF && avp.attr == attr && !avp.hidden && avp.value.len() == 2 {
            return Ok(Some(u16::from_be_bytes([avp.value[0], avp.value[1]])));
        }
    }
    Ok(None)
}

fn next_avp(region: &[u8]) -> Result<(RawAvp, &[u8]), Fail> {
    if region.len() < AVP_HEADER_LEN {
        let cause: String = format!("truncated attribute header (remaining={})", region.len());
        debug!("next_avp(): {}", cause);
        return Err(Fail::new(EBADMSG, &cause));
    }
    let flags_len: u16 = u16::from_be_bytes([region[0], region[1]]);
    let len: usize = (flags_len & AVP_LENGTH_MASK) as usize;
    if len < AVP_HEADER_LEN || len > region.len() {
        let cause: String = format!("bad attribute length (len={}, remaining={})", len, region.len());
        debug!("next_avp(): {}", cause);
        return Err(Fail::new(EBADMSG, &cause));
    }
    let avp: RawAvp = RawAvp {
        hidden: flags_len & AVP_HIDDEN != 0,
        vendor: u16::from_be_bytes([region[2], region[3]]),
        attr: u16::from_be_bytes([region[4], region[5]]),
        value: &region[AVP_HEADER_LEN..len],
    };
    Ok((avp, &region[len..]))
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
