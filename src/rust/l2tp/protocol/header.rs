// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::libc::{
    EBADMSG,
    EINVAL,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Smallest frame that can carry an L2TP header: flags, version, tunnel id and session id.
pub const L2TP_MIN_FRAME_LEN: usize = 6;

/// Size of the header this engine emits on transmit.
pub const L2TP_CONTROL_HEADER_LEN: usize = 12;

/// Protocol version carried in the low nibble of the second byte.
pub const L2TP_VERSION: u8 = 2;

/// Returned when a frame ends before the header its flag bits announce.
pub const ESHORTFRAME: i32 = libc::ENODATA;

const T_BIT: u8 = 0x80;
const L_BIT: u8 = 0x40;
const S_BIT: u8 = 0x08;
const O_BIT: u8 = 0x02;
const P_BIT: u8 = 0x01;
const VER_MASK: u8 = 0x0f;

/// Byte offsets of Ns and Nr inside a header built by [ControlHeader::serialize].
const NS_OFFSET: usize = 8;
const NR_OFFSET: usize = 10;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Normalized view of a received L2TP header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParsedHeader {
    pub version: u8,
    pub is_data: bool,
    pub has_length: bool,
    pub has_sequence: bool,
    pub has_offset: bool,
    pub has_priority: bool,
    pub tunnel_id: u16,
    pub session_id: u16,
    pub ns: u16,
    pub nr: u16,
    /// Start of the attribute payload, counted from the first header byte.
    pub avp_offset: usize,
    pub avp_len: usize,
}

/// Canonical control header used on transmit: T, L and S set, no offset, no priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlHeader {
    pub tunnel_id: u16,
    pub session_id: u16,
    pub ns: u16,
    pub nr: u16,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl ParsedHeader {
    /// Parses the header at the front of `buf`, of which `total_len` bytes were received.
    pub fn parse(buf: &[u8], total_len: usize) -> Result<Self, Fail> {
        if total_len > buf.len() {
            let cause: String = format!("frame length exceeds buffer (total_len={}, buf={})", total_len, buf.len());
            error!("parse(): {}", cause);
            return Err(Fail::new(EINVAL, &cause));
        }
        if total_len < L2TP_MIN_FRAME_LEN {
            return Err(short_frame(L2TP_MIN_FRAME_LEN, total_len));
        }

        let flags: u8 = buf[0];
        let has_length: bool = flags & L_BIT != 0;
        let has_sequence: bool = flags & S_BIT != 0;
        let has_offset: bool = flags & O_BIT != 0;

        let mut minlen: usize = L2TP_MIN_FRAME_LEN;
        if has_length {
            minlen += 2;
        }
        if has_sequence {
            minlen += 4;
        }
        if has_offset {
            minlen += 2;
        }
        if total_len < minlen {
            return Err(short_frame(minlen, total_len));
        }

        let mut hdr: ParsedHeader = ParsedHeader {
            version: buf[1] & VER_MASK,
            is_data: flags & T_BIT == 0,
            has_length,
            has_sequence,
            has_offset,
            has_priority: flags & P_BIT != 0,
            ..Default::default()
        };

        let mut pos: usize = 2;
        let mut declared_len: usize = 0;
        if has_length {
            declared_len = read_u16(buf, &mut pos) as usize;
        }
        hdr.tunnel_id = read_u16(buf, &mut pos);
        hdr.session_id = read_u16(buf, &mut pos);
        if has_sequence {
            hdr.ns = read_u16(buf, &mut pos);
            hdr.nr = read_u16(buf, &mut pos);
        }

        // The offset size does not count its own two bytes.
        let mut offset: usize = 0;
        if has_offset {
            offset = read_u16(buf, &mut pos) as usize;
            minlen += offset;
            if total_len < minlen {
                return Err(short_frame(minlen, total_len));
            }
        }

        hdr.avp_offset = pos + offset;
        if has_length {
            if total_len < declared_len {
                let cause: String = format!(
                    "length field claims {} bytes but only {} were received",
                    declared_len, total_len
                );
                debug!("parse(): {}", cause);
                return Err(Fail::new(EBADMSG, &cause));
            }
            hdr.avp_len = match declared_len.checked_sub(hdr.avp_offset) {
                Some(len) => len,
                None => {
                    let cause: String = format!(
                        "length field {} is shorter than the header ({} bytes)",
                        declared_len, hdr.avp_offset
                    );
                    debug!("parse(): {}", cause);
                    return Err(Fail::new(EBADMSG, &cause));
                },
            };
        } else {
            // Without a length field only a ZLB is understood; trailing bytes are not attributes.
            hdr.avp_len = 0;
        }

        trace!(
            "parse(): ver={} data={} tid={} sid={} ns={} nr={} seq={} offs={} len={}",
            hdr.version,
            hdr.is_data,
            hdr.tunnel_id,
            hdr.session_id,
            hdr.ns,
            hdr.nr,
            hdr.has_sequence,
            offset,
            hdr.avp_len
        );
        Ok(hdr)
    }

    /// A control message with no attributes only acknowledges sequence numbers.
    pub fn is_zlb(&self) -> bool {
        !self.is_data && self.avp_len == 0
    }
}

impl ControlHeader {
    pub fn new(tunnel_id: u16, session_id: u16, ns: u16, nr: u16) -> Self {
        Self {
            tunnel_id,
            session_id,
            ns,
            nr,
        }
    }

    /// Emits the header for a message carrying `payload_len` attribute bytes.
    pub fn serialize(&self, payload_len: usize) -> Result<[u8; L2TP_CONTROL_HEADER_LEN], Fail> {
        let length: u16 = match u16::try_from(L2TP_CONTROL_HEADER_LEN + payload_len) {
            Ok(length) => length,
            Err(_) => {
                let cause: String = format!("payload too large for a control message (len={})", payload_len);
                error!("serialize(): {}", cause);
                return Err(Fail::new(EINVAL, &cause));
            },
        };
        let mut buf: [u8; L2TP_CONTROL_HEADER_LEN] = [0; L2TP_CONTROL_HEADER_LEN];
        buf[0] = T_BIT | L_BIT | S_BIT;
        buf[1] = L2TP_VERSION;
        buf[2..4].copy_from_slice(&length.to_be_bytes());
        buf[4..6].copy_from_slice(&self.tunnel_id.to_be_bytes());
        buf[6..8].copy_from_slice(&self.session_id.to_be_bytes());
        buf[NS_OFFSET..NS_OFFSET + 2].copy_from_slice(&self.ns.to_be_bytes());
        buf[NR_OFFSET..NR_OFFSET + 2].copy_from_slice(&self.nr.to_be_bytes());
        Ok(buf)
    }

    /// Rewrites the sequence numbers of a header previously produced by [ControlHeader::serialize].
    pub fn update(buf: &mut [u8], ns: u16, nr: u16) -> Result<(), Fail> {
        if buf.len() < L2TP_CONTROL_HEADER_LEN {
            let cause: String = format!("buffer too small for a control header (len={})", buf.len());
            error!("update(): {}", cause);
            return Err(Fail::new(EINVAL, &cause));
        }
        buf[NS_OFFSET..NS_OFFSET + 2].copy_from_slice(&ns.to_be_bytes());
        buf[NR_OFFSET..NR_OFFSET + 2].copy_from_slice(&nr.to_be_bytes());
        Ok(())
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn read_u16(buf: &[u8], pos: &mut usize) -> u16 {
    let value: u16 = u16::from_be_bytes([buf[*pos], buf[*pos + 1]]);
    *pos += 2;
    value
}

fn short_frame(expected: usize, got: usize) -> Fail {
    let cause: String = format!(
        "expected at least {} bytes based on header bits, but got only {}",
        expected, got
    );
    debug!("parse(): {}", cause);
    Fail::new(ESHORTFRAME, &cause)
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
