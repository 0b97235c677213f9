// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    l2tp::protocol::{
        avp,
        header::{
            ControlHeader,
            ParsedHeader,
            L2TP_CONTROL_HEADER_LEN,
        },
        MessageType,
    },
    runtime::{
        fail::Fail,
        limits::{
            MAX_FRAME_LEN,
            MAX_PACKET_FRAGMENTS,
        },
    },
};
use ::arrayvec::ArrayVec;
use ::libc::{
    EBADMSG,
    EMSGSIZE,
};
use ::std::{
    borrow::Cow,
    io::IoSlice,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A control datagram, received or about to be sent, held as a list of buffer fragments.
#[derive(Debug)]
pub struct ControlPacket {
    fragments: ArrayVec<Vec<u8>, MAX_PACKET_FRAGMENTS>,
    total_len: usize,
    pub tunnel_id: u16,
    pub session_id: u16,
    pub ns: u16,
    pub nr: u16,
    pub avp_offset: usize,
    pub avp_len: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl ControlPacket {
    /// Wraps a received datagram whose header was parsed into `hdr`.
    pub fn received(buf: Vec<u8>, hdr: &ParsedHeader) -> Result<Self, Fail> {
        let total_len: usize = buf.len();
        if hdr.avp_offset + hdr.avp_len > total_len {
            let cause: String = format!(
                "attribute region past end of frame (offset={}, len={}, total={})",
                hdr.avp_offset, hdr.avp_len, total_len
            );
            debug!("received(): {}", cause);
            return Err(Fail::new(EBADMSG, &cause));
        }
        let mut fragments: ArrayVec<Vec<u8>, MAX_PACKET_FRAGMENTS> = ArrayVec::new();
        fragments.push(buf);
        Ok(Self {
            fragments,
            total_len,
            tunnel_id: hdr.tunnel_id,
            session_id: hdr.session_id,
            ns: hdr.ns,
            nr: hdr.nr,
            avp_offset: hdr.avp_offset,
            avp_len: hdr.avp_len,
        })
    }

    /// Builds an outgoing message: canonical header fragment followed by the attribute fragment.
    pub fn build(header: ControlHeader, payload: Vec<u8>) -> Result<Self, Fail> {
        let total_len: usize = L2TP_CONTROL_HEADER_LEN + payload.len();
        if total_len > MAX_FRAME_LEN {
            let cause: String = format!("control message too large (len={})", total_len);
            error!("build(): {}", cause);
            return Err(Fail::new(EMSGSIZE, &cause));
        }
        let mut fragments: ArrayVec<Vec<u8>, MAX_PACKET_FRAGMENTS> = ArrayVec::new();
        fragments.push(header.serialize(payload.len())?.to_vec());
        let avp_len: usize = payload.len();
        if !payload.is_empty() {
            fragments.push(payload);
        }
        Ok(Self {
            fragments,
            total_len,
            tunnel_id: header.tunnel_id,
            session_id: header.session_id,
            ns: header.ns,
            nr: header.nr,
            avp_offset: L2TP_CONTROL_HEADER_LEN,
            avp_len,
        })
    }

    /// Builds a message carrying only a Message Type attribute, or a ZLB when `message_type` is `None`.
    pub fn build_message(header: ControlHeader, message_type: Option<MessageType>) -> Result<Self, Fail> {
        let payload: Vec<u8> = match message_type {
            Some(message_type) => avp::encode_message_type(message_type).to_vec(),
            None => Vec::new(),
        };
        Self::build(header, payload)
    }

    pub fn total_len(&self) -> usize {
        self.total_len
    }

    pub fn is_zlb(&self) -> bool {
        self.avp_len == 0
    }

    /// Rewrites Ns and Nr, both in the fields and in the serialized header.
    pub fn set_sequence(&mut self, ns: u16, nr: u16) -> Result<(), Fail> {
        if let Some(first) = self.fragments.first_mut() {
            ControlHeader::update(first, ns, nr)?;
        }
        self.ns = ns;
        self.nr = nr;
        Ok(())
    }

    /// The attribute region. Borrowed when it lives in one fragment.
    pub fn avp_region(&self) -> Cow<[u8]> {
        let end: usize = self.avp_offset + self.avp_len;
        let mut start: usize = 0;
        for fragment in &self.fragments {
            if self.avp_offset >= start && end <= start + fragment.len() {
                return Cow::Borrowed(&fragment[self.avp_offset - start..end - start]);
            }
            start += fragment.len();
        }
        Cow::Owned(self.to_bytes()[self.avp_offset..end].to_vec())
    }

    /// Message type of the first attribute, `None` for a ZLB.
    pub fn message_type(&self) -> Result<Option<MessageType>, Fail> {
        avp::peek_message_type(&self.avp_region())
    }

    /// Fragments as I/O slices for vectored send.
    pub fn io_slices(&self) -> ArrayVec<IoSlice, MAX_PACKET_FRAGMENTS> {
        self.fragments.iter().map(|f| IoSlice::new(f)).collect()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::with_capacity(self.total_len);
        for fragment in &self.fragments {
            buf.extend_from_slice(fragment);
        }
        buf
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
