// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod avp;
pub mod header;
pub mod packet;

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::fmt;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Number of slots in per-message-type statistics; indexed by the wire value.
pub const MESSAGE_TYPE_COUNT: usize = 17;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Control message types carried by the Message Type attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Start-Control-Connection-Request.
    Sccrq,
    /// Start-Control-Connection-Reply.
    Sccrp,
    /// Start-Control-Connection-Connected.
    Scccn,
    /// Stop-Control-Connection-Notification.
    StopCcn,
    Hello,
    Ocrq,
    Ocrp,
    Occn,
    /// Incoming-Call-Request.
    Icrq,
    Icrp,
    Iccn,
    /// Call-Disconnect-Notify.
    Cdn,
    Wen,
    Sli,
    Unknown(u16),
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl MessageType {
    pub fn as_u16(&self) -> u16 {
        match self {
            MessageType::Sccrq => 1,
            MessageType::Sccrp => 2,
            MessageType::Scccn => 3,
            MessageType::StopCcn => 4,
            MessageType::Hello => 6,
            MessageType::Ocrq => 7,
            MessageType::Ocrp => 8,
            MessageType::Occn => 9,
            MessageType::Icrq => 10,
            MessageType::Icrp => 11,
            MessageType::Iccn => 12,
            MessageType::Cdn => 14,
            MessageType::Wen => 15,
            MessageType::Sli => 16,
            MessageType::Unknown(value) => *value,
        }
    }

    /// Slot in per-message-type counters, if the type has one.
    pub fn stats_index(&self) -> Option<usize> {
        match self {
            MessageType::Unknown(_) => None,
            known => Some(known.as_u16() as usize),
        }
    }

    /// Messages that manage the control connection itself rather than a call.
    pub fn is_tunnel_message(&self) -> bool {
        matches!(
            self,
            MessageType::Sccrq | MessageType::Sccrp | MessageType::Scccn | MessageType::StopCcn | MessageType::Hello
        )
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<u16> for MessageType {
    fn from(value: u16) -> Self {
        match value {
            1 => MessageType::Sccrq,
            2 => MessageType::Sccrp,
            3 => MessageType::Scccn,
            4 => MessageType::StopCcn,
            6 => MessageType::Hello,
            7 => MessageType::Ocrq,
            8 => MessageType::Ocrp,
            9 => MessageType::Occn,
            10 => MessageType::Icrq,
            11 => MessageType::Icrp,
            12 => MessageType::Iccn,
            14 => MessageType::Cdn,
            15 => MessageType::Wen,
            16 => MessageType::Sli,
            other => MessageType::Unknown(other),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &str = match self {
            MessageType::Sccrq => "SCCRQ",
            MessageType::Sccrp => "SCCRP",
            MessageType::Scccn => "SCCCN",
            MessageType::StopCcn => "STOPCCN",
            MessageType::Hello => "HELLO",
            MessageType::Ocrq => "OCRQ",
            MessageType::Ocrp => "OCRP",
            MessageType::Occn => "OCCN",
            MessageType::Icrq => "ICRQ",
            MessageType::Icrp => "ICRP",
            MessageType::Iccn => "ICCN",
            MessageType::Cdn => "CDN",
            MessageType::Wen => "WEN",
            MessageType::Sli => "SLI",
            MessageType::Unknown(value) => return write!(f, "UNKNOWN({})", value),
        };
        write!(f, "{}", name)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
