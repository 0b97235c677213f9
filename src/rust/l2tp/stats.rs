// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::l2tp::protocol::{
    MessageType,
    MESSAGE_TYPE_COUNT,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Per-message-type traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageStats {
    pub rx: u64,
    pub tx: u64,
    pub rx_bad: u64,
}

/// Counters exported to the management interface.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct L2tpStats {
    pub total_sent_control_frames: u64,
    pub total_rcvd_control_frames: u64,
    pub total_control_frame_send_fails: u64,
    pub short_frames: u64,
    pub wrong_version_frames: u64,
    pub unexpected_data_frames: u64,
    pub bad_rcvd_frames: u64,
    pub no_control_frame_resources: u64,
    pub no_peer_resources: u64,
    pub no_tunnel_resources: u64,
    pub no_session_resources: u64,
    pub no_matching_tunnel_id_discards: u64,
    pub no_matching_session_id_discards: u64,
    pub too_many_tunnels: u64,
    pub too_many_sessions: u64,
    pub tunnel_setup_failures: u64,
    pub session_setup_failures: u64,
    pub socket_errors: u64,
    pub messages: [MessageStats; MESSAGE_TYPE_COUNT],
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl L2tpStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn message(&self, message_type: MessageType) -> Option<&MessageStats> {
        message_type.stats_index().map(|i| &self.messages[i])
    }

    pub fn count_rx(&mut self, message_type: MessageType) {
        if let Some(i) = message_type.stats_index() {
            self.messages[i].rx += 1;
        }
    }

    pub fn count_tx(&mut self, message_type: MessageType) {
        if let Some(i) = message_type.stats_index() {
            self.messages[i].tx += 1;
        }
    }

    pub fn count_rx_bad(&mut self, message_type: MessageType) {
        if let Some(i) = message_type.stats_index() {
            self.messages[i].rx_bad += 1;
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
