// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Constants
//======================================================================================================================

/// Largest control frame this engine will receive or build.
pub const MAX_FRAME_LEN: usize = 4096;

/// Maximum number of buffer fragments a control packet may be split into.
pub const MAX_PACKET_FRAGMENTS: usize = 4;

/// Maximum length of a diagnostic name attached to a state machine instance.
pub const MAX_FSM_NAME_LEN: usize = 15;

/// Maximum number of attempts when picking a random identifier.
pub const MAX_RETRIES_ID_ALLOC: usize = 500;

/// MTU assumed for a tunnel until the kernel reports a better one.
pub const DEFAULT_TUNNEL_MTU: u16 = 1460;

/// Maximum number of readiness events serviced per wait.
pub const MAX_EPOLL_EVENTS: usize = 32;
