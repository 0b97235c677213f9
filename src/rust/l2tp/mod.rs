// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! L2TP version 2 control plane.

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod hooks;
pub mod peer;
pub mod profile;
pub mod protocol;
pub mod registry;
#[cfg(target_os = "linux")]
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;
pub mod tunnel;
