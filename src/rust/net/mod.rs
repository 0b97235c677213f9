// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Kernel sockets and readiness polling.

pub mod services;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod epoll;
        pub mod socket;
    }
}
