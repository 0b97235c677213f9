// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::signal_hook::consts::{
    SIGINT,
    SIGTERM,
};
use ::std::sync::{
    atomic::{
        AtomicBool,
        Ordering,
    },
    Arc,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Signals that request an orderly shutdown.
pub const SHUTDOWN_SIGNALS: [i32; 2] = [SIGTERM, SIGINT];

//======================================================================================================================
// Structures
//======================================================================================================================

/// One-shot guard for the shutdown path. Clones share the same flag, so a signal handler thread and the event loop
/// can both hold one.
#[derive(Clone, Default)]
pub struct Shutdown {
    triggered: Arc<AtomicBool>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Returns `true` only for the caller that flipped the flag.
    pub fn trigger(&self) -> bool {
        self.triggered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Raises this guard's flag on SIGTERM and SIGINT. The handler only stores to the flag; whoever polls
    /// [Self::is_triggered] runs the cleanup.
    pub fn register_signals(&self) -> Result<(), Fail> {
        for signal in SHUTDOWN_SIGNALS {
            if let Err(e) = ::signal_hook::flag::register(signal, Arc::clone(&self.triggered)) {
                let cause: String = format!("cannot install handler for signal {} ({})", signal, e);
                error!("register_signals(): {}", cause);
                return Err(Fail::new(e.raw_os_error().unwrap_or(libc::EINVAL), &cause));
            }
        }
        debug!("register_signals(): shutdown on {:?}", SHUTDOWN_SIGNALS);
        Ok(())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
