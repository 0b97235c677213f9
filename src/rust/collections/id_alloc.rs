// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits::MAX_RETRIES_ID_ALLOC,
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Hands out random, non-zero 16-bit protocol identifiers. Zero is reserved on the wire.
pub struct IdAllocator {
    rng: SmallRng,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }

    /// Deterministic allocator, useful to reproduce a run.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Picks an identifier for which `in_use` returns false.
    ///
    /// Random draws are tried first. When they keep colliding the whole space is scanned once, so `ENOMEM` really
    /// means every identifier is taken.
    pub fn allocate<F: Fn(u16) -> bool>(&mut self, in_use: F) -> Result<u16, Fail> {
        for _ in 0..MAX_RETRIES_ID_ALLOC {
            let id: u16 = self.rng.gen_range(1..=u16::MAX);
            if !in_use(id) {
                return Ok(id);
            }
        }
        if let Some(id) = (1..=u16::MAX).find(|id| !in_use(*id)) {
            return Ok(id);
        }
        let cause: String = format!("identifier space exhausted");
        warn!("allocate(): {}", cause);
        Err(Fail::new(libc::ENOMEM, &cause))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
