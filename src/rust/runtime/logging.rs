// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::Logger;
use ::std::sync::Once;

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features.
///
/// The log filter is taken from `RUST_LOG` and falls back to `info`. A second call is a no-op.
pub fn initialize() {
    INIT_LOG.call_once(|| {
        match Logger::try_with_env_or_str("info") {
            Ok(logger) => {
                if let Err(e) = logger.start() {
                    eprintln!("initialize(): failed to start logger ({:?})", e);
                }
            },
            Err(e) => eprintln!("initialize(): bad log specification ({:?})", e),
        }
    });
}
