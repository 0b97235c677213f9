// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod fail;
pub mod fsm;
pub mod limits;
pub mod logging;
pub mod shutdown;
