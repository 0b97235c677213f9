// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod collections;
pub mod l2tp;
pub mod net;
pub mod runtime;

pub use crate::{
    l2tp::{
        config::Config,
        dispatch::{
            Datagram,
            Dispatcher,
            Disposition,
            DropReason,
        },
        registry::{
            Registry,
            RegistryConfig,
        },
        stats::L2tpStats,
    },
    runtime::fail::Fail,
};

/// Fails the enclosing `anyhow` function when the two values differ.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(
                        "ensure failed: `(left == right)` left: `{:?}`, right: `{:?}`",
                        left_val,
                        right_val
                    );
                }
            },
        }
    };
}

/// Fails the enclosing `anyhow` function when the two values are equal.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(
                        "ensure failed: `(left != right)` left: `{:?}`, right: `{:?}`",
                        left_val,
                        right_val
                    );
                }
            },
        }
    };
}
