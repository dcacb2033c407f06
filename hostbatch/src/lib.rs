// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A batched, parallel runner for test scripts that execute inside heavy host processes such as
//! editors.
//!
//! Suites are collected from `*.hostbatch.toml` and `*.hostbatch.json` files, planned into
//! batches that share a host, and run across worker processes. See `hostbatch --help`.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
