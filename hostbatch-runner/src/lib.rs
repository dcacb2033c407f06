// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for hostbatch, a runner for test scripts that execute inside heavy external
//! host processes such as editors.
//!
//! The basic flow of a run is:
//!
//! 1. Cases are collected into a [`TestRegistry`](registry::TestRegistry) from suite files.
//! 2. The [`BatchPlanner`](plan::BatchPlanner) groups them into batches that share a host.
//! 3. The [`WorkerPool`](worker::WorkerPool) runs every batch in its own worker process, where a
//!    [`Dispatcher`](dispatcher::Dispatcher) launches the host and follows its log.
//! 4. The [`RetryController`](retry::RetryController) re-runs inconclusive cases in isolation.
//! 5. The [`reporter`] turns the final [`RunReport`](reporter::RunReport) into console output,
//!    JUnit XML and rerun hints.
//!
//! The [`Controller`](controller::Controller) ties these together.

pub mod cancel;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod errors;
mod helpers;
pub mod host;
pub mod log_monitor;
pub mod plan;
pub mod registry;
pub mod reporter;
pub mod result_parser;
pub mod retry;
pub mod signal;
mod stopwatch;
pub mod worker;

#[cfg(test)]
mod test_helpers;
