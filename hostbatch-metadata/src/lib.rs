// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Serializable data shared between hostbatch, its worker processes, and external tools.
//!
//! * [`TestCaseDescriptor`] is the on-disk shape of a single case, as written in suite files.
//! * [`CaseResult`] is what a worker reports for every case it was handed.
//! * [`HostbatchExitCode`] documents the exit codes of the `hostbatch` binary.

mod descriptor;
mod errors;
mod exit_codes;
mod list;
mod result;

pub use descriptor::*;
pub use errors::*;
pub use exit_codes::*;
pub use list::*;
pub use result::*;
