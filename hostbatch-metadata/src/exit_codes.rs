// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `hostbatch` runs.
///
/// These mirror the exit codes of pytest, so CI jobs that already interpret pytest's exit codes
/// can drive `hostbatch` without changes.
///
/// Unknown/unexpected failures (panics, or errors reported through `color-eyre`) result in exit
/// code 1 as well, since that is what the Rust runtime produces.
pub enum HostbatchExitCode {}

impl HostbatchExitCode {
    /// Every selected case passed.
    pub const OK: i32 = 0;

    /// One or more cases did not pass.
    pub const TESTS_FAILED: i32 = 1;

    /// The run was interrupted by a signal before it could finish.
    pub const INTERRUPTED: i32 = 2;

    /// An internal error occurred, for example a report could not be written.
    pub const INTERNAL_ERROR: i32 = 3;

    /// The command line or a configuration file was invalid.
    pub const USAGE_ERROR: i32 = 4;

    /// No cases were selected to run.
    pub const NO_TESTS_COLLECTED: i32 = 5;

    /// A `__worker` process could not read its assignment or write its results.
    ///
    /// This is only ever observed by the controller, never by users.
    pub const WORKER_ERROR: i32 = 70;
}
