// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::NO_HEADING_TARGET;
use camino::Utf8PathBuf;
use hostbatch_metadata::HostbatchExitCode;
use hostbatch_runner::errors::{ConfigParseError, RegistryError, RunError, WorkerEntryError};
use std::{error::Error, path::PathBuf};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method.

/// An error that hostbatch expects and reports cleanly, as opposed to a panic.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed {
        #[source]
        error: std::io::Error,
    },
    #[error("path is not valid UTF-8")]
    NonUtf8Path { path: PathBuf },
    #[error("could not determine the path to the hostbatch executable")]
    CurrentExeFailed {
        #[source]
        error: std::io::Error,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("error loading suites")]
    RegistryError {
        #[from]
        err: RegistryError,
    },
    #[error("no cases selected")]
    NoCasesSelected { loaded: usize },
    #[error("run failed")]
    RunError {
        #[from]
        err: RunError,
    },
    #[error("error writing output")]
    WriteOutput {
        #[source]
        error: std::io::Error,
    },
    #[error("error serializing list output")]
    SerializeList {
        #[source]
        error: serde_json::Error,
    },
    #[error("worker failed")]
    WorkerError {
        #[from]
        err: WorkerEntryError,
    },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::NonUtf8Path { .. }
            | Self::ConfigParseError { .. }
            | Self::RegistryError { .. } => HostbatchExitCode::USAGE_ERROR,
            Self::NoCasesSelected { .. } => HostbatchExitCode::NO_TESTS_COLLECTED,
            Self::CurrentExeFailed { .. }
            | Self::RunError { .. }
            | Self::WriteOutput { .. }
            | Self::SerializeList { .. } => HostbatchExitCode::INTERNAL_ERROR,
            Self::WorkerError { .. } => HostbatchExitCode::WORKER_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self) {
        let mut next_error = match self {
            Self::CurrentDirFailed { error } => {
                error!("could not determine the current directory");
                Some(error as &dyn Error)
            }
            Self::NonUtf8Path { path } => {
                error!("path `{}` is not valid UTF-8", path.display());
                None
            }
            Self::CurrentExeFailed { error } => {
                error!("could not determine the path to the hostbatch executable");
                Some(error as &dyn Error)
            }
            Self::ConfigParseError { err } => {
                error!("{err}");
                err.source()
            }
            Self::RegistryError { err } => {
                error!("failed to load suites");
                Some(err as &dyn Error)
            }
            Self::NoCasesSelected { loaded } => {
                if *loaded == 0 {
                    error!("no cases found in the given suite paths");
                } else {
                    error!("none of the {loaded} loaded cases matched the selection");
                }
                None
            }
            Self::RunError { err } => {
                error!("run could not complete");
                Some(err as &dyn Error)
            }
            Self::WriteOutput { error } => {
                error!("error writing output");
                Some(error as &dyn Error)
            }
            Self::SerializeList { error } => {
                error!("error serializing list output to JSON");
                Some(error as &dyn Error)
            }
            Self::WorkerError { err } => {
                error!("worker process failed");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }

    pub(crate) fn non_utf8_path(path: impl Into<PathBuf>) -> Self {
        Self::NonUtf8Path { path: path.into() }
    }
}

/// Converts a path from the OS into a UTF-8 path.
pub(crate) fn utf8_path(path: PathBuf) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path).map_err(ExpectedError::non_utf8_path)
}
