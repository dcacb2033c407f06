// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by hostbatch.

use camino::Utf8PathBuf;
use config::ConfigError;
use hostbatch_metadata::{HostKind, ParseEnumError};
use std::{error, fmt};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse hostbatch config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// A `[hosts.<key>]` table named an unknown host kind.
    #[error("invalid `[hosts]` table")]
    UnknownHostKind(#[source] ParseEnumError),

    /// A numeric setting was out of range.
    #[error("invalid value for `{key}`: {message}")]
    InvalidValue {
        /// The key that had an invalid value.
        key: &'static str,
        /// A description of what was expected.
        message: &'static str,
    },
}

/// An error that occurred while collecting cases into a registry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// A path given on the command line does not exist.
    #[error("suite path `{path}` does not exist")]
    MissingPath {
        /// The path that was not found.
        path: Utf8PathBuf,
    },

    /// A suite path has an extension hostbatch does not know how to read.
    #[error("suite file `{path}` is neither TOML nor JSON")]
    UnknownFormat {
        /// The path with the unknown extension.
        path: Utf8PathBuf,
    },

    /// Walking a suite directory failed.
    #[error("error walking suite directory `{dir}`")]
    Walk {
        /// The directory being walked.
        dir: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: walkdir::Error,
    },

    /// A path found while walking a directory was not valid UTF-8.
    #[error("suite path is not valid UTF-8: {}", .path.display())]
    NonUtf8Path {
        /// The offending path.
        path: std::path::PathBuf,
    },

    /// Reading a suite file failed.
    #[error("failed to read suite file `{path}`")]
    Read {
        /// The suite file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A TOML suite file could not be parsed.
    #[error("failed to parse suite file `{path}`")]
    ParseToml {
        /// The suite file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: toml::de::Error,
    },

    /// A `[[case]]` table in a TOML suite file could not be turned into a descriptor.
    #[error("invalid case #{index} in suite file `{path}`")]
    InvalidTomlCase {
        /// The suite file.
        path: Utf8PathBuf,
        /// The zero-based index of the `[[case]]` table.
        index: usize,
        /// The underlying error.
        #[source]
        error: toml::de::Error,
    },

    /// A JSON suite file could not be parsed.
    #[error("failed to parse suite file `{path}`")]
    ParseJson {
        /// The suite file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// A descriptor had an empty id.
    #[error("case with script `{script_path}` in `{path}` has an empty id")]
    EmptyId {
        /// The suite file.
        path: Utf8PathBuf,
        /// The script of the case.
        script_path: Utf8PathBuf,
    },

    /// A descriptor had a zero timeout.
    #[error("case `{id}` in `{path}` has timeout_s = 0 (timeouts must be positive)")]
    ZeroTimeout {
        /// The suite file.
        path: Utf8PathBuf,
        /// The case id.
        id: String,
    },

    /// Two descriptors used the same id.
    #[error("case id `{id}` is defined twice: in `{first}` and in `{second}`")]
    DuplicateId {
        /// The duplicated id.
        id: String,
        /// The suite file that defined the id first.
        first: Utf8PathBuf,
        /// The suite file that defined the id again.
        second: Utf8PathBuf,
    },
}

/// An error that occurred while launching a host process.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaunchError {
    /// No program is configured for the host kind.
    #[error("no program configured for host kind {kind} (set `[hosts.{}] program`)", .kind.config_key())]
    NoProgram {
        /// The host kind.
        kind: HostKind,
    },

    /// Preparing the host's files (log directory, script list) failed.
    #[error("failed to prepare `{path}` for the host")]
    Prepare {
        /// The path that could not be prepared.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The host process could not be spawned.
    #[error("failed to spawn host `{program}`")]
    Spawn {
        /// The program that was being spawned.
        program: String,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// An error returned by a [`ResultSink`](crate::dispatcher::ResultSink) when a result could not be
/// submitted.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResultSinkError {
    /// The receiving end of the result channel was closed.
    #[error("result channel closed")]
    Closed,

    /// Writing the result failed.
    #[error("failed to write result")]
    Io(#[from] std::io::Error),

    /// Serializing the result failed.
    #[error("failed to serialize result")]
    Serialize(#[from] serde_json::Error),
}

/// An error that occurred while the controller was talking to a worker process.
///
/// These errors never fail a run: the affected cases are reported as `Unknown` instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerError {
    /// The worker process could not be spawned.
    #[error("failed to spawn worker for batch {batch_id}")]
    Spawn {
        /// The batch the worker was meant to run.
        batch_id: String,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Sending the batch assignment to the worker failed.
    #[error("failed to send assignment to worker for batch {batch_id}")]
    SendRequest {
        /// The batch being assigned.
        batch_id: String,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Reading the worker's output failed.
    #[error("failed to read output of worker for batch {batch_id}")]
    ReadOutput {
        /// The batch being run.
        batch_id: String,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The worker printed something that isn't a protocol message.
    #[error("worker for batch {batch_id} sent an invalid message: {line}")]
    Protocol {
        /// The batch being run.
        batch_id: String,
        /// The offending line.
        line: String,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },
}

/// An error that occurred inside a worker process, while reading its assignment or reporting
/// results.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerEntryError {
    /// The async runtime could not be created.
    #[error("failed to create worker runtime")]
    Runtime(#[source] std::io::Error),

    /// Reading the assignment from stdin failed.
    #[error("failed to read batch assignment from stdin")]
    ReadRequest(#[source] std::io::Error),

    /// The controller closed stdin without sending an assignment.
    #[error("stdin closed before a batch assignment was received")]
    NoRequest,

    /// The assignment could not be parsed.
    #[error("failed to parse batch assignment")]
    ParseRequest(#[source] serde_json::Error),

    /// Reporting a result to the controller failed.
    #[error("failed to report results to the controller")]
    Report(#[source] ResultSinkError),

    /// Setting up signal handling failed.
    #[error(transparent)]
    Signal(#[from] SignalHandlerSetupError),
}

/// An error that occurred while writing a report or an artefact.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteReportError {
    /// A filesystem operation failed.
    #[error("error writing to `{file}`")]
    Fs {
        /// The file being written.
        file: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The JUnit report could not be serialized.
    #[error("error serializing JUnit report to `{file}`")]
    Junit {
        /// The JUnit output file.
        file: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: quick_junit::SerializeError,
    },
}

/// An error that occurred while reading a CODEOWNERS-style file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodeOwnersParseError {
    /// The file could not be read.
    #[error("failed to read code owners file `{path}`")]
    Read {
        /// The code owners file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A pattern could not be compiled into a glob.
    #[error("invalid pattern `{pattern}` at `{path}` line {line}")]
    InvalidPattern {
        /// The code owners file.
        path: Utf8PathBuf,
        /// The one-based line number.
        line: usize,
        /// The pattern.
        pattern: String,
        /// The underlying error.
        #[source]
        error: globset::Error,
    },
}

/// An error that stopped a run from completing.
///
/// Case failures are never reported this way; they end up in the run's report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// The async runtime could not be created.
    #[error("failed to create the async runtime")]
    Runtime(#[source] std::io::Error),

    /// Setting up signal handling failed.
    #[error(transparent)]
    Signal(#[from] SignalHandlerSetupError),

    /// The configured code owners file could not be read.
    #[error(transparent)]
    CodeOwners(#[from] CodeOwnersParseError),

    /// Writing a report failed.
    #[error(transparent)]
    WriteReport(#[from] WriteReportError),

    /// Writing the run summary to the console failed.
    #[error("error writing run output")]
    Output(#[source] std::io::Error),
}

/// An error that occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct SignalHandlerSetupError(#[from] std::io::Error);

/// Displays an error along with its chain of sources, one per line.
///
/// Useful wherever errors end up inside text that isn't printed through the CLI's error handler,
/// for example log excerpts and JUnit messages.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E> fmt::Display for DisplayErrorChain<E>
where
    E: error::Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut next = self.error.source();
        while let Some(err) = next {
            write!(f, "\n  caused by: {err}")?;
            next = err.source();
        }

        Ok(())
    }
}
