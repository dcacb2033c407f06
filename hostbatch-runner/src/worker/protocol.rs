// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Messages exchanged between the controller and worker processes.
//!
//! Every message is a single line of JSON. The controller writes a [`WorkerRequest`] to the
//! worker's stdin, followed later by at most one [`ControlMessage`]. The worker writes
//! [`WorkerMessage`]s to its stdout. Stderr is free-form log output.

use crate::{dispatcher::DispatchSettings, plan::Batch};
use hostbatch_metadata::CaseResult;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A batch assignment.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WorkerRequest {
    /// The batch to run.
    pub batch: Batch,
    /// How to run it.
    pub settings: DispatchSettings,
}

/// A message from a worker to the controller.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    /// A case has been decided.
    CaseFinished {
        /// The result of the case.
        result: Box<CaseResult>,
    },
    /// Every case in the batch has been reported.
    BatchFinished,
}

/// A message from the controller to a running worker.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Stop the batch as soon as possible.
    Cancel,
}

/// Writes `message` as one line and flushes.
pub(crate) async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(message).map_err(std::io::Error::other)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

pub(crate) fn parse_message<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}
