// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{HostKind, Isolation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Machine-readable output of `hostbatch list --message-format json`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PlanSummary {
    /// The number of cases selected to run.
    pub case_count: usize,

    /// The batches, in the order they will be scheduled.
    pub batches: Vec<BatchSummary>,
}

/// A single planned batch.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct BatchSummary {
    /// A short identifier for the batch, stable across runs with the same inputs.
    pub batch_id: String,

    /// The kind of host the batch runs in.
    pub host_kind: HostKind,

    /// The arguments shared by every case in the batch.
    pub host_args: Vec<String>,

    /// The environment shared by every case in the batch.
    pub host_env: BTreeMap<String, String>,

    /// The isolation class of the batch.
    pub isolation: Isolation,

    /// The overall time budget of the batch, in seconds.
    pub deadline_s: u64,

    /// The ids of the cases in the batch, in execution order.
    pub cases: Vec<String>,
}
