// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Settings for one kind of host, from a `[hosts.<kind>]` table.
///
/// These are sent to worker processes along with each batch, so they are serializable both ways.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct HostSettings {
    /// The executable to launch. Required before any case of this kind can run.
    #[serde(default)]
    pub program: Option<String>,

    /// Arguments passed to every host of this kind, before the case's own arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables set for every host of this kind.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// For editor hosts, run with the null renderer (`-rhi=null`).
    #[serde(default)]
    pub null_renderer: bool,

    /// The working directory of the host. Defaults to the workspace root.
    #[serde(default)]
    pub working_dir: Option<Utf8PathBuf>,

    /// Where the host writes its crash log. Copied as an artefact when a case crashes.
    #[serde(default)]
    pub crash_log: Option<Utf8PathBuf>,
}
