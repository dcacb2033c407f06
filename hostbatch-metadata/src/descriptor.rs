// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::ParseEnumError;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// The on-disk description of a single case.
///
/// Descriptors are written in suite files (TOML `[[case]]` tables or JSON arrays). Optional fields
/// that are left out are filled in from suite defaults and run settings when the registry is built.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TestCaseDescriptor {
    /// A stable identifier, unique within a run.
    pub id: String,

    /// The path to the script the host must execute.
    pub script_path: Utf8PathBuf,

    /// The kind of host that runs this case.
    pub host_kind: HostKind,

    /// Arguments appended to the host command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_args: Vec<String>,

    /// Environment variables set for the host process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub host_env: BTreeMap<String, String>,

    /// Whether this case may share its host with other cases.
    #[serde(default)]
    pub isolation: Isolation,

    /// Substrings that must each appear in the host log while the case is active.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_lines: Vec<String>,

    /// Substrings whose appearance while the case is active fails it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_lines: Vec<String>,

    /// If true, a forbidden line aborts the case immediately. If unset, the run-wide default
    /// applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_on_forbidden: Option<bool>,

    /// The wall-clock budget for this case, in seconds. If unset, the run-wide default applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<u64>,

    /// External test-case identifiers, propagated into reports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub case_ids: Vec<ExternalCaseId>,

    /// Ask the host to attach a debugger at startup.
    #[serde(default, skip_serializing_if = "is_false")]
    pub attach_debugger: bool,

    /// Ask the host to wait for a debugger before running any script.
    #[serde(default, skip_serializing_if = "is_false")]
    pub wait_for_debugger: bool,

    /// Glob patterns, relative to the host's working directory, for files the case produces
    /// (screenshots, captures) that should be kept as artefacts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artefact_globs: Vec<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// The kind of host process a case runs inside.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HostKind {
    /// The main editor.
    Editor,
    /// The standalone material editor.
    MaterialEditor,
    /// A Maya process driven through its script interpreter.
    Maya,
    /// Any other executable that takes script paths as arguments.
    Generic,
}

impl HostKind {
    /// All known host kinds.
    pub const ALL: [Self; 4] = [
        Self::Editor,
        Self::MaterialEditor,
        Self::Maya,
        Self::Generic,
    ];

    const CONFIG_KEYS: &'static [&'static str] = &["editor", "material-editor", "maya", "generic"];

    /// Returns the name used for this kind in descriptors.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Editor => "Editor",
            Self::MaterialEditor => "MaterialEditor",
            Self::Maya => "Maya",
            Self::Generic => "Generic",
        }
    }

    /// Returns the key used for this kind in `[hosts.<key>]` configuration tables.
    pub fn config_key(self) -> &'static str {
        match self {
            Self::Editor => "editor",
            Self::MaterialEditor => "material-editor",
            Self::Maya => "maya",
            Self::Generic => "generic",
        }
    }

    /// Returns true if this host understands the editor automation flags (`-runpythontest` and
    /// friends).
    pub fn is_editor(self) -> bool {
        matches!(self, Self::Editor | Self::MaterialEditor)
    }
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostKind {
    type Err = ParseEnumError;

    /// Accepts both the descriptor spelling (`MaterialEditor`) and the configuration key spelling
    /// (`material-editor`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.config_key() == s)
            .ok_or_else(|| ParseEnumError::new("host kind", s, Self::CONFIG_KEYS))
    }
}

/// Isolation policy for a case.
#[derive(
    Copy, Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum Isolation {
    /// Many cases may run one after the other inside a single host lifetime.
    #[default]
    Batched,
    /// One case per host lifetime, but cases with the same host profile share a worker.
    Shared,
    /// One case per host lifetime and per worker.
    Isolated,
}

impl Isolation {
    /// Returns the name used for this policy in descriptors.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Batched => "Batched",
            Self::Shared => "Shared",
            Self::Isolated => "Isolated",
        }
    }
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Isolation {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Batched" | "batched" => Ok(Self::Batched),
            "Shared" | "shared" => Ok(Self::Shared),
            "Isolated" | "isolated" => Ok(Self::Isolated),
            _ => Err(ParseEnumError::new(
                "isolation",
                s,
                &["batched", "shared", "isolated"],
            )),
        }
    }
}

/// An external test-case identifier, such as a test management system's case number.
///
/// Descriptors may write these as either strings or integers; they are always stored and reported
/// as strings.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(from = "RawExternalCaseId", into = "String")]
pub struct ExternalCaseId(String);

impl ExternalCaseId {
    /// Creates a new external id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ExternalCaseId> for String {
    fn from(id: ExternalCaseId) -> Self {
        id.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawExternalCaseId {
    Str(String),
    Int(i64),
}

impl From<RawExternalCaseId> for ExternalCaseId {
    fn from(raw: RawExternalCaseId) -> Self {
        match raw {
            RawExternalCaseId::Str(s) => Self(s),
            RawExternalCaseId::Int(n) => Self(n.to_string()),
        }
    }
}
