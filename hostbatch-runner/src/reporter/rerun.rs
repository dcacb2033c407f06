// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{CodeOwners, OwnersLookup, RunReport};
use crate::{config::HostbatchConfig, errors::WriteReportError, host::HostLauncher};
use camino::Utf8Path;
use hostbatch_metadata::{CaseOutcome, HostKind};
use std::{collections::BTreeMap, fmt};

/// How to reproduce one case that did not pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RerunHint {
    /// The case id.
    pub case_id: String,
    /// The reported outcome.
    pub outcome: CaseOutcome,
    /// The reported reason.
    pub reason: Option<String>,
    /// A single shell line that runs the case in its host. Environment variables are referenced
    /// by name, never expanded.
    pub command: String,
    /// Who owns the case's script.
    pub owners: String,
}

/// Rerun hints for every case of a run that did not pass, sorted by case id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RerunHints {
    hints: Vec<RerunHint>,
}

impl RerunHints {
    /// Builds hints for the non-passing cases of `report`.
    ///
    /// Script paths are looked up in `owners` relative to the workspace root.
    pub fn new(report: &RunReport, config: &HostbatchConfig, owners: Option<&CodeOwners>) -> Self {
        let mut launchers: BTreeMap<HostKind, HostLauncher> = BTreeMap::new();
        let mut hints = Vec::new();
        for result in report.non_passing() {
            let Some(case) = report.case(&result.case_id) else {
                continue;
            };
            let launcher = launchers.entry(case.profile.kind).or_insert_with(|| {
                let settings = config.host(case.profile.kind);
                HostLauncher::new(case.profile.kind, settings, config.workspace_root())
            });

            let script = case
                .script_path
                .strip_prefix(config.workspace_root())
                .unwrap_or(&case.script_path);
            let owners = match owners {
                Some(owners) => owners.owners_for(script).to_string(),
                None => OwnersLookup::NotConfigured.to_string(),
            };

            hints.push(RerunHint {
                case_id: result.case_id.clone(),
                outcome: result.outcome,
                reason: result.reason.clone(),
                command: launcher.rerun_line(case, config.workspace_root()),
                owners,
            });
        }
        Self { hints }
    }

    /// Returns true if every case passed.
    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    /// Returns the number of hints.
    pub fn len(&self) -> usize {
        self.hints.len()
    }

    /// Iterates over the hints.
    pub fn iter(&self) -> impl Iterator<Item = &RerunHint> + '_ {
        self.hints.iter()
    }

    /// Writes the hints, uncoloured, to `path`.
    pub fn write_to_file(&self, path: &Utf8Path) -> Result<(), WriteReportError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| WriteReportError::Fs {
                file: parent.to_owned(),
                error,
            })?;
        }
        std::fs::write(path, self.to_string()).map_err(|error| WriteReportError::Fs {
            file: path.to_owned(),
            error,
        })
    }
}

impl fmt::Display for RerunHints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hint in &self.hints {
            write!(f, "{} {}", hint.outcome, hint.case_id)?;
            if let Some(reason) = &hint.reason {
                write!(f, ": {reason}")?;
            }
            writeln!(f)?;
            writeln!(f, "    {}", hint.command)?;
            writeln!(f, "    {}", hint.owners)?;
        }
        Ok(())
    }
}
