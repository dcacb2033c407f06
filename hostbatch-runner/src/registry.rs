// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test case registry.
//!
//! A [`TestRegistry`] is built once per run from suite files. It owns every [`TestCase`], keeps
//! them in the order they were declared, and guarantees that ids are unique. Later stages only
//! ever see filtered copies.

use crate::errors::RegistryError;
use camino::{Utf8Path, Utf8PathBuf};
use hostbatch_metadata::{ExternalCaseId, HostKind, Isolation, TestCaseDescriptor};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    time::Duration,
};
use tracing::debug;

/// File name suffixes that mark suite files inside suite directories.
const SUITE_SUFFIXES: [&str; 2] = [".hostbatch.toml", ".hostbatch.json"];

/// The host configuration shared by all cases in a batch.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostProfile {
    /// The kind of host.
    pub kind: HostKind,
    /// Arguments appended to the host command.
    pub args: Vec<String>,
    /// Environment variables set for the host.
    pub env: BTreeMap<String, String>,
}

/// A fully resolved case. Immutable once registered.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TestCase {
    /// The unique id of the case.
    pub id: String,
    /// The name of the suite the case was declared in.
    pub suite: String,
    /// The suite file the case was declared in.
    pub source: Utf8PathBuf,
    /// The absolute path of the script the host runs.
    pub script_path: Utf8PathBuf,
    /// The host the case runs in.
    pub profile: HostProfile,
    /// The isolation policy of the case.
    pub isolation: Isolation,
    /// Substrings that must appear in the log. Deduplicated, in declaration order.
    pub expected_lines: Vec<String>,
    /// Substrings that fail the case. Deduplicated, in declaration order.
    pub forbidden_lines: Vec<String>,
    /// Whether a forbidden line aborts the case immediately.
    pub halt_on_forbidden: bool,
    /// The wall-clock budget of the case.
    pub timeout: Duration,
    /// External ids, propagated into reports.
    pub case_ids: Vec<ExternalCaseId>,
    /// Ask the host to attach a debugger.
    pub attach_debugger: bool,
    /// Ask the host to wait for a debugger.
    pub wait_for_debugger: bool,
    /// Globs for files to keep as artefacts.
    pub artefact_globs: Vec<String>,
}

impl TestCase {
    /// Returns the name a host uses for this case in structured result markers: the script's file
    /// name without its extension.
    pub fn script_stem(&self) -> &str {
        self.script_path.file_stem().unwrap_or(&self.id)
    }
}

/// Defaults applied to descriptors that leave fields unset.
#[derive(Copy, Clone, Debug)]
pub struct CaseDefaults {
    /// The timeout for cases without `timeout_s`.
    pub timeout: Duration,
    /// The value of `halt_on_forbidden` for cases that don't set it.
    pub halt_on_forbidden: bool,
}

/// An ordered collection of uniquely identified cases.
#[derive(Clone, Debug, Default)]
pub struct TestRegistry {
    cases: IndexMap<String, TestCase>,
}

impl TestRegistry {
    /// Loads every suite found at the given paths.
    ///
    /// Each path is either a suite file (`.toml` or `.json`) or a directory, which is searched
    /// recursively for files ending in `.hostbatch.toml` or `.hostbatch.json`. Directory entries
    /// are visited in file name order so the registry order is stable.
    pub fn load_paths(
        paths: &[Utf8PathBuf],
        defaults: &CaseDefaults,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for path in paths {
            if path.is_dir() {
                for suite_file in discover_suite_files(path)? {
                    registry.load_suite_file(&suite_file, defaults)?;
                }
            } else if path.is_file() {
                registry.load_suite_file(path, defaults)?;
            } else {
                return Err(RegistryError::MissingPath { path: path.clone() });
            }
        }
        Ok(registry)
    }

    /// Builds a registry from descriptors declared in `source`.
    ///
    /// Relative script paths are resolved against `base_dir`.
    pub fn from_descriptors(
        source: &Utf8Path,
        suite: &str,
        base_dir: &Utf8Path,
        descriptors: impl IntoIterator<Item = TestCaseDescriptor>,
        defaults: &CaseDefaults,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        registry.add_descriptors(source, suite, base_dir, descriptors, defaults)?;
        Ok(registry)
    }

    /// Adds every case of `other`, keeping ids unique across both registries.
    pub fn merge(&mut self, other: TestRegistry) -> Result<(), RegistryError> {
        for case in other.cases.into_values() {
            self.insert(case)?;
        }
        Ok(())
    }

    fn load_suite_file(
        &mut self,
        path: &Utf8Path,
        defaults: &CaseDefaults,
    ) -> Result<(), RegistryError> {
        let contents = std::fs::read_to_string(path).map_err(|error| RegistryError::Read {
            path: path.to_owned(),
            error,
        })?;
        let base_dir = path.parent().unwrap_or(Utf8Path::new("."));

        let (suite, descriptors) = match path.extension() {
            Some("toml") => parse_toml_suite(path, &contents)?,
            Some("json") => {
                let descriptors: Vec<TestCaseDescriptor> = serde_json::from_str(&contents)
                    .map_err(|error| RegistryError::ParseJson {
                        path: path.to_owned(),
                        error,
                    })?;
                (default_suite_name(path), descriptors)
            }
            _ => {
                return Err(RegistryError::UnknownFormat {
                    path: path.to_owned(),
                });
            }
        };

        debug!(
            "loaded {} descriptors from suite `{suite}` ({path})",
            descriptors.len()
        );
        self.add_descriptors(path, &suite, base_dir, descriptors, defaults)
    }

    fn add_descriptors(
        &mut self,
        source: &Utf8Path,
        suite: &str,
        base_dir: &Utf8Path,
        descriptors: impl IntoIterator<Item = TestCaseDescriptor>,
        defaults: &CaseDefaults,
    ) -> Result<(), RegistryError> {
        for descriptor in descriptors {
            let case = resolve_descriptor(source, suite, base_dir, descriptor, defaults)?;
            self.insert(case)?;
        }
        Ok(())
    }

    fn insert(&mut self, case: TestCase) -> Result<(), RegistryError> {
        if let Some(existing) = self.cases.get(&case.id) {
            return Err(RegistryError::DuplicateId {
                id: case.id,
                first: existing.source.clone(),
                second: case.source,
            });
        }
        self.cases.insert(case.id.clone(), case);
        Ok(())
    }

    /// Returns a registry with only the cases that carry at least one of the given external ids.
    pub fn filter_by_external_ids(&self, ids: &[String]) -> Self {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.filtered(|case| case.case_ids.iter().any(|id| ids.contains(id.as_str())))
    }

    /// Returns a registry with only the cases whose own ids are listed.
    pub fn filter_by_case_ids<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        let ids: HashSet<&str> = ids.into_iter().collect();
        self.filtered(|case| ids.contains(case.id.as_str()))
    }

    /// Returns a registry with only the cases matching `pred`, in the same order.
    pub fn filtered(&self, mut pred: impl FnMut(&TestCase) -> bool) -> Self {
        Self {
            cases: self
                .cases
                .iter()
                .filter(|(_, case)| pred(case))
                .map(|(id, case)| (id.clone(), case.clone()))
                .collect(),
        }
    }

    /// Returns the case with the given id.
    pub fn get(&self, id: &str) -> Option<&TestCase> {
        self.cases.get(id)
    }

    /// Iterates over cases in insertion order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &TestCase> + '_ {
        self.cases.values()
    }

    /// Groups cases by host profile.
    ///
    /// Profiles appear in the order of their first case; cases keep insertion order within each
    /// profile.
    pub fn iter_by_profile(&self) -> IndexMap<&HostProfile, Vec<&TestCase>> {
        let mut groups: IndexMap<&HostProfile, Vec<&TestCase>> = IndexMap::new();
        for case in self.cases.values() {
            groups.entry(&case.profile).or_default().push(case);
        }
        groups
    }

    /// Returns the number of cases.
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Returns true if there are no cases.
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

fn discover_suite_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, RegistryError> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|error| RegistryError::Walk {
            dir: dir.to_owned(),
            error,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8PathBuf::try_from(entry.into_path())
            .map_err(|error| RegistryError::NonUtf8Path {
                path: error.into_path_buf(),
            })?;
        let is_suite = path
            .file_name()
            .is_some_and(|name| SUITE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)));
        if is_suite {
            files.push(path);
        }
    }
    Ok(files)
}

fn default_suite_name(path: &Utf8Path) -> String {
    let name = path.file_name().unwrap_or(path.as_str());
    SUITE_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .or_else(|| path.file_stem())
        .unwrap_or(name)
        .to_owned()
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlSuiteFile {
    #[serde(default)]
    suite: Option<TomlSuiteHeader>,
    #[serde(default)]
    defaults: toml::Table,
    #[serde(default)]
    case: Vec<toml::Table>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlSuiteHeader {
    name: String,
}

/// Parses a TOML suite. Keys in `[defaults]` are copied into every `[[case]]` table that doesn't
/// set them, then each table is read as a descriptor.
fn parse_toml_suite(
    path: &Utf8Path,
    contents: &str,
) -> Result<(String, Vec<TestCaseDescriptor>), RegistryError> {
    let file: TomlSuiteFile = toml::from_str(contents).map_err(|error| RegistryError::ParseToml {
        path: path.to_owned(),
        error,
    })?;
    let suite = match file.suite {
        Some(header) => header.name,
        None => default_suite_name(path),
    };

    let descriptors = file
        .case
        .into_iter()
        .enumerate()
        .map(|(index, mut table)| {
            for (key, value) in &file.defaults {
                if !table.contains_key(key) {
                    table.insert(key.clone(), value.clone());
                }
            }
            toml::Value::Table(table)
                .try_into::<TestCaseDescriptor>()
                .map_err(|error| RegistryError::InvalidTomlCase {
                    path: path.to_owned(),
                    index,
                    error,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((suite, descriptors))
}

fn resolve_descriptor(
    source: &Utf8Path,
    suite: &str,
    base_dir: &Utf8Path,
    descriptor: TestCaseDescriptor,
    defaults: &CaseDefaults,
) -> Result<TestCase, RegistryError> {
    let TestCaseDescriptor {
        id,
        script_path,
        host_kind,
        host_args,
        host_env,
        isolation,
        expected_lines,
        forbidden_lines,
        halt_on_forbidden,
        timeout_s,
        case_ids,
        attach_debugger,
        wait_for_debugger,
        artefact_globs,
    } = descriptor;

    if id.is_empty() {
        return Err(RegistryError::EmptyId {
            path: source.to_owned(),
            script_path,
        });
    }

    let timeout = match timeout_s {
        Some(0) => {
            return Err(RegistryError::ZeroTimeout {
                path: source.to_owned(),
                id,
            });
        }
        Some(secs) => Duration::from_secs(secs),
        None => defaults.timeout,
    };

    let script_path = if script_path.is_absolute() {
        script_path
    } else {
        base_dir.join(script_path)
    };

    Ok(TestCase {
        id,
        suite: suite.to_owned(),
        source: source.to_owned(),
        script_path,
        profile: HostProfile {
            kind: host_kind,
            args: host_args,
            env: host_env,
        },
        isolation,
        expected_lines: dedup_in_order(expected_lines),
        forbidden_lines: dedup_in_order(forbidden_lines),
        halt_on_forbidden: halt_on_forbidden.unwrap_or(defaults.halt_on_forbidden),
        timeout,
        case_ids,
        attach_debugger,
        wait_for_debugger,
        artefact_globs,
    })
}

fn dedup_in_order(lines: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    lines
        .into_iter()
        .filter(|line| seen.insert(line.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{case_defaults, descriptor};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn ids(registry: &TestRegistry) -> Vec<&str> {
        registry.iter().map(|case| case.id.as_str()).collect()
    }

    #[test]
    fn toml_suite_applies_defaults() {
        let dir = camino_tempfile::tempdir().unwrap();
        let suite = dir.path().join("atom.hostbatch.toml");
        std::fs::write(
            &suite,
            indoc! {r#"
                [suite]
                name = "atom"

                [defaults]
                host_kind = "Editor"
                expected_lines = ["Test finished"]
                timeout_s = 120

                [[case]]
                id = "viewport"
                script_path = "scripts/viewport.py"
                case_ids = ["C32250017", 101]

                [[case]]
                id = "lighting"
                script_path = "scripts/lighting.py"
                timeout_s = 30
                halt_on_forbidden = false
                forbidden_lines = ["Trace::Error", "Trace::Error"]
            "#},
        )
        .unwrap();

        let defaults = CaseDefaults {
            timeout: Duration::from_secs(180),
            halt_on_forbidden: true,
        };
        let registry = TestRegistry::load_paths(&[dir.path().to_owned()], &defaults).unwrap();
        assert_eq!(ids(&registry), ["viewport", "lighting"]);

        let viewport = registry.get("viewport").unwrap();
        assert_eq!(viewport.suite, "atom");
        assert_eq!(viewport.profile.kind, HostKind::Editor);
        assert_eq!(viewport.timeout, Duration::from_secs(120));
        assert_eq!(viewport.expected_lines, ["Test finished"]);
        assert!(viewport.halt_on_forbidden, "run-wide default applies");
        assert_eq!(viewport.script_path, dir.path().join("scripts/viewport.py"));
        assert_eq!(
            viewport.case_ids,
            [ExternalCaseId::new("C32250017"), ExternalCaseId::new("101")]
        );

        let lighting = registry.get("lighting").unwrap();
        assert_eq!(lighting.timeout, Duration::from_secs(30));
        assert!(!lighting.halt_on_forbidden, "explicit value wins");
        assert_eq!(lighting.forbidden_lines, ["Trace::Error"]);
    }

    #[test]
    fn directories_are_walked_in_name_order() {
        let dir = camino_tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(
            dir.path().join("nested/b.hostbatch.json"),
            r#"[{"id": "b1", "script_path": "b1.py", "host_kind": "Generic"}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.hostbatch.json"),
            r#"[{"id": "a1", "script_path": "a1.py", "host_kind": "Generic"}]"#,
        )
        .unwrap();
        // Not a suite file.
        std::fs::write(dir.path().join("notes.json"), "not json").unwrap();

        let registry =
            TestRegistry::load_paths(&[dir.path().to_owned()], &case_defaults()).unwrap();
        assert_eq!(ids(&registry), ["a1", "b1"]);
        assert_eq!(registry.get("b1").unwrap().suite, "b");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let error = TestRegistry::from_descriptors(
            Utf8Path::new("suite.json"),
            "suite",
            Utf8Path::new("/suites"),
            [descriptor("a"), descriptor("b"), descriptor("a")],
            &case_defaults(),
        )
        .unwrap_err();
        assert!(
            matches!(&error, RegistryError::DuplicateId { id, .. } if id == "a"),
            "unexpected error: {error}"
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut zero = descriptor("a");
        zero.timeout_s = Some(0);
        let error = TestRegistry::from_descriptors(
            Utf8Path::new("suite.json"),
            "suite",
            Utf8Path::new("/suites"),
            [zero],
            &case_defaults(),
        )
        .unwrap_err();
        assert!(matches!(error, RegistryError::ZeroTimeout { .. }));
    }

    #[test]
    fn missing_path_is_an_error() {
        let error = TestRegistry::load_paths(&["/does/not/exist".into()], &case_defaults())
            .unwrap_err();
        assert!(matches!(error, RegistryError::MissingPath { .. }));
    }

    #[test]
    fn filter_by_external_ids_deselects() {
        let mut a = descriptor("a");
        a.case_ids = vec![ExternalCaseId::new("101")];
        let mut b = descriptor("b");
        b.case_ids = vec![ExternalCaseId::new("102")];
        let mut c = descriptor("c");
        c.case_ids = vec![ExternalCaseId::new("103")];

        let registry = TestRegistry::from_descriptors(
            Utf8Path::new("suite.json"),
            "suite",
            Utf8Path::new("/suites"),
            [a, b, c],
            &case_defaults(),
        )
        .unwrap();
        let filtered = registry.filter_by_external_ids(&["101".to_owned(), "102".to_owned()]);
        assert_eq!(ids(&filtered), ["a", "b"]);
        assert_eq!(registry.len(), 3, "original registry is untouched");
    }

    #[test]
    fn iter_by_profile_groups_in_first_seen_order() {
        let mut editor = descriptor("editor-1");
        editor.host_kind = HostKind::Editor;
        let mut editor2 = descriptor("editor-2");
        editor2.host_kind = HostKind::Editor;
        let mut with_args = descriptor("generic-args");
        with_args.host_args = vec!["--fast".to_owned()];

        let registry = TestRegistry::from_descriptors(
            Utf8Path::new("suite.json"),
            "suite",
            Utf8Path::new("/suites"),
            [descriptor("generic-1"), editor, with_args, editor2, descriptor("generic-2")],
            &case_defaults(),
        )
        .unwrap();

        let groups: Vec<(HostKind, Vec<&str>)> = registry
            .iter_by_profile()
            .into_iter()
            .map(|(profile, cases)| {
                (
                    profile.kind,
                    cases.iter().map(|case| case.id.as_str()).collect(),
                )
            })
            .collect();
        assert_eq!(
            groups,
            [
                (HostKind::Generic, vec!["generic-1", "generic-2"]),
                (HostKind::Editor, vec!["editor-1", "editor-2"]),
                (HostKind::Generic, vec!["generic-args"]),
            ]
        );
    }
}
