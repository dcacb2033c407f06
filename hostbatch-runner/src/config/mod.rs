// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for hostbatch.
//!
//! Configuration is read from `.config/hostbatch.toml` in the workspace root, layered on top of
//! the defaults in `default-config.toml`. Command-line flags are applied afterwards through
//! [`RunOverrides`].

mod hosts;
mod run;

pub use hosts::*;
pub use run::*;

use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use hostbatch_metadata::HostKind;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Overall configuration for hostbatch.
#[derive(Clone, Debug)]
pub struct HostbatchConfig {
    workspace_root: Utf8PathBuf,
    run: RunSettings,
    hosts: BTreeMap<HostKind, HostSettings>,
    junit: JunitSettings,
    report: ReportSettings,
}

impl HostbatchConfig {
    /// The default location of the config within the workspace root.
    pub const CONFIG_PATH: &'static str = ".config/hostbatch.toml";

    /// Contains the default config as a TOML file.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Reads the hostbatch config from the given file, or if not specified from
    /// `.config/hostbatch.toml` in the workspace root.
    ///
    /// An explicitly specified file must exist; the default location is optional.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (deserialized, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !unknown.is_empty() {
            warn!(
                "ignoring unknown configuration keys in `{config_file}`: {}",
                unknown.iter().map(|s| format!("`{s}`")).join(", "),
            );
        }

        deserialized
            .into_config(workspace_root)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))
    }

    /// Returns the default hostbatch config.
    #[cfg(test)]
    pub(crate) fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        let builder = Self::make_default_config();
        let (deserialized, unknown) = Self::build_and_deserialize_config(&builder)
            .expect("default config is always valid");

        // Make sure there aren't any unknown keys in the default config, since it is
        // embedded/shipped with this binary.
        assert!(
            unknown.is_empty(),
            "found unknown keys in default config: {unknown:?}"
        );

        deserialized
            .into_config(workspace_root.into())
            .expect("default config is always valid")
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the run settings.
    pub fn run(&self) -> &RunSettings {
        &self.run
    }

    /// Applies command-line overrides to the run settings.
    pub fn apply_overrides(&mut self, overrides: &RunOverrides) {
        overrides.apply(&mut self.run);
    }

    /// Returns the settings for a kind of host.
    pub fn host(&self, kind: HostKind) -> HostSettings {
        self.hosts.get(&kind).cloned().unwrap_or_default()
    }

    /// Returns the absolute directory logs, artefacts and reports are written to.
    pub fn store_dir(&self) -> Utf8PathBuf {
        self.workspace_root.join(&self.report.store_dir)
    }

    /// Returns the JUnit settings.
    pub fn junit(&self) -> &JunitSettings {
        &self.junit
    }

    /// Sets the JUnit output path, relative to the store directory.
    pub fn set_junit_path(&mut self, path: impl Into<Utf8PathBuf>) {
        self.junit.path = Some(path.into());
    }

    /// Returns the absolute path of the JUnit report, if one should be written.
    pub fn junit_path(&self) -> Option<Utf8PathBuf> {
        self.junit.path.as_ref().map(|path| self.store_dir().join(path))
    }

    /// Returns the absolute path of the CODEOWNERS-style file, if one is configured.
    pub fn codeowners_path(&self) -> Option<Utf8PathBuf> {
        self.report
            .codeowners
            .as_ref()
            .map(|path| self.workspace_root.join(path))
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(HostbatchConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: HostbatchConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // Both serde_path_to_error and the config crate report the key. Drop the key
                // from the config error for consistency.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

/// Settings for the JUnit report.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JunitSettings {
    path: Option<Utf8PathBuf>,
    report_name: String,
    store_success_output: bool,
    store_failure_output: bool,
}

impl JunitSettings {
    /// Returns the name of the report.
    pub fn report_name(&self) -> &str {
        &self.report_name
    }

    /// Returns true if log excerpts of passing cases are stored in the report.
    pub fn store_success_output(&self) -> bool {
        self.store_success_output
    }

    /// Returns true if log excerpts of cases that did not pass are stored in the report.
    pub fn store_failure_output(&self) -> bool {
        self.store_failure_output
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ReportSettings {
    store_dir: Utf8PathBuf,
    codeowners: Option<Utf8PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct HostbatchConfigDeserialize {
    run: RunSettings,
    #[serde(default)]
    hosts: IndexMap<String, HostSettings>,
    junit: JunitSettings,
    report: ReportSettings,
}

impl HostbatchConfigDeserialize {
    fn into_config(
        self,
        workspace_root: Utf8PathBuf,
    ) -> Result<HostbatchConfig, ConfigParseErrorKind> {
        self.run.validate()?;

        let mut hosts = BTreeMap::new();
        for (key, settings) in self.hosts {
            let kind = key
                .parse::<HostKind>()
                .map_err(ConfigParseErrorKind::UnknownHostKind)?;
            hosts.insert(kind, settings);
        }

        Ok(HostbatchConfig {
            workspace_root,
            run: self.run,
            hosts,
            junit: self.junit,
            report: self.report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn write_config(dir: &Utf8TempDir, contents: &str) {
        let config_dir = dir.path().join(".config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("hostbatch.toml"), contents).unwrap();
    }

    #[test]
    fn default_config_values() {
        let config = HostbatchConfig::default_config("/workspace");
        let run = config.run();
        assert_eq!(run.batch_size.get(), 8);
        assert_eq!(run.retries, 1);
        assert_eq!(run.default_timeout, Duration::from_secs(180));
        assert_eq!(run.grace_period, Duration::from_secs(5));
        assert_eq!(run.excerpt_lines, 200);
        assert_eq!(run.fail_exit_code, 15);
        assert_eq!(run.workers, WorkerCount::NumCpus);

        let editor = config.host(HostKind::Editor);
        assert_eq!(editor.args, vec!["-BatchMode", "-autotest_mode"]);
        assert!(editor.null_renderer);
        assert_eq!(editor.program, None);

        assert_eq!(config.store_dir(), "/workspace/target/hostbatch");
        assert_eq!(config.junit_path(), None);
        assert_eq!(config.codeowners_path(), None);
    }

    #[test]
    fn workspace_config_overrides_defaults() {
        let dir = camino_tempfile::tempdir().unwrap();
        write_config(
            &dir,
            indoc! {r#"
                [run]
                workers = 3
                batch-size = 2
                default-timeout = "1m"

                [hosts.editor]
                program = "/opt/o3de/bin/Editor"

                [hosts.generic]
                program = "/bin/sh"
                args = ["-c", "true"]

                [junit]
                path = "junit.xml"

                [report]
                codeowners = "CODEOWNERS"
            "#},
        );

        let config = HostbatchConfig::from_sources(dir.path(), None).unwrap();
        assert_eq!(config.run().workers, WorkerCount::Count(3));
        assert_eq!(config.run().batch_size.get(), 2);
        assert_eq!(config.run().default_timeout, Duration::from_secs(60));

        // Tables are merged with the defaults.
        let editor = config.host(HostKind::Editor);
        assert_eq!(editor.program.as_deref(), Some("/opt/o3de/bin/Editor"));
        assert_eq!(editor.args, vec!["-BatchMode", "-autotest_mode"]);

        let generic = config.host(HostKind::Generic);
        assert_eq!(generic.program.as_deref(), Some("/bin/sh"));
        assert!(!generic.null_renderer);

        assert_eq!(
            config.junit_path(),
            Some(dir.path().join("target/hostbatch/junit.xml"))
        );
        assert_eq!(config.codeowners_path(), Some(dir.path().join("CODEOWNERS")));
    }

    #[test]
    fn unknown_host_kind_is_an_error() {
        let dir = camino_tempfile::tempdir().unwrap();
        write_config(
            &dir,
            indoc! {r#"
                [hosts.blender]
                program = "blender"
            "#},
        );

        let error = HostbatchConfig::from_sources(dir.path(), None).unwrap_err();
        assert!(
            matches!(error.kind(), ConfigParseErrorKind::UnknownHostKind(_)),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn invalid_values_are_errors() {
        let dir = camino_tempfile::tempdir().unwrap();
        write_config(
            &dir,
            indoc! {r#"
                [run]
                batch-size = 0
            "#},
        );
        let error = HostbatchConfig::from_sources(dir.path(), None).unwrap_err();
        assert!(
            matches!(error.kind(), ConfigParseErrorKind::DeserializeError(_)),
            "unexpected error: {error:?}"
        );

        write_config(
            &dir,
            indoc! {r#"
                [run]
                poll-interval = "0s"
            "#},
        );
        let error = HostbatchConfig::from_sources(dir.path(), None).unwrap_err();
        assert!(
            matches!(
                error.kind(),
                ConfigParseErrorKind::InvalidValue {
                    key: "run.poll-interval",
                    ..
                }
            ),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn explicit_config_file_must_exist() {
        let dir = camino_tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let error = HostbatchConfig::from_sources(dir.path(), Some(&missing)).unwrap_err();
        assert_eq!(error.config_file(), &missing);
        assert!(matches!(error.kind(), ConfigParseErrorKind::BuildError(_)));
    }
}
