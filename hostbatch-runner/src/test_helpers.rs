// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared helpers for unit tests.

use crate::registry::CaseDefaults;
use hostbatch_metadata::{HostKind, Isolation, TestCaseDescriptor};
use std::{collections::BTreeMap, time::Duration};

/// Returns a Generic-host descriptor whose script is `<id>.sh`, with every optional field unset.
pub(crate) fn descriptor(id: &str) -> TestCaseDescriptor {
    TestCaseDescriptor {
        id: id.to_owned(),
        script_path: format!("{id}.sh").into(),
        host_kind: HostKind::Generic,
        host_args: Vec::new(),
        host_env: BTreeMap::new(),
        isolation: Isolation::Batched,
        expected_lines: Vec::new(),
        forbidden_lines: Vec::new(),
        halt_on_forbidden: None,
        timeout_s: None,
        case_ids: Vec::new(),
        attach_debugger: false,
        wait_for_debugger: false,
        artefact_globs: Vec::new(),
    }
}

pub(crate) fn case_defaults() -> CaseDefaults {
    CaseDefaults {
        timeout: Duration::from_secs(180),
        halt_on_forbidden: false,
    }
}

#[cfg(unix)]
pub(crate) mod fake_host {
    //! Shell-script hosts for dispatcher and pool tests.
    //!
    //! The fake host is `/bin/sh`, which sources each case script in turn. Scripts write to the
    //! host log through `$HOSTBATCH_LOG_PATH`, just like a real host writes its own log.

    use crate::{config::HostSettings, registry::TestRegistry};
    use camino::Utf8Path;
    use hostbatch_metadata::TestCaseDescriptor;

    pub(crate) fn settings() -> HostSettings {
        HostSettings {
            program: Some("/bin/sh".to_owned()),
            args: vec![
                "-c".to_owned(),
                r#"for s in "$@"; do . "$s"; done"#.to_owned(),
                "fake-host".to_owned(),
            ],
            ..Default::default()
        }
    }

    /// Writes `body` as the script of case `id` under `dir` and returns a descriptor for it that
    /// expects `DONE`.
    pub(crate) fn case(dir: &Utf8Path, id: &str, body: &str) -> TestCaseDescriptor {
        let script = dir.join(format!("{id}.sh"));
        std::fs::write(&script, body).expect("wrote case script");
        let mut d = super::descriptor(id);
        d.script_path = script;
        d.expected_lines = vec!["DONE".to_owned()];
        d.timeout_s = Some(10);
        d
    }

    /// A script body that reports success.
    pub(crate) fn pass(marker: &str) -> String {
        format!("echo '{marker} DONE' >> \"$HOSTBATCH_LOG_PATH\"\n")
    }

    pub(crate) fn registry(
        dir: &Utf8Path,
        descriptors: impl IntoIterator<Item = TestCaseDescriptor>,
    ) -> TestRegistry {
        TestRegistry::from_descriptors(
            &dir.join("suite.hostbatch.json"),
            "suite",
            dir,
            descriptors,
            &super::case_defaults(),
        )
        .expect("valid registry")
    }
}
