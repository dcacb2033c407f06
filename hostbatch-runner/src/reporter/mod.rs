// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reporting results.
//!
//! A [`RunReport`] collects exactly one result per registered case. Once finalized it feeds the
//! console [`ReportDisplayer`], the [`JunitWriter`] and the [`RerunHints`].

mod codeowners;
mod displayer;
mod junit;
mod rerun;

pub use codeowners::*;
pub use displayer::*;
pub use junit::*;
pub use rerun::*;

use crate::registry::{TestCase, TestRegistry};
use hostbatch_metadata::{CaseOutcome, CaseResult};
use std::collections::BTreeMap;
use tracing::warn;

/// Reason given to registered cases that never got a result.
pub const NO_RESULT_REASON: &str = "no result reported";

/// The results of a run, keyed and sorted by case id.
#[derive(Clone, Debug)]
pub struct RunReport {
    registry: TestRegistry,
    results: BTreeMap<String, CaseResult>,
}

impl RunReport {
    /// Creates an empty report for the cases in `registry`.
    pub fn new(registry: &TestRegistry) -> Self {
        Self {
            registry: registry.clone(),
            results: BTreeMap::new(),
        }
    }

    /// Records the result of a case.
    ///
    /// Results for cases that are not in the registry are dropped. If a case is reported twice,
    /// the first result is kept.
    pub fn insert(&mut self, result: CaseResult) {
        if self.registry.get(&result.case_id).is_none() {
            warn!("dropping result for unregistered case `{}`", result.case_id);
            return;
        }
        if self.results.contains_key(&result.case_id) {
            warn!("case `{}` was reported twice, keeping the first result", result.case_id);
            return;
        }
        self.results.insert(result.case_id.clone(), result);
    }

    /// Gives every registered case without a result an `Unknown` one, so that no case ever
    /// disappears from the report.
    pub fn finalize(&mut self) {
        for case in self.registry.iter() {
            if !self.results.contains_key(&case.id) {
                warn!("case `{}` produced no result", case.id);
                self.results.insert(
                    case.id.clone(),
                    CaseResult::not_started(case.id.clone(), CaseOutcome::Unknown, NO_RESULT_REASON, ""),
                );
            }
        }
    }

    /// Returns the results, sorted by case id.
    pub fn results(&self) -> impl ExactSizeIterator<Item = &CaseResult> + '_ {
        self.results.values()
    }

    /// Returns the results that did not pass, sorted by case id.
    pub fn non_passing(&self) -> impl Iterator<Item = &CaseResult> + '_ {
        self.results.values().filter(|r| !r.outcome.is_success())
    }

    /// Returns the result of a case.
    pub fn get(&self, case_id: &str) -> Option<&CaseResult> {
        self.results.get(case_id)
    }

    /// Returns the registered case with this id.
    pub fn case(&self, case_id: &str) -> Option<&TestCase> {
        self.registry.get(case_id)
    }

    /// Returns the number of registered cases.
    pub fn case_count(&self) -> usize {
        self.registry.len()
    }

    /// Returns counts of outcomes.
    pub fn stats(&self) -> RunStats {
        let mut stats = RunStats {
            total: self.registry.len(),
            ..RunStats::default()
        };
        for result in self.results.values() {
            stats.finished += 1;
            if result.attempts > 1 {
                stats.retried += 1;
            }
            match result.outcome {
                CaseOutcome::Pass => {
                    stats.passed += 1;
                    if result.attempts > 1 {
                        stats.flaky += 1;
                    }
                }
                CaseOutcome::Skipped => stats.skipped += 1,
                CaseOutcome::Unknown => stats.unknown += 1,
                CaseOutcome::Fail => stats.failed += 1,
                CaseOutcome::Timeout => stats.timed_out += 1,
                CaseOutcome::Crash => stats.crashed += 1,
            }
        }
        stats
    }
}

/// Counts of outcomes in a [`RunReport`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    /// The number of registered cases.
    pub total: usize,
    /// The number of cases with a result.
    pub finished: usize,
    /// The number of cases that passed.
    pub passed: usize,
    /// The number of passing cases that needed more than one attempt.
    pub flaky: usize,
    /// The number of cases attempted more than once.
    pub retried: usize,
    /// The number of cases that failed.
    pub failed: usize,
    /// The number of cases that timed out.
    pub timed_out: usize,
    /// The number of cases whose host crashed.
    pub crashed: usize,
    /// The number of cases whose outcome is unknown.
    pub unknown: usize,
    /// The number of cases that never started.
    pub skipped: usize,
}

impl RunStats {
    /// Returns true if every registered case passed.
    pub fn is_success(&self) -> bool {
        self.passed == self.total
    }

    /// Returns the number of cases that did not pass.
    pub fn not_passed(&self) -> usize {
        self.failed + self.timed_out + self.crashed + self.unknown + self.skipped
    }
}

#[cfg(test)]
pub(crate) mod test_report {
    use super::*;
    use crate::test_helpers::{case_defaults, descriptor};
    use camino::Utf8Path;
    use chrono::DateTime;
    use hostbatch_metadata::ExternalCaseId;
    use std::time::Duration;

    /// A registry of three cases across two suites, and a finalized report over it.
    pub(crate) fn sample() -> RunReport {
        let mut viewport = descriptor("viewport");
        viewport.case_ids = vec![ExternalCaseId::new("101"), ExternalCaseId::new("102")];
        let mut registry = TestRegistry::from_descriptors(
            Utf8Path::new("/suites/atom.hostbatch.toml"),
            "atom",
            Utf8Path::new("/suites"),
            [viewport, descriptor("lights")],
            &case_defaults(),
        )
        .unwrap();
        let physics = TestRegistry::from_descriptors(
            Utf8Path::new("/suites/physics.hostbatch.json"),
            "physics",
            Utf8Path::new("/suites"),
            [descriptor("joints")],
            &case_defaults(),
        )
        .unwrap();
        registry.merge(physics).unwrap();

        let started_at = DateTime::parse_from_rfc3339("2026-01-02T03:04:05+00:00").unwrap();
        let mut report = RunReport::new(&registry);

        let mut viewport = CaseResult::not_started("viewport", CaseOutcome::Pass, "", "viewport DONE");
        viewport.reason = None;
        viewport.started_at = Some(started_at);
        viewport.duration = Duration::from_millis(1500);
        viewport.attempts = 2;
        viewport.previous_attempts = vec![
            CaseResult::not_started(
                "viewport",
                CaseOutcome::Crash,
                "host crashed: exited with code -1 (0xFFFFFFFF)",
                "Segmentation fault",
            )
            .to_attempt_record(),
        ];
        report.insert(viewport);

        let mut lights = CaseResult::not_started(
            "lights",
            CaseOutcome::Fail,
            "forbidden line",
            "lights loading\nERROR shader missing",
        );
        lights.started_at = Some(started_at);
        lights.duration = Duration::from_secs(3);
        report.insert(lights);

        report.finalize();
        report
    }
}
