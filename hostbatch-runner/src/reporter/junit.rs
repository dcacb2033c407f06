// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Code to generate JUnit XML reports from a finished run.

use super::RunReport;
use crate::{config::JunitSettings, errors::WriteReportError};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, FixedOffset};
use hostbatch_metadata::{AttemptRecord, CaseOutcome, CaseResult};
use indexmap::IndexMap;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestRerun, TestSuite};
use std::{fs::File, time::Duration};

/// Writes a [`RunReport`] as JUnit XML.
///
/// Each suite file becomes a `<testsuite>` and each case a `<testcase>` whose classname is the
/// suite name. Each `<testcase>` carries one `test_case_id` property per external id and one
/// `artefact` property per artefact.
#[derive(Clone, Debug)]
pub struct JunitWriter {
    path: Utf8PathBuf,
    settings: JunitSettings,
}

impl JunitWriter {
    /// Creates a writer that writes to `path`.
    pub fn new(path: impl Into<Utf8PathBuf>, settings: &JunitSettings) -> Self {
        Self {
            path: path.into(),
            settings: settings.clone(),
        }
    }

    /// Returns the path the report is written to.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Builds the JUnit report for `report`.
    pub fn to_report(
        &self,
        report: &RunReport,
        started_at: DateTime<FixedOffset>,
        elapsed: Duration,
    ) -> Report {
        let mut test_suites: IndexMap<&str, TestSuite> = IndexMap::new();
        for result in report.results() {
            let Some(case) = report.case(&result.case_id) else {
                continue;
            };
            let test_suite = test_suites.entry(&case.suite).or_insert_with(|| {
                let mut test_suite = TestSuite::new(case.suite.clone());
                test_suite.add_property(("source", case.source.as_str()));
                test_suite
            });

            let mut test_case = self.test_case(result, &case.suite);
            for external_id in &case.case_ids {
                test_case.add_property(("test_case_id", external_id.as_str()));
            }
            for artefact in &result.artefacts {
                test_case.add_property(("artefact", artefact.as_str()));
            }
            test_suite.add_test_case(test_case);
        }

        let mut junit = Report::new(self.settings.report_name());
        junit
            .set_timestamp(started_at)
            .set_time(elapsed)
            .add_test_suites(test_suites.into_values());
        junit
    }

    /// Builds the JUnit report for `report` and writes it out.
    pub fn write(
        &self,
        report: &RunReport,
        started_at: DateTime<FixedOffset>,
        elapsed: Duration,
    ) -> Result<(), WriteReportError> {
        let junit = self.to_report(report, started_at, elapsed);

        if let Some(junit_dir) = self.path.parent() {
            std::fs::create_dir_all(junit_dir).map_err(|error| WriteReportError::Fs {
                file: junit_dir.to_owned(),
                error,
            })?;
        }
        let f = File::create(&self.path).map_err(|error| WriteReportError::Fs {
            file: self.path.clone(),
            error,
        })?;
        junit.serialize(f).map_err(|error| WriteReportError::Junit {
            file: self.path.clone(),
            error,
        })
    }

    fn test_case(&self, result: &CaseResult, classname: &str) -> TestCase {
        let mut status = match result.outcome {
            CaseOutcome::Pass => TestCaseStatus::success(),
            CaseOutcome::Skipped => TestCaseStatus::skipped(),
            outcome => {
                let (kind, ty) = non_success_kind_and_type(outcome);
                let mut status = TestCaseStatus::non_success(kind);
                status.set_type(ty);
                status
            }
        };
        if let Some(reason) = &result.reason {
            status.set_message(reason.as_str());
        }

        // Flaky passes report their failed attempts as reruns, like failures do.
        for attempt in &result.previous_attempts {
            if let Some(rerun) = self.rerun(attempt) {
                status.add_rerun(rerun);
            }
        }

        let mut test_case = TestCase::new(result.case_id.as_str(), status);
        test_case.set_classname(classname).set_time(result.duration);
        if let Some(started_at) = result.started_at {
            test_case.set_timestamp(started_at);
        }

        let store_output = if result.outcome.is_success() {
            self.settings.store_success_output()
        } else {
            self.settings.store_failure_output()
        };
        if store_output && !result.log_excerpt.is_empty() {
            test_case.set_system_out(result.log_excerpt.as_str());
        }
        test_case
    }

    fn rerun(&self, attempt: &AttemptRecord) -> Option<TestRerun> {
        if attempt.outcome.is_success() {
            return None;
        }
        let (kind, ty) = non_success_kind_and_type(attempt.outcome);
        let mut rerun = TestRerun::new(kind);
        rerun.set_type(ty).set_time(attempt.duration);
        if let Some(started_at) = attempt.started_at {
            rerun.set_timestamp(started_at);
        }
        if let Some(reason) = &attempt.reason {
            rerun.set_message(reason.as_str());
        }
        if self.settings.store_failure_output() && !attempt.log_excerpt.is_empty() {
            rerun.set_system_out(attempt.log_excerpt.as_str());
        }
        Some(rerun)
    }
}

fn non_success_kind_and_type(outcome: CaseOutcome) -> (NonSuccessKind, &'static str) {
    match outcome {
        CaseOutcome::Fail => (NonSuccessKind::Failure, "case failure"),
        CaseOutcome::Timeout => (NonSuccessKind::Failure, "case timeout"),
        CaseOutcome::Crash => (NonSuccessKind::Failure, "host crash"),
        CaseOutcome::Unknown => (NonSuccessKind::Error, "unknown outcome"),
        CaseOutcome::Skipped => (NonSuccessKind::Error, "not started"),
        CaseOutcome::Pass => (NonSuccessKind::Error, "passed"),
    }
}
