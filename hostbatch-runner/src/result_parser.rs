// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turning what the log monitor saw into a [`CaseResult`].

use crate::{
    helpers::{display_host_exit, tail_lines},
    log_monitor::{CaseWindow, FORBIDDEN_LINE_REASON, MonitorOutcome},
    registry::TestCase,
};
use chrono::{DateTime, FixedOffset};
use hostbatch_metadata::{CaseOutcome, CaseResult};
use std::time::Duration;

/// Reason used when a batch deadline cuts a case short.
pub const BATCH_DEADLINE_REASON: &str = "batch deadline exceeded";
/// Reason used when the run is cancelled while a case is running.
pub const CANCELLED_REASON: &str = "cancelled";
/// Reason used when the host exits with the configured failure code.
pub const HOST_FAILURE_REASON: &str = "host reported test failure";

/// When a case ran.
#[derive(Copy, Clone, Debug)]
pub struct CaseTiming {
    /// When the case became active.
    pub started_at: DateTime<FixedOffset>,
    /// How long it was active.
    pub duration: Duration,
}

/// Classifies monitored cases.
#[derive(Copy, Clone, Debug)]
pub struct ResultParser {
    fail_exit_code: i32,
    excerpt_lines: usize,
}

impl ResultParser {
    /// Creates a parser.
    ///
    /// `fail_exit_code` is the code hosts use to report a test failure rather than a crash, and
    /// `excerpt_lines` bounds the log excerpt kept with each result.
    pub fn new(fail_exit_code: i32, excerpt_lines: usize) -> Self {
        Self {
            fail_exit_code,
            excerpt_lines,
        }
    }

    /// Returns the number of log lines kept as evidence.
    pub fn excerpt_lines(&self) -> usize {
        self.excerpt_lines
    }

    /// Produces the result of one attempt at `case`.
    ///
    /// `host_log` holds the most recent lines of the whole host lifetime. It is used as evidence
    /// when the case's own window is empty, for example when the host died before printing
    /// anything.
    pub fn parse<'a>(
        &self,
        case: &TestCase,
        window: &CaseWindow,
        host_log: impl DoubleEndedIterator<Item = &'a String>,
        timing: CaseTiming,
    ) -> CaseResult {
        let (outcome, reason) = self.classify(case, &window.outcome);

        let mut log_excerpt = if window.lines.is_empty() && !outcome.is_success() {
            tail_lines(host_log, self.excerpt_lines)
        } else {
            tail_lines(window.lines.iter(), self.excerpt_lines)
        };
        for output in &window.marker_output {
            if !log_excerpt.is_empty() {
                log_excerpt.push('\n');
            }
            log_excerpt.push_str(output);
        }

        CaseResult {
            case_id: case.id.clone(),
            outcome,
            reason,
            log_excerpt,
            attempts: 1,
            artefacts: Vec::new(),
            started_at: Some(timing.started_at),
            duration: timing.duration,
            previous_attempts: Vec::new(),
        }
    }

    fn classify(&self, case: &TestCase, outcome: &MonitorOutcome) -> (CaseOutcome, Option<String>) {
        match outcome {
            MonitorOutcome::Completed => (CaseOutcome::Pass, None),
            MonitorOutcome::Failed { reason } => (CaseOutcome::Fail, Some(reason.clone())),
            MonitorOutcome::Timeout {
                batch_deadline: false,
            } => (
                CaseOutcome::Timeout,
                Some(format!("timed out after {}s", case.timeout.as_secs())),
            ),
            MonitorOutcome::Timeout {
                batch_deadline: true,
            } => (CaseOutcome::Unknown, Some(BATCH_DEADLINE_REASON.to_owned())),
            MonitorOutcome::HostGone {
                exit,
                expectations_met,
                forbidden_seen,
            } => {
                if *forbidden_seen {
                    // Forbidden lines are a verdict on the case itself, whatever the host did
                    // afterwards.
                    (CaseOutcome::Fail, Some(FORBIDDEN_LINE_REASON.to_owned()))
                } else if exit.code() == Some(self.fail_exit_code) {
                    (CaseOutcome::Fail, Some(HOST_FAILURE_REASON.to_owned()))
                } else if exit.is_success() && *expectations_met {
                    (CaseOutcome::Pass, None)
                } else if exit.is_success() {
                    (
                        CaseOutcome::Unknown,
                        Some("host exited before the expected lines were observed".to_owned()),
                    )
                } else {
                    (
                        CaseOutcome::Crash,
                        Some(format!("host crashed: {}", display_host_exit(*exit))),
                    )
                }
            }
            MonitorOutcome::Cancelled => (CaseOutcome::Unknown, Some(CANCELLED_REASON.to_owned())),
        }
    }
}
