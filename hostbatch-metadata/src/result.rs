// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// The outcome of running a case.
///
/// Variants are declared in increasing order of severity, so `Ord` picks the worst outcome:
/// `Crash > Timeout > Fail > Unknown > Skipped > Pass`.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CaseOutcome {
    /// Every expected line was observed and no forbidden line was seen.
    Pass,
    /// The case never started.
    Skipped,
    /// The case could not be classified, typically because the host died or the run was
    /// cancelled.
    Unknown,
    /// A forbidden line was seen, or the host reported a failure.
    Fail,
    /// The case exceeded its time budget.
    Timeout,
    /// The host exited abnormally while the case was active.
    Crash,
}

impl CaseOutcome {
    /// Returns true if this outcome is [`Self::Pass`].
    pub fn is_success(self) -> bool {
        self == Self::Pass
    }

    /// Returns true if a case with this outcome should be re-run in isolation.
    ///
    /// Failures are deterministic verdicts and are never retried. Skipped cases only arise from
    /// cancellation, after which nothing is retried.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Unknown | Self::Crash | Self::Timeout)
    }

    /// Returns the more severe of `self` and `other`.
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }

    /// Returns the upper-case label used in human-readable output.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Skipped => "SKIP",
            Self::Unknown => "UNKNOWN",
            Self::Fail => "FAIL",
            Self::Timeout => "TIMEOUT",
            Self::Crash => "CRASH",
        }
    }
}

impl fmt::Display for CaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The result of a case, aggregated over all attempts.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CaseResult {
    /// The id of the case.
    pub case_id: String,

    /// The outcome reported for the case.
    pub outcome: CaseOutcome,

    /// A short human-readable cause. Set for every outcome other than [`CaseOutcome::Pass`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// The part of the host log that belongs to the case's active window, or the evidence that
    /// explains why the case never ran.
    #[serde(default)]
    pub log_excerpt: String,

    /// The number of times the case was attempted. Always at least 1.
    pub attempts: u32,

    /// Absolute paths of files captured while the case was active.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artefacts: Vec<Utf8PathBuf>,

    /// When the reported attempt started. `None` if it never started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<FixedOffset>>,

    /// How long the reported attempt took.
    #[serde(default)]
    pub duration: Duration,

    /// The attempts other than the reported one, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_attempts: Vec<AttemptRecord>,
}

impl CaseResult {
    /// Creates a result for a case that never got a window of its own.
    pub fn not_started(
        case_id: impl Into<String>,
        outcome: CaseOutcome,
        reason: impl Into<String>,
        evidence: impl Into<String>,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            outcome,
            reason: Some(reason.into()),
            log_excerpt: evidence.into(),
            attempts: 1,
            artefacts: Vec::new(),
            started_at: None,
            duration: Duration::ZERO,
            previous_attempts: Vec::new(),
        }
    }

    /// Returns a summary of this result as a single attempt.
    pub fn to_attempt_record(&self) -> AttemptRecord {
        AttemptRecord {
            outcome: self.outcome,
            reason: self.reason.clone(),
            log_excerpt: self.log_excerpt.clone(),
            started_at: self.started_at,
            duration: self.duration,
        }
    }
}

/// A summary of one attempt at running a case.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct AttemptRecord {
    /// The outcome of this attempt.
    pub outcome: CaseOutcome,

    /// The cause of the outcome, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// The log excerpt captured for this attempt.
    #[serde(default)]
    pub log_excerpt: String,

    /// When the attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<FixedOffset>>,

    /// How long the attempt took.
    #[serde(default)]
    pub duration: Duration,
}
