// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Following a host's log file.
//!
//! The host writes a plain, append-only text log. A [`LogTail`] follows it for one host lifetime,
//! and a [`LogMonitor`] consumes lines from the tail for one case at a time, deciding when that
//! case is over.

use crate::{
    cancel::CancelReceiver,
    host::{HostExit, HostProbe},
    registry::TestCase,
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::{
    collections::VecDeque,
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    time::{Duration, Instant},
};
use tracing::{debug, trace, warn};

const MARKER_START: &str = "JSON_START(";
const MARKER_END: &str = ")JSON_END";

/// Reads new lines from a log file as they are appended.
///
/// The file doesn't need to exist yet; hosts often take a while to create their log. If the file
/// shrinks (the host truncated or replaced it), reading starts over from the beginning.
#[derive(Debug)]
pub struct LogTail {
    path: Utf8PathBuf,
    file: Option<File>,
    offset: u64,
    partial: Vec<u8>,
    pending: VecDeque<String>,
    recent: VecDeque<String>,
    recent_capacity: usize,
}

impl LogTail {
    /// Creates a tail for `path`, keeping the last `recent_capacity` lines read.
    pub fn new(path: impl Into<Utf8PathBuf>, recent_capacity: usize) -> Self {
        Self {
            path: path.into(),
            file: None,
            offset: 0,
            partial: Vec::new(),
            pending: VecDeque::new(),
            recent: VecDeque::with_capacity(recent_capacity.min(1024)),
            recent_capacity,
        }
    }

    /// Returns the path being followed.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Reads whatever has been appended since the last poll.
    ///
    /// Read errors are not fatal: the next poll tries again.
    pub fn poll(&mut self) {
        if let Err(error) = self.poll_impl() {
            if error.kind() != io::ErrorKind::NotFound {
                warn!("error reading host log {}: {error}", self.path);
            }
            // Reopen on the next poll.
            self.file = None;
        }
    }

    fn poll_impl(&mut self) -> io::Result<()> {
        if self.file.is_none() {
            self.file = Some(File::open(&self.path)?);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            debug!("host log {} shrank, reading from the start", self.path);
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        let read = file.take(len - self.offset).read_to_end(&mut buf)?;
        self.offset += read as u64;

        let mut rest = buf.as_slice();
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            let line = String::from_utf8_lossy(&self.partial).into_owned();
            self.partial.clear();
            self.push_line(line);
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);
        Ok(())
    }

    /// Treats any trailing text without a newline as a complete line.
    ///
    /// Called once the host has exited and nothing more will be written.
    pub fn flush_partial(&mut self) {
        if !self.partial.is_empty() {
            let line = String::from_utf8_lossy(&self.partial).into_owned();
            self.partial.clear();
            self.push_line(line);
        }
    }

    /// Returns the next unconsumed line.
    pub fn next_line(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    /// Returns the most recent lines read during this host lifetime, oldest first.
    pub fn recent_lines(&self) -> impl DoubleEndedIterator<Item = &String> + '_ {
        self.recent.iter()
    }

    fn push_line(&mut self, line: String) {
        trace!(target: "hostbatch_runner::host_log", "{line}");
        if self.recent_capacity > 0 {
            if self.recent.len() == self.recent_capacity {
                self.recent.pop_front();
            }
            self.recent.push_back(line.clone());
        }
        self.pending.push_back(line);
    }
}

/// What a [`LogMonitor`] watches for.
#[derive(Copy, Clone, Debug)]
pub struct CaseWatch<'a> {
    /// The case being watched.
    pub case: &'a TestCase,
    /// When the case runs out of time. `None` if its timeout is too large to represent.
    pub case_deadline: Option<Instant>,
    /// When the whole batch runs out of time. `None` if it is too far away to represent.
    pub batch_deadline: Option<Instant>,
    /// If true, keep reading after the expected lines have been seen, until the host exits. Set
    /// for the last case of a host lifetime.
    pub linger: bool,
}

/// Why a [`LogMonitor`] stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Every expected line was seen and no forbidden line was.
    Completed,
    /// The case failed, either through a forbidden line or a failure marker.
    Failed {
        /// The cause of the failure.
        reason: String,
    },
    /// A deadline passed before the expected lines were seen.
    Timeout {
        /// True if the batch deadline passed before the case's own deadline.
        batch_deadline: bool,
    },
    /// The host exited before the case could be declared complete.
    HostGone {
        /// How the host exited.
        exit: HostExit,
        /// True if every expected line was seen before the exit.
        expectations_met: bool,
        /// True if a forbidden line was seen before the exit.
        forbidden_seen: bool,
    },
    /// The run was cancelled.
    Cancelled,
}

/// The result of watching one case.
#[derive(Clone, Debug)]
pub struct CaseWindow {
    /// Why watching stopped.
    pub outcome: MonitorOutcome,
    /// Every line consumed while the case was active.
    pub lines: Vec<String>,
    /// The expected lines that were observed.
    pub observed: Vec<String>,
    /// The log lines that contained a forbidden substring.
    pub forbidden_lines: Vec<String>,
    /// `output` fields of result markers for this case.
    pub marker_output: Vec<String>,
}

/// Reason used when a forbidden line fails a case.
pub const FORBIDDEN_LINE_REASON: &str = "forbidden line";
/// Reason used when the host reports a failure through a result marker.
pub const MARKER_FAILURE_REASON: &str = "host reported failure";

/// Watches one case's slice of a host log.
#[derive(Debug)]
pub struct LogMonitor<'a> {
    tail: &'a mut LogTail,
    watch: CaseWatch<'a>,
    poll_interval: Duration,
    state: MatchState,
}

impl<'a> LogMonitor<'a> {
    /// Creates a monitor that consumes lines from `tail` on behalf of `watch.case`.
    pub fn new(tail: &'a mut LogTail, watch: CaseWatch<'a>, poll_interval: Duration) -> Self {
        let state = MatchState::new(watch.case);
        Self {
            tail,
            watch,
            poll_interval,
            state,
        }
    }

    /// Follows the log until the case is decided.
    ///
    /// Lines that arrive after the case is decided are left in the tail for the next case.
    pub async fn run(mut self, host: &mut impl HostProbe, cancel: &mut CancelReceiver) -> CaseWindow {
        let (deadline, batch_deadline_first) =
            match (self.watch.case_deadline, self.watch.batch_deadline) {
                (Some(case), Some(batch)) => (Some(case.min(batch)), batch < case),
                (Some(case), None) => (Some(case), false),
                (None, batch) => (batch, batch.is_some()),
            };

        let outcome = loop {
            if cancel.is_cancelled() {
                break MonitorOutcome::Cancelled;
            }

            self.tail.poll();
            if let Some(outcome) = self.consume_pending(true) {
                break outcome;
            }

            if let Some(exit) = host.try_exit() {
                // Nothing else will be written: take everything that's left.
                self.tail.poll();
                self.tail.flush_partial();
                if let Some(outcome) = self.consume_pending(false) {
                    break outcome;
                }
                break self.on_host_exit(exit);
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                if self.state.is_satisfied() {
                    break self.state.verdict();
                }
                break MonitorOutcome::Timeout {
                    batch_deadline: batch_deadline_first,
                };
            }

            let sleep = deadline.map_or(self.poll_interval, |deadline| {
                self.poll_interval.min(deadline.saturating_duration_since(now))
            });
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(sleep) => {}
            }
        };

        debug!(
            "case `{}` finished watching: {outcome:?}",
            self.watch.case.id
        );
        let MatchState {
            expected,
            observed,
            forbidden_lines,
            marker_output,
            lines,
            ..
        } = self.state;
        CaseWindow {
            outcome,
            lines,
            observed: expected
                .into_iter()
                .zip(observed)
                .filter_map(|(line, seen)| seen.then_some(line))
                .collect(),
            forbidden_lines,
            marker_output,
        }
    }

    /// Processes pending lines. Returns an outcome as soon as the case is decided.
    fn consume_pending(&mut self, allow_early_completion: bool) -> Option<MonitorOutcome> {
        while let Some(line) = self.tail.next_line() {
            if let Some(outcome) = self.state.process_line(line, self.watch.case) {
                return Some(outcome);
            }
            if allow_early_completion && !self.watch.linger && self.state.is_satisfied() {
                return Some(self.state.verdict());
            }
        }
        None
    }

    fn on_host_exit(&self, exit: HostExit) -> MonitorOutcome {
        if exit.is_success() && self.state.expectations_met() {
            self.state.verdict()
        } else {
            MonitorOutcome::HostGone {
                exit,
                expectations_met: self.state.expectations_met(),
                forbidden_seen: !self.state.forbidden_lines.is_empty(),
            }
        }
    }
}

#[derive(Debug)]
struct MatchState {
    expected: Vec<String>,
    observed: Vec<bool>,
    forbidden: Vec<String>,
    halt_on_forbidden: bool,
    forbidden_lines: Vec<String>,
    marker_success: bool,
    marker_output: Vec<String>,
    lines: Vec<String>,
}

impl MatchState {
    fn new(case: &TestCase) -> Self {
        Self {
            expected: case.expected_lines.clone(),
            observed: vec![false; case.expected_lines.len()],
            forbidden: case.forbidden_lines.clone(),
            halt_on_forbidden: case.halt_on_forbidden,
            forbidden_lines: Vec::new(),
            marker_success: false,
            marker_output: Vec::new(),
            lines: Vec::new(),
        }
    }

    fn process_line(&mut self, line: String, case: &TestCase) -> Option<MonitorOutcome> {
        let mut outcome = None;

        if let Some(marker) = ResultMarker::find(&line) {
            if marker.name == case.script_stem() || marker.name == case.id {
                if let Some(output) = marker.output {
                    self.marker_output.push(output);
                }
                if marker.success {
                    self.marker_success = true;
                } else {
                    outcome = Some(MonitorOutcome::Failed {
                        reason: MARKER_FAILURE_REASON.to_owned(),
                    });
                }
            }
        }

        if self.forbidden.iter().any(|f| line.contains(f.as_str())) {
            // A line that matches both sets counts only as forbidden.
            self.forbidden_lines.push(line.clone());
            if self.halt_on_forbidden {
                outcome = Some(MonitorOutcome::Failed {
                    reason: FORBIDDEN_LINE_REASON.to_owned(),
                });
            }
        } else {
            for (expected, observed) in self.expected.iter().zip(&mut self.observed) {
                if !*observed && line.contains(expected.as_str()) {
                    *observed = true;
                }
            }
        }

        self.lines.push(line);
        outcome
    }

    fn expectations_met(&self) -> bool {
        self.observed.iter().all(|&seen| seen)
    }

    /// Returns true if the case can be considered complete without waiting for the host.
    ///
    /// With no expected lines, only a success marker completes a case early.
    fn is_satisfied(&self) -> bool {
        if self.expected.is_empty() {
            self.marker_success
        } else {
            self.expectations_met()
        }
    }

    fn verdict(&self) -> MonitorOutcome {
        if self.forbidden_lines.is_empty() {
            MonitorOutcome::Completed
        } else {
            MonitorOutcome::Failed {
                reason: FORBIDDEN_LINE_REASON.to_owned(),
            }
        }
    }
}

/// A structured result printed by a host: `JSON_START({"name": ..., "success": ...})JSON_END`.
#[derive(Debug, PartialEq, Eq)]
struct ResultMarker {
    name: String,
    success: bool,
    output: Option<String>,
}

impl ResultMarker {
    fn find(line: &str) -> Option<Self> {
        let start = line.find(MARKER_START)? + MARKER_START.len();
        let len = line[start..].find(MARKER_END)?;
        let json = &line[start..start + len];

        #[derive(Deserialize)]
        struct Raw {
            name: String,
            #[serde(default)]
            success: serde_json::Value,
            #[serde(default)]
            output: Option<String>,
        }

        match serde_json::from_str::<Raw>(json) {
            Ok(raw) => Some(Self {
                name: raw.name,
                success: is_truthy(&raw.success),
                output: raw.output,
            }),
            Err(error) => {
                warn!("ignoring malformed result marker: {error}");
                None
            }
        }
    }
}

/// Hosts don't agree on how to spell "true", so accept anything non-empty.
fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}
