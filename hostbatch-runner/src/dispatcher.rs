// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running one batch inside one worker.
//!
//! The dispatcher is a small state machine:
//!
//! ```text
//! Idle -> Launching -> Ready -> CaseRunning -> Ready -> ... -> Draining
//! ```
//!
//! `Batched` batches go through `Launching` once. `Shared` and `Isolated` batches launch a fresh
//! host for every case. Everything runs on one task: there is never more than one case running per
//! dispatcher.

use crate::{
    cancel::CancelReceiver,
    config::{HostSettings, HostbatchConfig},
    errors::{DisplayErrorChain, ResultSinkError},
    helpers::{sanitize_path_component, tail_lines},
    host::{HostExit, HostHandle, HostLauncher, HostProbe, LaunchRequest},
    log_monitor::{CaseWatch, LogMonitor, LogTail, MonitorOutcome},
    plan::Batch,
    registry::TestCase,
    result_parser::{BATCH_DEADLINE_REASON, CaseTiming, ResultParser},
    stopwatch::stopwatch,
};
use camino::{Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobSetBuilder};
use hostbatch_metadata::{CaseOutcome, CaseResult, HostKind};
use serde::{Deserialize, Serialize};
use std::{
    future::Future,
    time::{Duration, Instant, SystemTime},
};
use tracing::{debug, info, warn};

/// Reason given to cases that never ran because the host could not be started.
pub const LAUNCH_FAILED_REASON: &str = "host launch failed";
/// Reason given to cases that never ran because the host died.
pub const HOST_DIED_REASON: &str = "host died before execution";
/// Reason given to cases that never ran because the host exited cleanly, or with the failure
/// code, before reaching them.
pub const HOST_EXITED_REASON: &str = "host exited before execution";
/// Reason given to cases that never started because the run was cancelled.
pub const CANCELLED_BEFORE_START_REASON: &str = "cancelled before start";

/// Everything a dispatcher needs to know, passed by value into worker processes.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Settings for the batch's host kind.
    pub host: HostSettings,
    /// How long a host gets to exit after being asked to.
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    /// How often the host log is polled.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// The number of log lines kept as evidence.
    pub excerpt_lines: usize,
    /// The exit code that means "test failed".
    pub fail_exit_code: i32,
    /// Where logs and artefacts are written.
    pub store_dir: Utf8PathBuf,
    /// The working directory for hosts.
    pub working_dir: Utf8PathBuf,
    /// The attempt number, starting at 1.
    pub attempt: u32,
}

impl DispatchSettings {
    /// Builds the settings for running a batch of `kind` hosts.
    pub fn new(config: &HostbatchConfig, kind: HostKind, attempt: u32) -> Self {
        let run = config.run();
        Self {
            host: config.host(kind),
            grace_period: run.grace_period,
            poll_interval: run.poll_interval,
            excerpt_lines: run.excerpt_lines,
            fail_exit_code: run.fail_exit_code,
            store_dir: config.store_dir(),
            working_dir: config.workspace_root().to_owned(),
            attempt,
        }
    }
}

/// Where a dispatcher sends results, one at a time, as soon as each case is decided.
pub trait ResultSink {
    /// Submits a result. May wait if the receiver is busy.
    fn submit(
        &mut self,
        result: CaseResult,
    ) -> impl Future<Output = Result<(), ResultSinkError>> + Send;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DispatchState {
    Idle,
    Launching,
    Ready,
    CaseRunning,
    Draining,
}

/// Runs batches. One dispatcher can run any number of batches of the same host kind, one after
/// the other.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    settings: DispatchSettings,
    launcher: HostLauncher,
    parser: ResultParser,
}

impl Dispatcher {
    /// Creates a dispatcher for hosts of `kind`.
    pub fn new(kind: HostKind, settings: DispatchSettings) -> Self {
        let launcher = HostLauncher::new(kind, settings.host.clone(), &settings.working_dir);
        let parser = ResultParser::new(settings.fail_exit_code, settings.excerpt_lines);
        Self {
            settings,
            launcher,
            parser,
        }
    }

    /// Runs every case of `batch` and submits exactly one result per case to `sink`, in planned
    /// order.
    ///
    /// Only a failing sink ends a batch early with an error.
    pub async fn run_batch(
        &self,
        batch: &Batch,
        cancel: &mut CancelReceiver,
        sink: &mut impl ResultSink,
    ) -> Result<(), ResultSinkError> {
        let mut run = BatchRun {
            dispatcher: self,
            batch,
            sink,
            state: DispatchState::Idle,
            deadline: Instant::now().checked_add(batch.deadline),
            next: 0,
            last_excerpt: String::new(),
        };

        info!(
            "batch {}: running {} {} in {} host ({})",
            batch.id,
            batch.cases.len(),
            crate::helpers::plural::cases_str(batch.cases.len()),
            batch.profile.kind,
            batch.isolation,
        );
        let stopwatch = stopwatch();
        run.run(cancel).await?;
        info!(
            "batch {}: finished in {}",
            batch.id,
            crate::helpers::FormattedDuration(stopwatch.snapshot().duration)
        );
        Ok(())
    }

    fn log_dir(&self, batch: &Batch) -> Utf8PathBuf {
        self.settings
            .store_dir
            .join("logs")
            .join(&batch.id)
            .join(format!("attempt-{}", self.settings.attempt))
    }

    fn artefact_dir(&self, case_id: &str) -> Utf8PathBuf {
        self.settings
            .store_dir
            .join("artefacts")
            .join(sanitize_path_component(case_id))
    }
}

/// The state of one batch being run.
struct BatchRun<'a, S> {
    dispatcher: &'a Dispatcher,
    batch: &'a Batch,
    sink: &'a mut S,
    state: DispatchState,
    /// `None` if the batch deadline is too far away to represent.
    deadline: Option<Instant>,
    /// The index of the next case that has no result yet.
    next: usize,
    /// The end of the log of the last host lifetime, used as evidence for cases that never ran.
    last_excerpt: String,
}

impl<S: ResultSink> BatchRun<'_, S> {
    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn transition(&mut self, to: DispatchState) {
        debug!("batch {}: {:?} -> {to:?}", self.batch.id, self.state);
        self.state = to;
    }

    async fn run(&mut self, cancel: &mut CancelReceiver) -> Result<(), ResultSinkError> {
        let lifetime_len = if self.batch.host_per_case() {
            1
        } else {
            self.batch.cases.len()
        };

        let mut lifetime = 0;
        while self.next < self.batch.cases.len() {
            if cancel.is_cancelled() {
                self.finish_remaining(CaseOutcome::Skipped, CANCELLED_BEFORE_START_REASON, "")
                    .await?;
                break;
            }
            if self.deadline_passed() {
                let evidence = std::mem::take(&mut self.last_excerpt);
                self.finish_remaining(CaseOutcome::Unknown, BATCH_DEADLINE_REASON, &evidence)
                    .await?;
                break;
            }

            let end = (self.next + lifetime_len).min(self.batch.cases.len());
            let keep_going = self.run_host_lifetime(lifetime, end, cancel).await?;
            lifetime += 1;
            if !keep_going {
                break;
            }
        }

        self.transition(DispatchState::Draining);
        Ok(())
    }

    /// Runs cases `self.next..end` in one host lifetime. Returns false if the rest of the batch
    /// has been decided.
    async fn run_host_lifetime(
        &mut self,
        lifetime: usize,
        end: usize,
        cancel: &mut CancelReceiver,
    ) -> Result<bool, ResultSinkError> {
        let dispatcher = self.dispatcher;
        let settings = &dispatcher.settings;
        let log_dir = dispatcher.log_dir(self.batch);
        let log_path = log_dir.join(format!("host-{lifetime}.log"));
        let output_path = log_dir.join(format!("host-{lifetime}.out"));

        self.transition(DispatchState::Launching);
        let req = LaunchRequest {
            profile: &self.batch.profile,
            cases: &self.batch.cases[self.next..end],
            log_path: &log_path,
            output_path: &output_path,
            batch_id: &self.batch.id,
            attempt: settings.attempt,
        };
        let mut host = match dispatcher.launcher.launch(&req) {
            Ok(host) => host,
            Err(error) => {
                warn!("batch {}: {}", self.batch.id, DisplayErrorChain::new(&error));
                let evidence = DisplayErrorChain::new(&error).to_string();
                self.finish_remaining(CaseOutcome::Unknown, LAUNCH_FAILED_REASON, &evidence)
                    .await?;
                return Ok(false);
            }
        };
        let mut tail = LogTail::new(&log_path, settings.excerpt_lines);

        let keep_going = self
            .run_cases(&mut host, &mut tail, end, cancel)
            .await?;

        // Make sure nothing from this host outlives its lifetime.
        host.terminate(settings.grace_period).await;
        self.last_excerpt = self.excerpt(&mut tail);
        let run = host.host_run();
        debug!(
            "batch {}: host lifetime {lifetime} (pid {}) ended with exit code {:?}, log at {}",
            self.batch.id, run.host_pid, run.exit_code, run.log_path
        );
        Ok(keep_going)
    }

    async fn run_cases(
        &mut self,
        host: &mut HostHandle,
        tail: &mut LogTail,
        end: usize,
        cancel: &mut CancelReceiver,
    ) -> Result<bool, ResultSinkError> {
        let dispatcher = self.dispatcher;
        let batch = self.batch;
        let settings = &dispatcher.settings;
        let first = self.next;

        while self.next < end {
            self.transition(DispatchState::Ready);

            if cancel.is_cancelled() {
                self.finish_remaining(CaseOutcome::Skipped, CANCELLED_BEFORE_START_REASON, "")
                    .await?;
                return Ok(false);
            }
            if self.deadline_passed() {
                let evidence = self.excerpt(tail);
                self.finish_remaining(CaseOutcome::Unknown, BATCH_DEADLINE_REASON, &evidence)
                    .await?;
                return Ok(false);
            }
            if self.next > first {
                if let Some(exit) = host.try_exit() {
                    self.finish_host_gone(exit, tail, end).await?;
                    return Ok(true);
                }
            }

            let case = &batch.cases[self.next];
            self.transition(DispatchState::CaseRunning);
            debug!("batch {}: starting case `{}`", self.batch.id, case.id);

            let case_stopwatch = stopwatch();
            let case_started = SystemTime::now();
            let watch = CaseWatch {
                case,
                case_deadline: case_stopwatch.instant().checked_add(case.timeout),
                batch_deadline: self.deadline,
                linger: self.next + 1 == end,
            };
            let window = LogMonitor::new(tail, watch, settings.poll_interval)
                .run(host, cancel)
                .await;
            let snapshot = case_stopwatch.snapshot();

            let mut result = dispatcher.parser.parse(
                case,
                &window,
                tail.recent_lines(),
                CaseTiming {
                    started_at: snapshot.start_time,
                    duration: snapshot.duration,
                },
            );
            if result.outcome == CaseOutcome::Crash {
                self.collect_crash_artefacts(host, &mut result);
            }
            self.collect_glob_artefacts(case, case_started, &mut result);
            self.publish(result).await?;

            match window.outcome {
                MonitorOutcome::Completed
                | MonitorOutcome::Failed { .. }
                | MonitorOutcome::Timeout {
                    batch_deadline: false,
                } => {}
                MonitorOutcome::Timeout {
                    batch_deadline: true,
                } => {
                    warn!("batch {}: deadline exceeded, killing host", self.batch.id);
                    host.kill().await;
                    let evidence = self.excerpt(tail);
                    self.finish_remaining(CaseOutcome::Unknown, BATCH_DEADLINE_REASON, &evidence)
                        .await?;
                    return Ok(false);
                }
                MonitorOutcome::HostGone { exit, .. } => {
                    self.finish_host_gone(exit, tail, end).await?;
                    return Ok(true);
                }
                MonitorOutcome::Cancelled => {
                    host.terminate(settings.grace_period).await;
                    self.finish_remaining(CaseOutcome::Skipped, CANCELLED_BEFORE_START_REASON, "")
                        .await?;
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    /// Decides the cases of this host lifetime that the host never reached.
    async fn finish_host_gone(
        &mut self,
        exit: HostExit,
        tail: &mut LogTail,
        end: usize,
    ) -> Result<(), ResultSinkError> {
        let clean = exit.is_success() || exit.code() == Some(self.dispatcher.settings.fail_exit_code);
        let reason = if clean {
            HOST_EXITED_REASON
        } else {
            HOST_DIED_REASON
        };
        let evidence = self.excerpt(tail);
        if self.next < end {
            debug!(
                "batch {}: host gone ({exit:?}), {} {} left in this host lifetime",
                self.batch.id,
                end - self.next,
                crate::helpers::plural::cases_str(end - self.next),
            );
        }
        while self.next < end {
            let case_id = self.batch.cases[self.next].id.clone();
            self.publish(CaseResult::not_started(
                case_id,
                CaseOutcome::Unknown,
                reason,
                evidence.clone(),
            ))
            .await?;
        }
        Ok(())
    }

    /// Reads whatever is left in the log and returns its last lines.
    fn excerpt(&self, tail: &mut LogTail) -> String {
        tail.poll();
        tail.flush_partial();
        tail_lines(tail.recent_lines(), self.dispatcher.settings.excerpt_lines)
    }

    /// Decides every case in the batch that has no result yet.
    async fn finish_remaining(
        &mut self,
        outcome: CaseOutcome,
        reason: &str,
        evidence: &str,
    ) -> Result<(), ResultSinkError> {
        while self.next < self.batch.cases.len() {
            let case_id = self.batch.cases[self.next].id.clone();
            self.publish(CaseResult::not_started(case_id, outcome, reason, evidence))
                .await?;
        }
        Ok(())
    }

    /// Writes the excerpt artefact for the next case, then submits its result.
    async fn publish(&mut self, mut result: CaseResult) -> Result<(), ResultSinkError> {
        debug_assert_eq!(result.case_id, self.batch.cases[self.next].id);
        if !result.log_excerpt.is_empty() {
            let dir = self.dispatcher.artefact_dir(&result.case_id);
            let path = dir.join(format!("attempt-{}.log", self.dispatcher.settings.attempt));
            match std::fs::create_dir_all(&dir).and_then(|()| std::fs::write(&path, &result.log_excerpt)) {
                Ok(()) => result.artefacts.insert(0, path),
                Err(error) => warn!("failed to write log excerpt to {path}: {error}"),
            }
        }

        debug!(
            "batch {}: case `{}` is {}",
            self.batch.id, result.case_id, result.outcome
        );
        self.next += 1;
        self.sink.submit(result).await
    }

    fn collect_crash_artefacts(&self, host: &HostHandle, result: &mut CaseResult) {
        let settings = &self.dispatcher.settings;
        let dir = self.dispatcher.artefact_dir(&result.case_id);
        let prefix = format!("attempt-{}", settings.attempt);

        copy_artefact(
            host.output_path(),
            &dir.join(format!("{prefix}-host-output.log")),
            result,
        );

        if let Some(crash_log) = &settings.host.crash_log {
            let crash_log = self.dispatcher.launcher.working_dir().join(crash_log);
            if crash_log.exists() {
                let name = crash_log.file_name().unwrap_or("crash.log");
                copy_artefact(&crash_log, &dir.join(format!("{prefix}-{name}")), result);
            } else {
                warn!(
                    "case `{}` crashed, but the crash log {crash_log} does not exist",
                    result.case_id
                );
            }
        }
    }

    fn collect_glob_artefacts(&self, case: &TestCase, since: SystemTime, result: &mut CaseResult) {
        if case.artefact_globs.is_empty() {
            return;
        }
        let root = self.dispatcher.launcher.working_dir();
        let dir = self
            .dispatcher
            .artefact_dir(&case.id)
            .join(format!("attempt-{}", self.dispatcher.settings.attempt));

        let mut builder = GlobSetBuilder::new();
        let mut walk_roots = Vec::new();
        for pattern in &case.artefact_globs {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                    walk_roots.push(root.join(literal_prefix(pattern)));
                }
                Err(error) => warn!("case `{}`: ignoring artefact glob: {error}", case.id),
            }
        }
        let globs = match builder.build() {
            Ok(globs) => globs,
            Err(error) => {
                warn!("case `{}`: ignoring artefact globs: {error}", case.id);
                return;
            }
        };

        walk_roots.sort();
        walk_roots.dedup();
        let mut seen = Vec::new();
        for walk_root in walk_roots {
            for entry in walkdir::WalkDir::new(&walk_root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(path) = Utf8PathBuf::try_from(entry.into_path()) else {
                    continue;
                };
                let Ok(relative) = path.strip_prefix(root) else {
                    continue;
                };
                if !globs.is_match(relative) || seen.contains(&path) {
                    continue;
                }
                let modified = std::fs::metadata(&path).and_then(|m| m.modified());
                if !modified.is_ok_and(|modified| modified >= since) {
                    continue;
                }
                let Some(name) = path.file_name() else {
                    continue;
                };
                copy_artefact(&path, &dir.join(name), result);
                seen.push(path);
            }
        }
    }
}

fn copy_artefact(from: &Utf8Path, to: &Utf8Path, result: &mut CaseResult) {
    let copied = to
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| std::fs::copy(from, to));
    match copied {
        Ok(_) => result.artefacts.push(to.to_owned()),
        Err(error) => warn!("failed to copy artefact {from} to {to}: {error}"),
    }
}

/// Returns the leading components of a glob pattern that contain no glob syntax.
fn literal_prefix(pattern: &str) -> Utf8PathBuf {
    let pattern = Utf8Path::new(pattern);
    let prefix: Utf8PathBuf = pattern
        .components()
        .take_while(|c| !c.as_str().contains(['*', '?', '[', '{']))
        .collect();
    if prefix == pattern {
        // A literal file: walk its directory.
        prefix.parent().map(Utf8Path::to_owned).unwrap_or_default()
    } else {
        prefix
    }
}


#[cfg(all(test, unix))]
mod unix_tests {
    use super::*;
    use crate::{
        cancel::cancel_pair,
        plan::{BatchPlanner, PlannerOptions},
        registry::TestRegistry,
        test_helpers::fake_host,
    };
    use camino_tempfile::Utf8TempDir;
    use hostbatch_metadata::{Isolation, TestCaseDescriptor};
    use pretty_assertions::assert_eq;
    use std::num::NonZeroUsize;

    #[derive(Default)]
    struct CollectSink(Vec<CaseResult>);

    impl ResultSink for CollectSink {
        async fn submit(&mut self, result: CaseResult) -> Result<(), ResultSinkError> {
            self.0.push(result);
            Ok(())
        }
    }

    fn settings(dir: &Utf8TempDir, host: HostSettings) -> DispatchSettings {
        DispatchSettings {
            host,
            grace_period: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
            excerpt_lines: 50,
            fail_exit_code: 15,
            store_dir: dir.path().join("store"),
            working_dir: dir.path().to_owned(),
            attempt: 1,
        }
    }

    fn single_batch(registry: &TestRegistry) -> Batch {
        let plan = BatchPlanner::new(PlannerOptions {
            max_batch_size: NonZeroUsize::new(8).unwrap(),
            slack: Duration::from_secs(30),
            no_batch: false,
        })
        .plan(registry);
        assert_eq!(plan.len(), 1, "expected one batch");
        plan.into_batches().remove(0)
    }

    async fn run(
        dir: &Utf8TempDir,
        host: HostSettings,
        batch: &Batch,
        cancel: &mut CancelReceiver,
    ) -> Vec<CaseResult> {
        let dispatcher = Dispatcher::new(HostKind::Generic, settings(dir, host));
        let mut sink = CollectSink::default();
        dispatcher.run_batch(batch, cancel, &mut sink).await.unwrap();
        sink.0
    }

    fn summary(results: &[CaseResult]) -> Vec<(&str, CaseOutcome, Option<&str>)> {
        results
            .iter()
            .map(|r| (r.case_id.as_str(), r.outcome, r.reason.as_deref()))
            .collect()
    }

    fn host_logs(dir: &Utf8TempDir, batch: &Batch) -> Vec<String> {
        let mut logs: Vec<String> =
            std::fs::read_dir(dir.path().join("store/logs").join(&batch.id).join("attempt-1"))
                .unwrap()
                .map(|e| e.unwrap().file_name().into_string().unwrap())
                .filter(|name| name.ends_with(".log"))
                .collect();
        logs.sort();
        logs
    }

    fn cases(dir: &Utf8TempDir, specs: &[(&str, &str)]) -> Vec<TestCaseDescriptor> {
        specs
            .iter()
            .map(|(id, body)| fake_host::case(dir.path(), id, body))
            .collect()
    }

    #[tokio::test]
    async fn batched_cases_share_one_host() {
        let dir = camino_tempfile::tempdir().unwrap();
        let registry = fake_host::registry(
            dir.path(),
            cases(&dir, &[("first", fake_host::pass("first").as_str()), ("second", fake_host::pass("second").as_str())]),
        );
        let batch = single_batch(&registry);
        let results = run(&dir, fake_host::settings(), &batch, &mut CancelReceiver::never()).await;

        assert_eq!(
            summary(&results),
            [
                ("first", CaseOutcome::Pass, None),
                ("second", CaseOutcome::Pass, None)
            ]
        );
        assert_eq!(host_logs(&dir, &batch), ["host-0.log"], "host launched once");
        assert_eq!(results[0].log_excerpt, "first DONE");
        assert_eq!(
            results[0].artefacts,
            [dir.path().join("store/artefacts/first/attempt-1.log")]
        );
        assert!(results[0].artefacts[0].exists());
    }

    #[tokio::test]
    async fn crash_mid_batch() {
        let dir = camino_tempfile::tempdir().unwrap();
        let registry = fake_host::registry(
            dir.path(),
            cases(
                &dir,
                &[
                    ("one", fake_host::pass("one").as_str()),
                    ("two", "echo 'two starting' >> \"$HOSTBATCH_LOG_PATH\"\nexit 255\n"),
                    ("three", fake_host::pass("three").as_str()),
                ],
            ),
        );
        let batch = single_batch(&registry);
        let results = run(&dir, fake_host::settings(), &batch, &mut CancelReceiver::never()).await;

        assert_eq!(
            summary(&results),
            [
                ("one", CaseOutcome::Pass, None),
                (
                    "two",
                    CaseOutcome::Crash,
                    Some("host crashed: exited with code 255 (0xFF)")
                ),
                ("three", CaseOutcome::Unknown, Some("host died before execution")),
            ]
        );
        assert_eq!(results[1].log_excerpt, "two starting");
        assert!(
            results[1]
                .artefacts
                .iter()
                .any(|a| a.as_str().ends_with("attempt-1-host-output.log")),
            "host output is kept on crash: {:?}",
            results[1].artefacts
        );
        assert_eq!(results[2].started_at, None);
    }

    #[tokio::test]
    async fn fail_exit_code_is_a_failure() {
        let dir = camino_tempfile::tempdir().unwrap();
        let registry = fake_host::registry(
            dir.path(),
            cases(&dir, &[("one", "exit 15\n"), ("two", fake_host::pass("two").as_str())]),
        );
        let batch = single_batch(&registry);
        let results = run(&dir, fake_host::settings(), &batch, &mut CancelReceiver::never()).await;

        assert_eq!(
            summary(&results),
            [
                ("one", CaseOutcome::Fail, Some("host reported test failure")),
                ("two", CaseOutcome::Unknown, Some("host exited before execution")),
            ]
        );
    }

    #[tokio::test]
    async fn launch_failure_marks_every_case_unknown() {
        let dir = camino_tempfile::tempdir().unwrap();
        let registry = fake_host::registry(
            dir.path(),
            cases(&dir, &[("one", ""), ("two", "")]),
        );
        let batch = single_batch(&registry);
        let host = HostSettings {
            program: Some(dir.path().join("no-such-host").into_string()),
            ..Default::default()
        };
        let results = run(&dir, host, &batch, &mut CancelReceiver::never()).await;

        assert_eq!(
            summary(&results),
            [
                ("one", CaseOutcome::Unknown, Some("host launch failed")),
                ("two", CaseOutcome::Unknown, Some("host launch failed")),
            ]
        );
        assert!(
            results[0].log_excerpt.starts_with("failed to spawn host"),
            "excerpt: {}",
            results[0].log_excerpt
        );
    }

    #[tokio::test]
    async fn host_per_case_batches_restart_the_host() {
        let dir = camino_tempfile::tempdir().unwrap();
        let registry = fake_host::registry(
            dir.path(),
            cases(&dir, &[("one", fake_host::pass("one").as_str()), ("two", fake_host::pass("two").as_str())]),
        );
        let mut batch = single_batch(&registry);
        batch.isolation = Isolation::Shared;
        assert!(batch.host_per_case());
        let results = run(&dir, fake_host::settings(), &batch, &mut CancelReceiver::never()).await;

        assert_eq!(
            summary(&results),
            [("one", CaseOutcome::Pass, None), ("two", CaseOutcome::Pass, None)]
        );
        assert_eq!(host_logs(&dir, &batch), ["host-0.log", "host-1.log"]);
    }

    #[tokio::test]
    async fn quiet_case_passes_on_host_exit() {
        let dir = camino_tempfile::tempdir().unwrap();
        let mut descriptors = cases(&dir, &[("quiet", "echo 'no markers here' >> \"$HOSTBATCH_LOG_PATH\"\n")]);
        descriptors[0].expected_lines.clear();
        let registry = fake_host::registry(dir.path(), descriptors);
        let batch = single_batch(&registry);
        let results = run(&dir, fake_host::settings(), &batch, &mut CancelReceiver::never()).await;

        assert_eq!(summary(&results), [("quiet", CaseOutcome::Pass, None)]);
        assert!(results[0].duration < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn batch_deadline_blames_in_flight_case_as_unknown() {
        let dir = camino_tempfile::tempdir().unwrap();
        let registry = fake_host::registry(
            dir.path(),
            cases(
                &dir,
                &[
                    ("stuck", "echo 'stuck starting' >> \"$HOSTBATCH_LOG_PATH\"\nsleep 30\n"),
                    ("after", fake_host::pass("after").as_str()),
                ],
            ),
        );
        let mut batch = single_batch(&registry);
        batch.deadline = Duration::from_millis(300);
        let results = run(&dir, fake_host::settings(), &batch, &mut CancelReceiver::never()).await;

        assert_eq!(
            summary(&results),
            [
                ("stuck", CaseOutcome::Unknown, Some("batch deadline exceeded")),
                ("after", CaseOutcome::Unknown, Some("batch deadline exceeded")),
            ]
        );
        for result in &results {
            assert!(
                result.log_excerpt.contains("stuck starting"),
                "`{}` keeps the log as evidence: {:?}",
                result.case_id,
                result.log_excerpt
            );
        }
    }

    #[tokio::test]
    async fn huge_timeouts_mean_no_deadline() {
        let dir = camino_tempfile::tempdir().unwrap();
        let mut descriptors = cases(&dir, &[("patient", fake_host::pass("patient").as_str())]);
        descriptors[0].timeout_s = Some(u64::MAX);
        let registry = fake_host::registry(dir.path(), descriptors);
        let batch = single_batch(&registry);
        assert_eq!(batch.deadline, Duration::MAX);
        let results = run(&dir, fake_host::settings(), &batch, &mut CancelReceiver::never()).await;

        assert_eq!(summary(&results), [("patient", CaseOutcome::Pass, None)]);
    }

    #[tokio::test]
    async fn case_timeout_keeps_the_batch_going() {
        let dir = camino_tempfile::tempdir().unwrap();
        let mut descriptors = cases(&dir, &[("slow", "sleep 2\n"), ("quick", fake_host::pass("quick").as_str())]);
        descriptors[0].timeout_s = Some(1);
        let registry = fake_host::registry(dir.path(), descriptors);
        let batch = single_batch(&registry);
        let results = run(&dir, fake_host::settings(), &batch, &mut CancelReceiver::never()).await;

        assert_eq!(
            summary(&results),
            [
                ("slow", CaseOutcome::Timeout, Some("timed out after 1s")),
                ("quick", CaseOutcome::Pass, None),
            ]
        );
        assert!(results[0].duration >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cancellation_skips_cases_not_started() {
        let dir = camino_tempfile::tempdir().unwrap();
        let registry = fake_host::registry(
            dir.path(),
            cases(&dir, &[("running", "sleep 30\n"), ("waiting", fake_host::pass("waiting").as_str())]),
        );
        let batch = single_batch(&registry);
        let (handle, mut cancel) = cancel_pair();

        let (results, ()) = tokio::join!(
            run(&dir, fake_host::settings(), &batch, &mut cancel),
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                handle.cancel();
            }
        );

        assert_eq!(
            summary(&results),
            [
                ("running", CaseOutcome::Unknown, Some("cancelled")),
                ("waiting", CaseOutcome::Skipped, Some("cancelled before start")),
            ]
        );
    }

    #[tokio::test]
    async fn glob_artefacts_are_collected() {
        let dir = camino_tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("screenshots")).unwrap();
        std::fs::write(dir.path().join("screenshots/old.txt"), "stale").unwrap();

        let mut descriptors = cases(
            &dir,
            &[(
                "shot",
                "sleep 0.2\necho pixels > screenshots/shot.png\necho 'DONE' >> \"$HOSTBATCH_LOG_PATH\"\n",
            )],
        );
        descriptors[0].artefact_globs = vec!["screenshots/*.png".to_owned(), "screenshots/*.txt".to_owned()];
        let registry = fake_host::registry(dir.path(), descriptors);
        let batch = single_batch(&registry);
        let results = run(&dir, fake_host::settings(), &batch, &mut CancelReceiver::never()).await;

        assert_eq!(results[0].outcome, CaseOutcome::Pass);
        let copied = dir.path().join("store/artefacts/shot/attempt-1/shot.png");
        assert!(results[0].artefacts.contains(&copied), "{:?}", results[0].artefacts);
        assert!(
            !results[0]
                .artefacts
                .iter()
                .any(|a| a.as_str().ends_with("old.txt")),
            "files older than the case are not artefacts"
        );
    }
}
