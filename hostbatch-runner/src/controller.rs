// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Driving a whole run.
//!
//! A [`Controller`] is created once per session. It owns the configuration and hands references
//! to it down the pipeline: registry, planner, worker pool, retry controller and reporter.

use crate::{
    cancel::{CancelReceiver, cancel_pair},
    config::HostbatchConfig,
    dispatcher::DispatchSettings,
    errors::{RegistryError, RunError},
    helpers::plural,
    plan::{BatchPlan, BatchPlanner, PlannerOptions},
    registry::{CaseDefaults, TestRegistry},
    reporter::{CodeOwners, JunitWriter, ReportDisplayer, RerunHints, RunReport},
    retry::{RetryController, RunPipeline},
    signal::SignalHandlerKind,
    stopwatch::stopwatch,
    worker::{WorkerPool, WorkerSpawner},
};
use camino::Utf8PathBuf;
use hostbatch_metadata::{CaseResult, HostbatchExitCode};
use std::{io::Write, time::Duration};
use tracing::{debug, info, warn};

/// The name of the rerun hints file in the store directory.
pub const RERUN_HINTS_FILE: &str = "rerun-hints.txt";

/// Which cases of the loaded suites to run.
///
/// Both filters apply: a case must match each filter that is not empty.
#[derive(Clone, Debug, Default)]
pub struct CaseSelection {
    /// External case ids, as in `--test-case-ids`.
    pub test_case_ids: Vec<String>,
    /// Case ids, as in `--case`.
    pub case_ids: Vec<String>,
}

impl CaseSelection {
    /// Returns the selected part of `registry`.
    pub fn apply(&self, registry: &TestRegistry) -> TestRegistry {
        let mut selected = registry.clone();
        if !self.test_case_ids.is_empty() {
            selected = selected.filter_by_external_ids(&self.test_case_ids);
        }
        if !self.case_ids.is_empty() {
            selected = selected.filter_by_case_ids(self.case_ids.iter().map(String::as_str));
        }
        selected
    }
}

/// What a finished run produced.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// One result per selected case.
    pub report: RunReport,
    /// The hints that were printed for cases that did not pass.
    pub rerun_hints: RerunHints,
    /// True if the run was cancelled by a signal.
    pub cancelled: bool,
    /// How long the run took.
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Returns the exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            HostbatchExitCode::INTERRUPTED
        } else if self.report.stats().is_success() {
            HostbatchExitCode::OK
        } else {
            HostbatchExitCode::TESTS_FAILED
        }
    }
}

/// Runs cases from start to finish.
#[derive(Clone, Debug)]
pub struct Controller {
    config: HostbatchConfig,
    spawner: WorkerSpawner,
    signal_handler: SignalHandlerKind,
    displayer: ReportDisplayer,
}

impl Controller {
    /// Creates a controller.
    pub fn new(
        config: HostbatchConfig,
        spawner: WorkerSpawner,
        signal_handler: SignalHandlerKind,
        displayer: ReportDisplayer,
    ) -> Self {
        Self {
            config,
            spawner,
            signal_handler,
            displayer,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &HostbatchConfig {
        &self.config
    }

    /// Loads the suites at `paths` and applies `selection`.
    pub fn load(
        &self,
        paths: &[Utf8PathBuf],
        selection: &CaseSelection,
    ) -> Result<TestRegistry, RegistryError> {
        let run = self.config.run();
        let defaults = CaseDefaults {
            timeout: run.default_timeout,
            halt_on_forbidden: run.halt_on_unexpected,
        };
        let registry = TestRegistry::load_paths(paths, &defaults)?;
        let selected = selection.apply(&registry);
        debug!(
            "selected {} of {} {}",
            selected.len(),
            registry.len(),
            plural::cases_str(registry.len()),
        );
        Ok(selected)
    }

    /// Returns the planner configured for this run.
    pub fn planner(&self) -> BatchPlanner {
        let run = self.config.run();
        BatchPlanner::new(PlannerOptions {
            max_batch_size: run.batch_size,
            slack: run.batch_slack,
            no_batch: run.no_batch,
        })
    }

    /// Runs every case in `registry`, retrying inconclusive ones, and writes progress and the
    /// final summary to `writer`. The JUnit report and rerun hints are written to the store
    /// directory.
    pub fn execute(
        &self,
        registry: &TestRegistry,
        writer: &mut dyn Write,
    ) -> Result<RunOutcome, RunError> {
        let code_owners = self
            .config
            .codeowners_path()
            .map(|path| CodeOwners::from_path(&path))
            .transpose()?;

        let stopwatch = stopwatch();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(RunError::Runtime)?;

        info!(
            "starting run of {} {}",
            registry.len(),
            plural::cases_str(registry.len())
        );
        let (results, cancelled) = runtime.block_on(async {
            let mut signals = self.signal_handler.build()?;
            let (cancel_handle, cancel) = cancel_pair();
            let signal_task = tokio::spawn(async move {
                while let Some(event) = signals.recv().await {
                    warn!("received {}, cancelling run", event.name());
                    cancel_handle.cancel();
                }
            });

            let mut pipeline = PoolPipeline {
                config: &self.config,
                spawner: &self.spawner,
                displayer: &self.displayer,
                cancel: &cancel,
                writer: &mut *writer,
            };
            let retry = RetryController::new(self.planner(), self.config.run().retries);
            let results = retry.run(&mut pipeline, registry, &cancel).await;

            signal_task.abort();
            Ok::<_, RunError>((results, cancel.is_cancelled()))
        })?;
        // Give up on anything still holding the runtime, such as a host being reaped.
        runtime.shutdown_timeout(self.config.run().grace_period);

        let mut report = RunReport::new(registry);
        for result in results {
            report.insert(result);
        }
        report.finalize();
        let snapshot = stopwatch.snapshot();

        self.displayer
            .write_summary(&report, snapshot.duration, cancelled, writer)
            .map_err(RunError::Output)?;

        let rerun_hints = RerunHints::new(&report, &self.config, code_owners.as_ref());
        self.displayer
            .write_rerun_hints(&rerun_hints, writer)
            .map_err(RunError::Output)?;
        let hints_path = self.config.store_dir().join(RERUN_HINTS_FILE);
        if rerun_hints.is_empty() {
            match std::fs::remove_file(&hints_path) {
                Ok(()) => debug!("removed stale rerun hints at {hints_path}"),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => warn!("failed to remove stale rerun hints at {hints_path}: {error}"),
            }
        } else {
            rerun_hints.write_to_file(&hints_path)?;
        }

        if let Some(junit_path) = self.config.junit_path() {
            JunitWriter::new(junit_path, self.config.junit()).write(
                &report,
                snapshot.start_time,
                snapshot.duration,
            )?;
        }

        Ok(RunOutcome {
            report,
            rerun_hints,
            cancelled,
            elapsed: snapshot.duration,
        })
    }
}

/// Runs plans on a fresh [`WorkerPool`], printing each result as it arrives.
struct PoolPipeline<'a> {
    config: &'a HostbatchConfig,
    spawner: &'a WorkerSpawner,
    displayer: &'a ReportDisplayer,
    cancel: &'a CancelReceiver,
    writer: &'a mut dyn Write,
}

impl RunPipeline for PoolPipeline<'_> {
    async fn run_plan(&mut self, plan: BatchPlan, attempt: u32) -> Vec<CaseResult> {
        let run = self.config.run();
        let pool = WorkerPool::new(
            self.spawner.clone(),
            run.compute_workers(plan.len()),
            run.result_channel_capacity,
            run.grace_period,
        );
        if let Err(error) = self
            .displayer
            .write_run_started(&plan, pool.workers(), attempt, self.writer)
        {
            warn!("error writing run output: {error}");
        }

        let config = self.config;
        let displayer = self.displayer;
        let writer = &mut *self.writer;
        let mut results = Vec::with_capacity(plan.case_count());
        pool.run(
            plan.into_batches(),
            |batch| DispatchSettings::new(config, batch.profile.kind, attempt),
            self.cancel,
            |result| {
                if let Err(error) = displayer.write_case_finished(&result, attempt, writer) {
                    warn!("error writing run output: {error}");
                }
                results.push(result);
            },
        )
        .await;
        results
    }
}
