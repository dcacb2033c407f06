// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Re-running inconclusive cases in isolation.
//!
//! After the initial pass, every case whose latest outcome is `Unknown`, `Crash` or `Timeout` is
//! planned again with [`BatchPlanner::plan_retry`], which gives each case a host of its own. This
//! repeats until the retry budget is spent, nothing is left to retry, or the run is cancelled.

use crate::{
    cancel::CancelReceiver,
    helpers::plural,
    plan::{BatchPlan, BatchPlanner},
    registry::TestRegistry,
};
use hostbatch_metadata::CaseResult;
use indexmap::IndexMap;
use std::future::Future;
use tracing::info;

/// Runs a batch plan to completion.
///
/// Implemented by the controller on top of the worker pool. `attempt` starts at 1 for the
/// initial pass.
pub trait RunPipeline {
    /// Runs every batch in `plan` and returns the results, one per case.
    fn run_plan(&mut self, plan: BatchPlan, attempt: u32) -> impl Future<Output = Vec<CaseResult>>;
}

/// Drives the initial pass and the retry rounds.
#[derive(Clone, Debug)]
pub struct RetryController {
    planner: BatchPlanner,
    retries: u32,
}

impl RetryController {
    /// Creates a controller that retries each case up to `retries` times.
    pub fn new(planner: BatchPlanner, retries: u32) -> Self {
        Self { planner, retries }
    }

    /// Runs `registry` through `pipeline`, retrying inconclusive cases, and returns one merged
    /// result per case that produced at least one result.
    pub async fn run(
        &self,
        pipeline: &mut impl RunPipeline,
        registry: &TestRegistry,
        cancel: &CancelReceiver,
    ) -> Vec<CaseResult> {
        let mut attempts: IndexMap<String, Vec<CaseResult>> = IndexMap::new();
        let record = |attempts: &mut IndexMap<String, Vec<CaseResult>>, results: Vec<CaseResult>| {
            for result in results {
                attempts
                    .entry(result.case_id.clone())
                    .or_default()
                    .push(result);
            }
        };

        let initial = pipeline.run_plan(self.planner.plan(registry), 1).await;
        record(&mut attempts, initial);

        for attempt in 2..=self.retries.saturating_add(1) {
            if cancel.is_cancelled() {
                info!("run cancelled, not retrying");
                break;
            }

            let to_retry: Vec<&str> = attempts
                .iter()
                .filter(|(_, results)| {
                    results
                        .last()
                        .is_some_and(|latest| latest.outcome.is_retryable())
                })
                .map(|(id, _)| id.as_str())
                .collect();
            if to_retry.is_empty() {
                break;
            }

            let retry_registry = registry.filter_by_case_ids(to_retry.iter().copied());
            info!(
                "retrying {} {} in isolation (attempt {attempt})",
                retry_registry.len(),
                plural::cases_str(retry_registry.len()),
            );
            let results = pipeline
                .run_plan(self.planner.plan_retry(&retry_registry), attempt)
                .await;
            record(&mut attempts, results);
        }

        attempts
            .into_values()
            .filter_map(merge_attempts)
            .collect()
    }
}

/// Merges every attempt at one case, oldest first, into the result that gets reported.
///
/// If the latest attempt passed, it is reported. Otherwise the worst outcome across attempts is
/// reported, preferring the latest attempt on ties. The other attempts are kept, oldest first, in
/// [`CaseResult::previous_attempts`], and `attempts` counts all of them.
///
/// Returns `None` if `attempts` is empty.
pub fn merge_attempts(attempts: Vec<CaseResult>) -> Option<CaseResult> {
    let latest = attempts.last()?;
    let reported_index = if latest.outcome.is_success() {
        attempts.len() - 1
    } else {
        // `max_by_key` returns the last of several equal maxima.
        attempts
            .iter()
            .enumerate()
            .max_by_key(|(_, result)| result.outcome)
            .map_or(attempts.len() - 1, |(index, _)| index)
    };

    let attempt_count = attempts.iter().map(|result| result.attempts).sum();
    let mut artefacts = Vec::new();
    let mut previous_attempts = Vec::new();
    let mut reported = None;
    for (index, mut result) in attempts.into_iter().enumerate() {
        for artefact in result.artefacts.drain(..) {
            if !artefacts.contains(&artefact) {
                artefacts.push(artefact);
            }
        }
        previous_attempts.append(&mut result.previous_attempts);
        if index == reported_index {
            reported = Some(result);
        } else {
            previous_attempts.push(result.to_attempt_record());
        }
    }

    let mut reported = reported?;
    reported.attempts = attempt_count;
    reported.artefacts = artefacts;
    reported.previous_attempts = previous_attempts;
    Some(reported)
}
