// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Grouping cases into batches.
//!
//! Each batch shares one host profile and one isolation class:
//!
//! * `Batched` cases share a host lifetime, at most `max_batch_size` per batch. A `Batched` case
//!   without expected lines can only be seen to finish when its host exits, so it gets a batch of
//!   its own.
//! * `Shared` and `Isolated` cases always get a batch of their own, so each one runs in a fresh
//!   host lifetime. They differ only in how they are reported.
//!
//! Batches are ordered by a hash of their contents, so the same registry always produces the same
//! plan.

use crate::registry::{HostProfile, TestCase, TestRegistry};
use hostbatch_metadata::{BatchSummary, Isolation, PlanSummary};
use serde::{Deserialize, Serialize};
use std::{num::NonZeroUsize, time::Duration};
use tracing::debug;
use xxhash_rust::xxh3::Xxh3;

/// Options for the [`BatchPlanner`].
#[derive(Copy, Clone, Debug)]
pub struct PlannerOptions {
    /// The maximum number of cases in a `Batched` batch.
    pub max_batch_size: NonZeroUsize,
    /// Added to the sum of case timeouts to form each batch's deadline.
    pub slack: Duration,
    /// Plan `Batched` cases as if they were `Shared`.
    pub no_batch: bool,
}

/// Turns a registry into a [`BatchPlan`].
#[derive(Clone, Debug)]
pub struct BatchPlanner {
    opts: PlannerOptions,
}

impl BatchPlanner {
    /// Creates a new planner.
    pub fn new(opts: PlannerOptions) -> Self {
        Self { opts }
    }

    /// Plans the initial run of every case in `registry`.
    pub fn plan(&self, registry: &TestRegistry) -> BatchPlan {
        let mut batches = Vec::new();

        for (profile, cases) in registry.iter_by_profile() {
            let mut batched = Vec::new();
            for case in cases {
                match self.effective_isolation(case.isolation) {
                    Isolation::Batched if case.expected_lines.is_empty() => {
                        debug!("case `{}` has no expected lines, batching it alone", case.id);
                        batches.push(self.make_batch(profile, Isolation::Batched, &[case]));
                    }
                    Isolation::Batched => batched.push(case),
                    isolation @ (Isolation::Shared | Isolation::Isolated) => {
                        batches.push(self.make_batch(profile, isolation, &[case]));
                    }
                }
            }

            for chunk in batched.chunks(self.opts.max_batch_size.get()) {
                batches.push(self.make_batch(profile, Isolation::Batched, chunk));
            }
        }

        BatchPlan::new(batches)
    }

    /// Plans a retry round: every case in `registry` gets an `Isolated` batch of its own,
    /// regardless of its declared isolation.
    pub fn plan_retry(&self, registry: &TestRegistry) -> BatchPlan {
        let batches = registry
            .iter()
            .map(|case| self.make_batch(&case.profile, Isolation::Isolated, &[case]))
            .collect();
        BatchPlan::new(batches)
    }

    fn effective_isolation(&self, isolation: Isolation) -> Isolation {
        match isolation {
            Isolation::Batched if self.opts.no_batch => Isolation::Shared,
            other => other,
        }
    }

    fn make_batch(&self, profile: &HostProfile, isolation: Isolation, cases: &[&TestCase]) -> Batch {
        let deadline = cases
            .iter()
            .map(|case| case.timeout)
            .fold(self.opts.slack, |acc, timeout| acc.saturating_add(timeout));

        let mut hasher = Xxh3::new();
        hasher.update(isolation.as_str().as_bytes());
        for case in cases {
            hasher.update(b"\0");
            hasher.update(case.id.as_bytes());
        }

        Batch {
            id: format!("{:016x}", hasher.digest()),
            profile: profile.clone(),
            isolation,
            cases: cases.iter().map(|&case| case.clone()).collect(),
            deadline,
        }
    }
}

/// A set of cases that run one after the other in a single worker.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Batch {
    /// A stable identifier derived from the isolation class and the case ids.
    pub id: String,
    /// The host configuration shared by every case.
    pub profile: HostProfile,
    /// The isolation class of every case in this batch.
    pub isolation: Isolation,
    /// The cases, in execution order. Never empty.
    pub cases: Vec<TestCase>,
    /// The overall time budget of the batch.
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,
}

impl Batch {
    /// Returns true if every case gets its own host lifetime.
    pub fn host_per_case(&self) -> bool {
        self.isolation != Isolation::Batched
    }

    /// Returns a summary of this batch.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.id.clone(),
            host_kind: self.profile.kind,
            host_args: self.profile.args.clone(),
            host_env: self.profile.env.clone(),
            isolation: self.isolation,
            deadline_s: self.deadline.as_secs(),
            cases: self.cases.iter().map(|case| case.id.clone()).collect(),
        }
    }
}

/// An ordered list of batches covering every case of a registry exactly once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchPlan {
    batches: Vec<Batch>,
}

impl BatchPlan {
    fn new(mut batches: Vec<Batch>) -> Self {
        batches.sort_by(|a, b| a.id.cmp(&b.id));
        Self { batches }
    }

    /// Returns the batches in scheduling order.
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Consumes the plan, returning the batches in scheduling order.
    pub fn into_batches(self) -> Vec<Batch> {
        self.batches
    }

    /// Returns the number of batches.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// Returns true if there is nothing to run.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Returns the total number of cases across all batches.
    pub fn case_count(&self) -> usize {
        self.batches.iter().map(|batch| batch.cases.len()).sum()
    }

    /// Returns a serializable summary of the plan.
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            case_count: self.case_count(),
            batches: self.batches.iter().map(Batch::summary).collect(),
        }
    }
}
