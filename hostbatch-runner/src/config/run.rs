// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{errors::ConfigParseErrorKind, helpers::get_num_cpus};
use serde::Deserialize;
use std::{cmp::Ordering, fmt, num::NonZeroUsize, str::FromStr, time::Duration};

/// Settings for a run, from the `[run]` table.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunSettings {
    /// The number of worker processes.
    pub workers: WorkerCount,

    /// The maximum number of Batched cases per host lifetime.
    pub batch_size: NonZeroUsize,

    /// The per-case retry budget.
    pub retries: u32,

    /// The timeout for cases that don't specify one.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// The default for `halt_on_forbidden`.
    pub halt_on_unexpected: bool,

    /// Slack added to each batch deadline.
    #[serde(with = "humantime_serde")]
    pub batch_slack: Duration,

    /// How long hosts and workers get to exit after being asked to terminate.
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,

    /// How often host logs are polled.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// The number of log lines kept as evidence.
    pub excerpt_lines: usize,

    /// The capacity of the result channel.
    pub result_channel_capacity: NonZeroUsize,

    /// The host exit code that means "test failed".
    pub fail_exit_code: i32,

    /// Treat every Batched case as Shared.
    pub no_batch: bool,

    /// Use a single worker.
    pub no_parallel: bool,
}

impl RunSettings {
    pub(super) fn validate(&self) -> Result<(), ConfigParseErrorKind> {
        if self.default_timeout.is_zero() {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "run.default-timeout",
                message: "must be positive",
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "run.poll-interval",
                message: "must be positive",
            });
        }
        Ok(())
    }

    /// Returns the number of workers to use for `batch_count` batches.
    ///
    /// This is never more than the number of batches, and never less than 1.
    pub fn compute_workers(&self, batch_count: usize) -> usize {
        let configured = if self.no_parallel {
            1
        } else {
            self.workers.compute()
        };
        configured.min(batch_count).max(1)
    }
}

/// Overrides for [`RunSettings`] supplied on the command line.
#[derive(Clone, Debug, Default)]
pub struct RunOverrides {
    /// Overrides `batch-size`.
    pub batch_size: Option<NonZeroUsize>,
    /// Overrides `workers`.
    pub workers: Option<WorkerCount>,
    /// Overrides `retries`.
    pub retries: Option<u32>,
    /// Overrides `default-timeout`.
    pub default_timeout: Option<Duration>,
    /// If true, sets `halt-on-unexpected`.
    pub halt_on_unexpected: bool,
    /// If true, sets `no-batch`.
    pub no_batch: bool,
    /// If true, sets `no-parallel`.
    pub no_parallel: bool,
}

impl RunOverrides {
    pub(super) fn apply(&self, settings: &mut RunSettings) {
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(retries) = self.retries {
            settings.retries = retries;
        }
        if let Some(timeout) = self.default_timeout {
            settings.default_timeout = timeout;
        }
        settings.halt_on_unexpected |= self.halt_on_unexpected;
        settings.no_batch |= self.no_batch;
        settings.no_parallel |= self.no_parallel;
    }
}

/// The number of worker processes to use.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WorkerCount {
    /// Run with a specified number of workers.
    Count(usize),

    /// Run with a number of workers equal to the logical CPU count.
    NumCpus,
}

impl WorkerCount {
    /// Gets the actual number of workers computed at runtime.
    pub fn compute(self) -> usize {
        match self {
            Self::Count(workers) => workers,
            Self::NumCpus => get_num_cpus(),
        }
    }
}

impl FromStr for WorkerCount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "num-cpus" {
            return Ok(Self::NumCpus);
        }

        match s.parse::<isize>() {
            Err(e) => Err(format!("error: {e} parsing {s}")),
            Ok(0) => Err("workers may not be 0".to_owned()),
            Ok(j) if j < 0 => Ok(WorkerCount::Count(
                (get_num_cpus() as isize + j).max(1) as usize,
            )),
            Ok(j) => Ok(WorkerCount::Count(j as usize)),
        }
    }
}

impl fmt::Display for WorkerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(workers) => write!(f, "{workers}"),
            Self::NumCpus => write!(f, "num-cpus"),
        }
    }
}

impl<'de> Deserialize<'de> for WorkerCount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = WorkerCount;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "an integer or the string \"num-cpus\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v == "num-cpus" {
                    Ok(WorkerCount::NumCpus)
                } else {
                    Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &self,
                    ))
                }
            }

            // Note that TOML uses i64, not u64.
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v.cmp(&0) {
                    Ordering::Greater => Ok(WorkerCount::Count(v as usize)),
                    Ordering::Less => Ok(WorkerCount::Count(
                        (get_num_cpus() as i64 + v).max(1) as usize,
                    )),
                    Ordering::Equal => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Signed(v),
                        &self,
                    )),
                }
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v {
                    0 => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Unsigned(v),
                        &self,
                    )),
                    v => Ok(WorkerCount::Count(v as usize)),
                }
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostbatchConfig;
    use test_case::test_case;

    #[test_case("num-cpus", Some(WorkerCount::NumCpus); "num cpus")]
    #[test_case("4", Some(WorkerCount::Count(4)); "positive")]
    #[test_case("0", None; "zero")]
    #[test_case("many", None; "garbage")]
    fn parse_worker_count(input: &str, expected: Option<WorkerCount>) {
        assert_eq!(input.parse::<WorkerCount>().ok(), expected);
    }

    #[test]
    fn compute_workers_is_bounded_by_batches() {
        let mut settings = HostbatchConfig::default_config("/ws").run().clone();
        settings.workers = WorkerCount::Count(8);
        assert_eq!(settings.compute_workers(3), 3);
        assert_eq!(settings.compute_workers(20), 8);
        assert_eq!(settings.compute_workers(0), 1);

        settings.no_parallel = true;
        assert_eq!(settings.compute_workers(20), 1);
    }

    #[test]
    fn overrides_apply() {
        let mut settings = HostbatchConfig::default_config("/ws").run().clone();
        let overrides = RunOverrides {
            batch_size: NonZeroUsize::new(3),
            retries: Some(0),
            default_timeout: Some(Duration::from_secs(5)),
            halt_on_unexpected: true,
            ..Default::default()
        };
        overrides.apply(&mut settings);
        assert_eq!(settings.batch_size.get(), 3);
        assert_eq!(settings.retries, 0);
        assert_eq!(settings.default_timeout, Duration::from_secs(5));
        assert!(settings.halt_on_unexpected);
        assert!(!settings.no_batch);
        assert_eq!(settings.workers, WorkerCount::NumCpus);
    }
}
