// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for hostbatch-runner.

use crate::host::HostExit;
use std::{fmt, sync::LazyLock, time::Duration};
use tracing::warn;

/// Utilities for pluralizing various words based on count.
pub(crate) mod plural {
    /// Returns "case" if `count` is 1, otherwise "cases".
    pub(crate) fn cases_str(count: usize) -> &'static str {
        if count == 1 { "case" } else { "cases" }
    }

    /// Returns "batch" if `count` is 1, otherwise "batches".
    pub(crate) fn batches_str(count: usize) -> &'static str {
        if count == 1 { "batch" } else { "batches" }
    }

    /// Returns "worker" if `count` is 1, otherwise "workers".
    pub(crate) fn workers_str(count: usize) -> &'static str {
        if count == 1 { "worker" } else { "workers" }
    }
}

pub(crate) fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}

/// Displays a duration with two decimal places of seconds.
pub(crate) struct FormattedDuration(pub(crate) Duration);

impl fmt::Display for FormattedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}s", self.0.as_secs_f64())
    }
}

/// Describes how a host exited, for use in reasons.
pub(crate) fn display_host_exit(exit: HostExit) -> String {
    match exit {
        HostExit::Exited(code) => format!("exited with code {code} (0x{code:X})"),
        HostExit::Signaled(sig) => match signal_str(sig) {
            Some(s) => format!("aborted with signal {sig} (SIG{s})"),
            None => format!("aborted with signal {sig}"),
        },
        HostExit::Killed => "was killed".to_owned(),
    }
}

pub(crate) fn signal_str(signal: i32) -> Option<&'static str> {
    // These signal numbers are the same on at least Linux, macOS, FreeBSD and illumos.
    match signal {
        1 => Some("HUP"),
        2 => Some("INT"),
        3 => Some("QUIT"),
        4 => Some("ILL"),
        5 => Some("TRAP"),
        6 => Some("ABRT"),
        8 => Some("FPE"),
        9 => Some("KILL"),
        11 => Some("SEGV"),
        13 => Some("PIPE"),
        14 => Some("ALRM"),
        15 => Some("TERM"),
        _ => None,
    }
}

/// Turns a case id into something that is safe to use as a single path component.
pub(crate) fn sanitize_path_component(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

/// Returns the last `n` entries of `lines`, joined with newlines.
pub(crate) fn tail_lines<'a>(lines: impl DoubleEndedIterator<Item = &'a String>, n: usize) -> String {
    let mut tail: Vec<&str> = lines.rev().take(n).map(String::as_str).collect();
    tail.reverse();
    tail.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(HostExit::Exited(15), "exited with code 15 (0xF)"; "fail code")]
    #[test_case(HostExit::Exited(-1), "exited with code -1 (0xFFFFFFFF)"; "negative")]
    #[test_case(HostExit::Signaled(11), "aborted with signal 11 (SIGSEGV)"; "segv")]
    #[test_case(HostExit::Signaled(64), "aborted with signal 64"; "unnamed signal")]
    fn host_exit_display(exit: HostExit, expected: &str) {
        assert_eq!(display_host_exit(exit), expected);
    }

    #[test]
    fn sanitize() {
        assert_eq!(
            sanitize_path_component("atom/viewport smoke:1"),
            "atom_viewport_smoke_1"
        );
    }

    #[test]
    fn tail() {
        let lines: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tail_lines(lines.iter(), 2), "b\nc");
        assert_eq!(tail_lines(lines.iter(), 10), "a\nb\nc");
        assert_eq!(tail_lines(lines.iter(), 0), "");
    }
}
