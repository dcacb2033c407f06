// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human-readable console output.

use super::{RerunHints, RunReport, RunStats};
use crate::{helpers::plural, plan::BatchPlan};
use hostbatch_metadata::{CaseOutcome, CaseResult};
use owo_colors::{OwoColorize, Style};
use std::{
    io::{self, Write},
    time::Duration,
};
use swrite::{SWrite, swrite};

#[derive(Debug, Default, Clone)]
struct Styles {
    count: Style,
    pass: Style,
    retry: Style,
    fail: Style,
    skip: Style,
    case_id: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.retry = Style::new().magenta().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.case_id = Style::new().blue().bold();
    }

    fn for_outcome(&self, outcome: CaseOutcome) -> Style {
        match outcome {
            CaseOutcome::Pass => self.pass,
            CaseOutcome::Skipped | CaseOutcome::Unknown => self.skip,
            CaseOutcome::Fail | CaseOutcome::Timeout | CaseOutcome::Crash => self.fail,
        }
    }
}

/// Writes run progress, the final summary and rerun hints to the console.
#[derive(Debug, Clone)]
pub struct ReportDisplayer {
    styles: Box<Styles>,
}

impl ReportDisplayer {
    /// Creates a displayer, with colors if `colorize` is true.
    pub fn new(colorize: bool) -> Self {
        let mut styles = Box::<Styles>::default();
        if colorize {
            styles.colorize();
        }
        Self { styles }
    }

    /// Writes the line announcing a pass over `plan`.
    pub fn write_run_started(
        &self,
        plan: &BatchPlan,
        workers: usize,
        attempt: u32,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        let (label, style) = if attempt == 1 {
            ("Starting".to_owned(), self.styles.pass)
        } else {
            (format!("TRY {attempt}"), self.styles.retry)
        };
        writeln!(
            writer,
            "{:>12} {} {} in {} {} across {} {}",
            label.style(style),
            plan.case_count().style(self.styles.count),
            plural::cases_str(plan.case_count()),
            plan.len().style(self.styles.count),
            plural::batches_str(plan.len()),
            workers.style(self.styles.count),
            plural::workers_str(workers),
        )
    }

    /// Writes the status line for one attempt at a case. Cases that did not pass are followed
    /// by their log excerpt.
    pub fn write_case_finished(
        &self,
        result: &CaseResult,
        attempt: u32,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        self.write_status_line(result, attempt, writer)?;
        if !result.outcome.is_success() && !result.log_excerpt.is_empty() {
            let header = format!("--- LOG EXCERPT: {} ---", result.case_id);
            writeln!(writer, "{}", header.style(self.styles.for_outcome(result.outcome)))?;
            write!(writer, "{}", result.log_excerpt)?;
            if !result.log_excerpt.ends_with('\n') {
                writeln!(writer)?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    /// Writes the final summary of `report`, followed by one line per case that did not pass.
    pub fn write_summary(
        &self,
        report: &RunReport,
        elapsed: Duration,
        cancelled: bool,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        let stats = report.stats();
        let summary_style = if cancelled || !stats.is_success() {
            self.styles.fail
        } else if stats.total == 0 {
            self.styles.skip
        } else {
            self.styles.pass
        };

        writeln!(writer, "{}", "-".repeat(12))?;
        write!(writer, "{:>12} ", "Summary".style(summary_style))?;
        // * > means right-align.
        // * 8 is the number of characters to pad to.
        // * .3 means print three digits after the decimal point.
        write!(writer, "[{:>8.3?}s] ", elapsed.as_secs_f64())?;
        write!(writer, "{}", stats.finished.style(self.styles.count))?;
        if stats.finished != stats.total {
            write!(writer, "/{}", stats.total.style(self.styles.count))?;
        }
        let mut summary_str = String::new();
        self.write_summary_str(&stats, &mut summary_str);
        write!(
            writer,
            " {} run: {summary_str}",
            plural::cases_str(stats.total)
        )?;
        if cancelled {
            write!(writer, " ({})", "run cancelled".style(self.styles.fail))?;
        }
        writeln!(writer)?;

        for result in report.non_passing() {
            self.write_status_line(result, 1, writer)?;
        }
        Ok(())
    }

    /// Writes the rerun hints for the cases that did not pass, if any.
    pub fn write_rerun_hints(&self, hints: &RerunHints, writer: &mut dyn Write) -> io::Result<()> {
        if hints.is_empty() {
            return Ok(());
        }
        writeln!(
            writer,
            "\n{} for {} {}:",
            "Rerun hints".style(self.styles.count),
            hints.len().style(self.styles.count),
            plural::cases_str(hints.len()),
        )?;
        for hint in hints.iter() {
            write!(
                writer,
                "{:>12} {}",
                hint.outcome.label().style(self.styles.for_outcome(hint.outcome)),
                hint.case_id.style(self.styles.case_id),
            )?;
            if let Some(reason) = &hint.reason {
                write!(writer, ": {reason}")?;
            }
            writeln!(writer)?;
            writeln!(writer, "{:>12} {}", "", hint.command)?;
            writeln!(writer, "{:>12} {}", "", hint.owners)?;
        }
        Ok(())
    }

    fn write_status_line(
        &self,
        result: &CaseResult,
        attempt: u32,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        let style = self.styles.for_outcome(result.outcome);
        if attempt > 1 {
            write!(
                writer,
                "{:>12} ",
                format!("TRY {attempt} {}", result.outcome.label()).style(style)
            )?;
        } else {
            write!(writer, "{:>12} ", result.outcome.label().style(style))?;
        }

        write!(
            writer,
            "[{:>8.3?}s] {}",
            result.duration.as_secs_f64(),
            result.case_id.style(self.styles.case_id)
        )?;
        if let Some(reason) = result.reason.as_deref().filter(|_| !result.outcome.is_success()) {
            write!(writer, ": {reason}")?;
        }
        writeln!(writer)
    }

    fn write_summary_str(&self, stats: &RunStats, out: &mut String) {
        // Written in this style to ensure new fields are accounted for.
        let &RunStats {
            total: _,
            finished: _,
            passed,
            flaky,
            retried: _,
            failed,
            timed_out,
            crashed,
            unknown,
            skipped,
        } = stats;

        swrite!(
            out,
            "{} {}",
            passed.style(self.styles.count),
            "passed".style(self.styles.pass)
        );
        if flaky > 0 {
            swrite!(
                out,
                " ({} {})",
                flaky.style(self.styles.count),
                "flaky".style(self.styles.skip)
            );
        }

        for (count, label, style) in [
            (failed, "failed", self.styles.fail),
            (timed_out, "timed out", self.styles.fail),
            (crashed, "crashed", self.styles.fail),
            (unknown, "unknown", self.styles.skip),
            (skipped, "skipped", self.styles.skip),
        ] {
            if count > 0 {
                swrite!(out, ", {} {}", count.style(self.styles.count), label.style(style));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::HostbatchConfig, reporter::test_report};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn render(f: impl FnOnce(&ReportDisplayer, &mut Vec<u8>) -> io::Result<()>) -> String {
        let displayer = ReportDisplayer::new(false);
        let mut buf = Vec::new();
        f(&displayer, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn case_lines() {
        let report = test_report::sample();
        let lights = report.get("lights").unwrap();
        assert_eq!(
            render(|d, w| d.write_case_finished(lights, 1, w)),
            indoc! {"
                        FAIL [   3.000s] lights: forbidden line
                --- LOG EXCERPT: lights ---
                lights loading
                ERROR shader missing

            "}
        );

        let viewport = report.get("viewport").unwrap();
        assert_eq!(
            render(|d, w| d.write_case_finished(viewport, 2, w)),
            "  TRY 2 PASS [   1.500s] viewport\n"
        );
    }

    #[test]
    fn summary_lists_non_passing_cases() {
        let report = test_report::sample();
        assert_eq!(
            render(|d, w| d.write_summary(&report, Duration::from_secs(9), false, w)),
            indoc! {"
                ------------
                     Summary [   9.000s] 3 cases run: 1 passed (1 flaky), 1 failed, 1 unknown
                     UNKNOWN [   0.000s] joints: no result reported
                        FAIL [   3.000s] lights: forbidden line
            "}
        );

        let cancelled = render(|d, w| d.write_summary(&report, Duration::from_secs(9), true, w));
        assert!(cancelled.contains("1 unknown (run cancelled)\n"), "{cancelled}");
    }

    #[test]
    fn rerun_hints_section() {
        let report = test_report::sample();
        let config = HostbatchConfig::default_config("/suites");
        let hints = RerunHints::new(&report, &config, None);
        let out = render(|d, w| d.write_rerun_hints(&hints, w));
        assert!(out.starts_with("\nRerun hints for 2 cases:\n"), "{out}");
        assert!(out.contains("        FAIL lights: forbidden line\n"), "{out}");
        assert!(
            out.contains("             owners: unknown (no code owners file configured)\n"),
            "{out}"
        );

        let empty = render(|d, w| d.write_rerun_hints(&RerunHints::default(), w));
        assert_eq!(empty, "");
    }

    #[test]
    fn colorized_output_has_escapes() {
        let report = test_report::sample();
        let displayer = ReportDisplayer::new(true);
        let mut buf = Vec::new();
        displayer
            .write_case_finished(report.get("lights").unwrap(), 1, &mut buf)
            .unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("\u{1b}["));
    }
}
