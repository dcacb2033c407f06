// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, Result, utf8_path},
    output::{OutputContext, OutputOpts, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use hostbatch_metadata::HostbatchExitCode;
use hostbatch_runner::{
    config::{HostbatchConfig, RunOverrides, WorkerCount},
    controller::{CaseSelection, Controller},
    plan::BatchPlan,
    registry::TestRegistry,
    reporter::ReportDisplayer,
    signal::SignalHandlerKind,
    worker::{WorkerSpawner, run_worker},
};
use owo_colors::{OwoColorize, Style};
use std::{
    io::{self, Write},
    num::NonZeroUsize,
    time::Duration,
};
use tracing::debug;

/// The hidden subcommand that worker processes are started with.
const WORKER_SUBCOMMAND: &str = "__worker";

/// Runs test scripts inside host processes, in batches and in parallel.
#[derive(Debug, Parser)]
#[command(version, styles = clap_styles::style())]
pub struct HostbatchApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(subcommand)]
    command: Command,
}

impl HostbatchApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        match &self.command {
            Command::Worker => OutputContext::color_never_init(),
            _ => self.output.init(),
        }
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        match self.command {
            Command::Run(opts) => opts.exec(output),
            Command::List(opts) => opts.exec(output),
            Command::Worker => {
                run_worker(SignalHandlerKind::Standard)?;
                Ok(HostbatchExitCode::OK)
            }
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run cases
    ///
    /// Cases are planned into batches that share a host, run across worker processes, and retried
    /// in isolation when their outcome is inconclusive.
    Run(RunOpts),

    /// List selected cases and the batches they would run in
    ///
    /// Use --message-format json to get machine-readable output.
    List(ListOpts),

    /// Run a single batch read from stdin, reporting results on stdout
    #[command(name = WORKER_SUBCOMMAND, hide = true)]
    Worker,
}

#[derive(Debug, Args)]
struct SuiteOpts {
    /// Suite files, or directories searched for `*.hostbatch.toml` and `*.hostbatch.json`
    /// [default: workspace root]
    #[arg(value_name = "PATHS")]
    paths: Vec<Utf8PathBuf>,

    /// Workspace root [default: current directory]
    #[arg(long, value_name = "DIR")]
    workspace_root: Option<Utf8PathBuf>,

    /// Config file [default: workspace-root/.config/hostbatch.toml]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Only run cases with one of these external case ids (comma-separated)
    #[arg(long, value_name = "IDS", value_delimiter = ',')]
    test_case_ids: Vec<String>,

    /// Only run the case with this id (may be repeated)
    #[arg(long = "case", value_name = "ID")]
    case_ids: Vec<String>,

    #[clap(flatten)]
    run: RunSettingsOpts,
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Run options")]
struct RunSettingsOpts {
    /// Maximum number of cases in a batch that shares a host
    #[arg(long, value_name = "N")]
    batch_size: Option<NonZeroUsize>,

    /// Number of worker processes to run batches in [possible values: integer or "num-cpus"]
    #[arg(long, short = 'j', value_name = "N", allow_negative_numbers = true)]
    workers: Option<WorkerCount>,

    /// Number of times to retry a case whose outcome was inconclusive
    #[arg(long = "retry", value_name = "N")]
    retries: Option<u32>,

    /// Timeout in seconds for cases that do not set their own
    #[arg(long = "timeout", value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Fail a case as soon as a forbidden line appears, unless the case says otherwise
    #[arg(long)]
    halt_on_unexpected: bool,

    /// Give every batched case its own host lifetime
    #[arg(long = "no-test-batch")]
    no_batch: bool,

    /// Run all batches in a single worker
    #[arg(long = "no-test-parallel")]
    no_parallel: bool,
}

impl RunSettingsOpts {
    fn to_overrides(&self) -> RunOverrides {
        RunOverrides {
            batch_size: self.batch_size,
            workers: self.workers,
            retries: self.retries,
            default_timeout: self.timeout_secs.map(Duration::from_secs),
            halt_on_unexpected: self.halt_on_unexpected,
            no_batch: self.no_batch,
            no_parallel: self.no_parallel,
        }
    }
}

/// Everything needed to plan a run, after the command line is applied.
struct Session {
    controller: Controller,
    registry: TestRegistry,
}

impl SuiteOpts {
    fn build(
        &self,
        displayer: ReportDisplayer,
        spawner: WorkerSpawner,
        junit: Option<&Utf8Path>,
    ) -> Result<Session> {
        let current_dir = std::env::current_dir()
            .map_err(|error| ExpectedError::CurrentDirFailed { error })
            .and_then(utf8_path)?;
        let workspace_root = match &self.workspace_root {
            Some(root) => current_dir.join(root),
            None => current_dir.clone(),
        };
        debug!("workspace root: {workspace_root}");

        let config_file = self.config_file.as_ref().map(|file| current_dir.join(file));
        let mut config = HostbatchConfig::from_sources(&workspace_root, config_file.as_deref())?;
        config.apply_overrides(&self.run.to_overrides());
        if let Some(junit) = junit {
            config.set_junit_path(junit);
        }

        let paths: Vec<Utf8PathBuf> = if self.paths.is_empty() {
            vec![workspace_root.clone()]
        } else {
            self.paths.iter().map(|path| current_dir.join(path)).collect()
        };

        let controller = Controller::new(config, spawner, SignalHandlerKind::Standard, displayer);
        let selection = CaseSelection {
            test_case_ids: self.test_case_ids.clone(),
            case_ids: self.case_ids.clone(),
        };
        let registry = controller.load(&paths, &selection)?;
        if registry.is_empty() {
            let loaded = controller.load(&paths, &CaseSelection::default())?.len();
            return Err(ExpectedError::NoCasesSelected { loaded });
        }

        Ok(Session {
            controller,
            registry,
        })
    }
}

#[derive(Debug, Args)]
struct RunOpts {
    #[clap(flatten)]
    suites: SuiteOpts,

    /// Write a JUnit report to this path, relative to the store directory
    #[arg(long, value_name = "PATH")]
    junit: Option<Utf8PathBuf>,
}

impl RunOpts {
    fn exec(self, output: OutputContext) -> Result<i32> {
        let current_exe = std::env::current_exe()
            .map_err(|error| ExpectedError::CurrentExeFailed { error })
            .and_then(utf8_path)?;
        let spawner = WorkerSpawner::Process {
            program: current_exe,
            args: vec![WORKER_SUBCOMMAND.to_owned()],
        };

        let displayer = ReportDisplayer::new(output.colorize_stderr());
        let Session {
            controller,
            registry,
        } = self
            .suites
            .build(displayer, spawner, self.junit.as_deref())?;

        let outcome = controller.execute(&registry, &mut io::stderr())?;
        Ok(outcome.exit_code())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
enum MessageFormat {
    /// A human-readable listing of batches and cases
    #[default]
    Human,
    /// The plan as JSON
    Json,
}

#[derive(Debug, Args)]
struct ListOpts {
    #[clap(flatten)]
    suites: SuiteOpts,

    /// Output format
    #[arg(long, value_enum, default_value_t, value_name = "FMT")]
    message_format: MessageFormat,
}

impl ListOpts {
    fn exec(self, output: OutputContext) -> Result<i32> {
        let displayer = ReportDisplayer::new(false);
        let Session {
            controller,
            registry,
        } = self.suites.build(displayer, WorkerSpawner::InProcess, None)?;
        let plan = controller.planner().plan(&registry);

        let stdout = io::stdout();
        let mut writer = stdout.lock();
        match self.message_format {
            MessageFormat::Human => {
                let styles = ListStyles::new(output.colorize_stdout());
                write_plan_human(&plan, controller.config().workspace_root(), &styles, &mut writer)
                    .map_err(|error| ExpectedError::WriteOutput { error })?;
            }
            MessageFormat::Json => {
                serde_json::to_writer_pretty(&mut writer, &plan.summary())
                    .map_err(|error| ExpectedError::SerializeList { error })?;
                writeln!(writer).map_err(|error| ExpectedError::WriteOutput { error })?;
            }
        }
        writer
            .flush()
            .map_err(|error| ExpectedError::WriteOutput { error })?;
        Ok(HostbatchExitCode::OK)
    }
}

#[derive(Debug, Default)]
struct ListStyles {
    batch: Style,
    count: Style,
    case_id: Style,
}

impl ListStyles {
    fn new(colorize: bool) -> Self {
        let mut styles = Self::default();
        if colorize {
            styles.batch = Style::new().green().bold();
            styles.count = Style::new().bold();
            styles.case_id = Style::new().blue().bold();
        }
        styles
    }
}

fn write_plan_human(
    plan: &BatchPlan,
    workspace_root: &Utf8Path,
    styles: &ListStyles,
    writer: &mut dyn Write,
) -> io::Result<()> {
    for batch in plan.batches() {
        writeln!(
            writer,
            "{} {} ({}, {}, {} {}, deadline {})",
            "batch".style(styles.batch),
            batch.id,
            batch.profile.kind,
            batch.isolation,
            batch.cases.len().style(styles.count),
            if batch.cases.len() == 1 { "case" } else { "cases" },
            humantime::format_duration(batch.deadline),
        )?;
        for case in &batch.cases {
            let script = case
                .script_path
                .strip_prefix(workspace_root)
                .unwrap_or(&case.script_path);
            writeln!(writer, "    {} {script}", case.id.style(styles.case_id))?;
        }
    }
    Ok(())
}
