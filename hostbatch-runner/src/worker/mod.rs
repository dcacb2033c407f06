// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running batches in parallel.
//!
//! Each batch runs in its own worker. By default a worker is a child process (the `hostbatch`
//! binary re-invoked with a hidden subcommand), so a worker that misbehaves cannot take the
//! controller down with it. Workers talk to the controller through the line protocol in
//! [`protocol`], and the pool funnels every result into one bounded channel.

pub mod protocol;

use self::protocol::{ControlMessage, WorkerMessage, WorkerRequest, parse_message, write_message};
use crate::{
    cancel::{CancelReceiver, cancel_pair},
    dispatcher::{CANCELLED_BEFORE_START_REASON, DispatchSettings, Dispatcher, ResultSink},
    errors::{DisplayErrorChain, ResultSinkError, WorkerEntryError, WorkerError},
    helpers::plural,
    plan::Batch,
    result_parser::CANCELLED_REASON,
    signal::SignalHandlerKind,
};
use camino::Utf8PathBuf;
use futures::prelude::*;
use hostbatch_metadata::{CaseOutcome, CaseResult};
use std::{
    collections::{HashSet, VecDeque},
    num::NonZeroUsize,
    process::{ExitStatus, Stdio},
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{ChildStderr, Command},
    sync::mpsc,
};
use tracing::{debug, info, warn};

/// Reason given to cases whose worker ended without reporting them.
pub const WORKER_DIED_REASON: &str = "worker died";

/// The number of worker stderr lines kept as evidence when a worker dies.
const STDERR_EVIDENCE_LINES: usize = 40;

/// How workers are started.
#[derive(Clone, Debug)]
pub enum WorkerSpawner {
    /// Each batch runs in a child process: `program args...`, which must behave like
    /// [`run_worker`].
    Process {
        /// The program to run.
        program: Utf8PathBuf,
        /// Arguments selecting worker mode.
        args: Vec<String>,
    },

    /// Batches run as tasks inside the current process.
    InProcess,
}

/// Runs batches on a bounded number of workers.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    spawner: WorkerSpawner,
    workers: usize,
    channel_capacity: NonZeroUsize,
    grace_period: Duration,
}

impl WorkerPool {
    /// Creates a pool running at most `workers` batches at a time.
    pub fn new(
        spawner: WorkerSpawner,
        workers: usize,
        channel_capacity: NonZeroUsize,
        grace_period: Duration,
    ) -> Self {
        Self {
            spawner,
            workers: workers.max(1),
            channel_capacity,
            grace_period,
        }
    }

    /// Returns the maximum number of batches that run at the same time.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs every batch and calls `on_result` once for every case, as results arrive.
    ///
    /// `settings_for` supplies the dispatch settings of each batch. Results of one batch arrive
    /// in planned order; results of different batches interleave. Worker failures never fail the
    /// run: the cases a worker did not report are delivered as `Unknown`.
    pub async fn run(
        &self,
        batches: Vec<Batch>,
        settings_for: impl Fn(&Batch) -> DispatchSettings,
        cancel: &CancelReceiver,
        mut on_result: impl FnMut(CaseResult),
    ) {
        let batch_count = batches.len();
        info!(
            "running {batch_count} {} on {} {}",
            plural::batches_str(batch_count),
            self.workers.min(batch_count),
            plural::workers_str(self.workers.min(batch_count)),
        );

        let (sender, mut receiver) = mpsc::channel(self.channel_capacity.get());
        let producer = async move {
            stream::iter(batches)
                .map(|batch| {
                    let settings = settings_for(&batch);
                    let sink = ChannelSink::new(sender.clone());
                    self.run_one(batch, settings, cancel.clone(), sink)
                })
                .buffer_unordered(self.workers)
                .collect::<()>()
                .await;
            // `sender` is dropped here, which ends the consumer loop below.
        };
        let consumer = async {
            while let Some(result) = receiver.recv().await {
                on_result(result);
            }
        };
        tokio::join!(producer, consumer);
    }

    async fn run_one(
        &self,
        batch: Batch,
        settings: DispatchSettings,
        mut cancel: CancelReceiver,
        mut sink: ChannelSink,
    ) {
        // Batches queued behind busy workers are only picked up here, so this is also where a
        // batch that never started gets skipped.
        if cancel.is_cancelled() {
            debug!("batch {}: cancelled before a worker was started", batch.id);
            for case in &batch.cases {
                let result = CaseResult::not_started(
                    case.id.clone(),
                    CaseOutcome::Skipped,
                    CANCELLED_BEFORE_START_REASON,
                    "",
                );
                if sink.submit(result).await.is_err() {
                    return;
                }
            }
            return;
        }

        let evidence = match &self.spawner {
            WorkerSpawner::InProcess => {
                let dispatcher = Dispatcher::new(batch.profile.kind, settings);
                match dispatcher.run_batch(&batch, &mut cancel, &mut sink).await {
                    Ok(()) => None,
                    Err(error) => Some(DisplayErrorChain::new(error).to_string()),
                }
            }
            WorkerSpawner::Process { program, args } => {
                match self
                    .run_process(program, args, &batch, settings, &mut cancel, &mut sink)
                    .await
                {
                    Ok(exit) if exit.finished && exit.status.is_some_and(|s| s.success()) => None,
                    Ok(exit) => {
                        let status = match exit.status {
                            Some(status) => format!("worker ended early ({status})"),
                            None => "worker ended early".to_owned(),
                        };
                        Some(if exit.stderr_tail.is_empty() {
                            status
                        } else {
                            format!("{status}, its last output was:\n{}", exit.stderr_tail)
                        })
                    }
                    Err(error) => {
                        warn!("{}", DisplayErrorChain::new(&error));
                        Some(DisplayErrorChain::new(error).to_string())
                    }
                }
            }
        };

        if sink.closed {
            return;
        }
        let unreported: Vec<_> = batch
            .cases
            .iter()
            .filter(|case| !sink.reported.contains(&case.id))
            .collect();
        if unreported.is_empty() {
            return;
        }

        let reason = if cancel.is_cancelled() {
            CANCELLED_REASON
        } else {
            WORKER_DIED_REASON
        };
        warn!(
            "batch {}: worker ended without reporting {} {}",
            batch.id,
            unreported.len(),
            plural::cases_str(unreported.len()),
        );
        let evidence = evidence.unwrap_or_default();
        for case in unreported {
            let result = CaseResult::not_started(
                case.id.clone(),
                CaseOutcome::Unknown,
                reason,
                evidence.clone(),
            );
            if sink.submit(result).await.is_err() {
                return;
            }
        }
    }

    async fn run_process(
        &self,
        program: &Utf8PathBuf,
        args: &[String],
        batch: &Batch,
        settings: DispatchSettings,
        cancel: &mut CancelReceiver,
        sink: &mut ChannelSink,
    ) -> Result<ProcessExit, WorkerError> {
        let spawn_error = |error| WorkerError::Spawn {
            batch_id: batch.id.clone(),
            error,
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;
        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(spawn_error(std::io::Error::other("worker stdio was not captured")));
        };
        debug!(
            "batch {}: started worker {program} (pid {})",
            batch.id,
            child.id().unwrap_or_default()
        );

        let request = WorkerRequest {
            batch: batch.clone(),
            settings,
        };
        write_message(&mut stdin, &request)
            .await
            .map_err(|error| WorkerError::SendRequest {
                batch_id: batch.id.clone(),
                error,
            })?;

        let messages = async {
            let mut lines = BufReader::new(stdout).lines();
            let mut cancel_sent = false;
            let mut finished = false;
            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        let line = line.map_err(|error| WorkerError::ReadOutput {
                            batch_id: batch.id.clone(),
                            error,
                        })?;
                        let Some(line) = line else { break };
                        match parse_message::<WorkerMessage>(&line) {
                            Ok(WorkerMessage::CaseFinished { result }) => {
                                if !batch.cases.iter().any(|case| case.id == result.case_id)
                                    || sink.reported.contains(&result.case_id)
                                {
                                    warn!(
                                        "batch {}: ignoring unexpected result for `{}`",
                                        batch.id, result.case_id
                                    );
                                    continue;
                                }
                                if sink.submit(*result).await.is_err() {
                                    break;
                                }
                            }
                            Ok(WorkerMessage::BatchFinished) => finished = true,
                            Err(error) => {
                                let error = WorkerError::Protocol {
                                    batch_id: batch.id.clone(),
                                    line,
                                    error,
                                };
                                warn!("{}", DisplayErrorChain::new(error));
                            }
                        }
                    }
                    () = cancel.cancelled(), if !cancel_sent => {
                        cancel_sent = true;
                        debug!("batch {}: forwarding cancellation to worker", batch.id);
                        if let Err(error) = write_message(&mut stdin, &ControlMessage::Cancel).await {
                            debug!("batch {}: worker stdin closed: {error}", batch.id);
                        }
                    }
                }
            }
            Ok::<_, WorkerError>(finished)
        };
        let (finished, stderr_tail) = tokio::join!(messages, replay_stderr(&batch.id, stderr));
        let finished = finished?;
        drop(stdin);

        let status = match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(error)) => {
                warn!("batch {}: error waiting for worker: {error}", batch.id);
                None
            }
            Err(_) => {
                warn!("batch {}: worker did not exit, killing it", batch.id);
                let _ = child.start_kill();
                child.wait().await.ok()
            }
        };
        debug!("batch {}: worker exited with {status:?}", batch.id);

        Ok(ProcessExit {
            finished,
            status,
            stderr_tail,
        })
    }
}

struct ProcessExit {
    finished: bool,
    status: Option<ExitStatus>,
    stderr_tail: String,
}

/// Replays a worker's stderr through the controller's logger and returns its last lines.
async fn replay_stderr(batch_id: &str, stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_EVIDENCE_LINES);
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(target: "hostbatch_runner::worker", "[{batch_id}] {line}");
                if tail.len() == STDERR_EVIDENCE_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(error) => {
                debug!("[{batch_id}] error reading worker stderr: {error}");
                break;
            }
        }
    }
    tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Forwards results into the pool's channel, remembering which cases have been reported.
struct ChannelSink {
    sender: mpsc::Sender<CaseResult>,
    reported: HashSet<String>,
    closed: bool,
}

impl ChannelSink {
    fn new(sender: mpsc::Sender<CaseResult>) -> Self {
        Self {
            sender,
            reported: HashSet::new(),
            closed: false,
        }
    }
}

impl ResultSink for ChannelSink {
    async fn submit(&mut self, result: CaseResult) -> Result<(), ResultSinkError> {
        self.reported.insert(result.case_id.clone());
        if self.sender.send(result).await.is_err() {
            self.closed = true;
            return Err(ResultSinkError::Closed);
        }
        Ok(())
    }
}

/// Writes results to stdout as protocol messages.
struct StdoutSink {
    stdout: tokio::io::Stdout,
}

impl ResultSink for StdoutSink {
    async fn submit(&mut self, result: CaseResult) -> Result<(), ResultSinkError> {
        let message = WorkerMessage::CaseFinished {
            result: Box::new(result),
        };
        write_message(&mut self.stdout, &message).await?;
        Ok(())
    }
}

/// The entry point of a worker process.
///
/// Reads one [`WorkerRequest`] from stdin, runs the batch, and reports results on stdout. The
/// batch is cancelled if the controller sends [`ControlMessage::Cancel`], closes stdin, or if the
/// worker receives a shutdown signal.
pub fn run_worker(signal_handler: SignalHandlerKind) -> Result<(), WorkerEntryError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(WorkerEntryError::Runtime)?;
    runtime.block_on(worker_main(signal_handler))
}

async fn worker_main(signal_handler: SignalHandlerKind) -> Result<(), WorkerEntryError> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let line = stdin
        .next_line()
        .await
        .map_err(WorkerEntryError::ReadRequest)?
        .ok_or(WorkerEntryError::NoRequest)?;
    let request: WorkerRequest = parse_message(&line).map_err(WorkerEntryError::ParseRequest)?;
    let mut signals = signal_handler.build()?;

    let (handle, mut cancel) = cancel_pair();
    let batch_id = request.batch.id.clone();
    if cancel_already_buffered(stdin.get_ref().buffer()) {
        debug!("[{batch_id}] cancelled by the controller before the batch started");
        handle.cancel();
    }
    let control = tokio::spawn(async move {
        let mut signals_done = false;
        loop {
            tokio::select! {
                line = stdin.next_line() => {
                    match line {
                        Ok(Some(line)) => match parse_message::<ControlMessage>(&line) {
                            Ok(ControlMessage::Cancel) => {
                                debug!("[{batch_id}] cancelled by the controller");
                                break;
                            }
                            Err(error) => warn!("[{batch_id}] ignoring invalid control message: {error}"),
                        },
                        Ok(None) => {
                            debug!("[{batch_id}] controller closed stdin");
                            break;
                        }
                        Err(error) => {
                            warn!("[{batch_id}] error reading stdin: {error}");
                            break;
                        }
                    }
                }
                event = signals.recv(), if !signals_done => {
                    match event {
                        Some(event) => {
                            info!("[{batch_id}] received {}, cancelling", event.name());
                            break;
                        }
                        None => signals_done = true,
                    }
                }
            }
        }
        handle.cancel();
    });

    let dispatcher = Dispatcher::new(request.batch.profile.kind, request.settings);
    let mut sink = StdoutSink {
        stdout: tokio::io::stdout(),
    };
    let result = dispatcher
        .run_batch(&request.batch, &mut cancel, &mut sink)
        .await;
    control.abort();
    result.map_err(WorkerEntryError::Report)?;

    write_message(&mut sink.stdout, &WorkerMessage::BatchFinished)
        .await
        .map_err(|error| WorkerEntryError::Report(error.into()))
}

/// Returns true if a cancel message arrived together with the request and is already buffered.
fn cancel_already_buffered(buffered: &[u8]) -> bool {
    String::from_utf8_lossy(buffered)
        .lines()
        .any(|line| matches!(parse_message::<ControlMessage>(line), Ok(ControlMessage::Cancel)))
}
