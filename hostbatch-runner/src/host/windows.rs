// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::HostExit;
use std::{process::ExitStatus, time::Duration};
use tokio::process::Child;
pub(super) use win32job::Job;
use win32job::JobError;
use windows_sys::Win32::System::JobObjects::TerminateJobObject;

pub(super) fn configure_command(_cmd: &mut std::process::Command) {
    // Supervision on Windows happens through the job object, after spawning.
}

pub(super) fn create_job() -> Result<Job, JobError> {
    // Kill every process in the job when the last handle to it (ours) is closed, so a worker
    // that dies never leaves a host behind.
    Job::create_with_limit_info(
        win32job::ExtendedLimitInfo::new()
            .limit_breakaway_ok()
            .limit_kill_on_job_close(),
    )
}

pub(super) fn assign_process_to_job(child: &Child, job: Option<&Job>) -> Result<(), JobError> {
    if let Some(job) = job {
        let handle = match child.raw_handle() {
            Some(handle) => handle,
            None => {
                // If the handle is missing, the child has exited. Ignore this.
                return Ok(());
            }
        };

        job.assign_process(handle as isize)?;
    }

    Ok(())
}

pub(super) fn exit_from_status(status: ExitStatus) -> HostExit {
    match status.code() {
        Some(code) => HostExit::Exited(code),
        None => HostExit::Killed,
    }
}

/// Terminates every process in the host's job.
pub(super) fn kill_group_now(_pid: u32, job: Option<&Job>) {
    if let Some(job) = job {
        let handle = job.handle();
        unsafe {
            // Ignore the error here -- it's likely due to the process exiting.
            // Note: 1 is the exit code returned by Windows.
            _ = TerminateJobObject(handle as _, 1);
        }
    }
}

/// Waits up to `grace_period` for the host to exit, then terminates its job.
///
/// Windows has no SIGTERM: hosts are expected to notice the console interrupt on their own.
pub(super) async fn terminate_child(
    child: &mut Child,
    _pid: u32,
    job: Option<&Job>,
    grace_period: Duration,
) -> Option<ExitStatus> {
    let exited = if grace_period.is_zero() {
        None
    } else {
        tokio::select! {
            status = child.wait() => status.ok(),
            () = tokio::time::sleep(grace_period) => None,
        }
    };

    // In any case, always terminate the job to ensure other processes spawned by the host are
    // killed.
    kill_group_now(0, job);

    if exited.is_none() {
        let _ = child.start_kill();
    }
    exited
}
