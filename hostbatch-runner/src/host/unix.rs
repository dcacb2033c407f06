// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::HostExit;
use libc::{SIGKILL, SIGTERM};
use std::{
    convert::Infallible,
    os::unix::process::{CommandExt, ExitStatusExt},
    process::ExitStatus,
    time::Duration,
};
use tokio::process::Child;

/// Pre-execution configuration on Unix.
///
/// This puts the host in a process group of its own. On Linux the host is also killed if the
/// thread that spawned it goes away, so a worker that dies never leaves a host behind.
pub(super) fn configure_command(cmd: &mut std::process::Command) {
    cmd.process_group(0);

    #[cfg(target_os = "linux")]
    unsafe {
        // SAFETY: prctl is async-signal-safe.
        cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[derive(Debug)]
pub(super) struct Job(());

pub(super) fn create_job() -> Result<Job, Infallible> {
    Ok(Job(()))
}

pub(super) fn assign_process_to_job(_child: &Child, _job: Option<&Job>) -> Result<(), Infallible> {
    Ok(())
}

pub(super) fn exit_from_status(status: ExitStatus) -> HostExit {
    match (status.code(), status.signal()) {
        (Some(code), _) => HostExit::Exited(code),
        (None, Some(signal)) => HostExit::Signaled(signal),
        // Neither a code nor a signal: treat it like a kill.
        (None, None) => HostExit::Killed,
    }
}

/// Sends SIGKILL to the host's process group.
pub(super) fn kill_group_now(pid: u32, _job: Option<&Job>) {
    if pid == 0 {
        return;
    }
    unsafe {
        libc::kill(-(pid as libc::pid_t), SIGKILL);
    }
}

/// Sends SIGTERM to the host's process group and waits up to `grace_period` for the host to
/// exit, then sends SIGKILL.
///
/// Returns the exit status if the host exited within the grace period.
pub(super) async fn terminate_child(
    child: &mut Child,
    pid: u32,
    job: Option<&Job>,
    grace_period: Duration,
) -> Option<ExitStatus> {
    if child.id().is_none() || pid == 0 {
        return child.wait().await.ok();
    }

    if grace_period.is_zero() {
        kill_group_now(pid, job);
        return None;
    }

    unsafe {
        libc::kill(-(pid as libc::pid_t), SIGTERM);
    }

    tokio::select! {
        status = child.wait() => {
            // The host exited, but it may have left children in its group behind.
            kill_group_now(pid, job);
            status.ok()
        }
        () = tokio::time::sleep(grace_period) => {
            // The process didn't exit -- need to do a hard shutdown.
            kill_group_now(pid, job);
            None
        }
    }
}
