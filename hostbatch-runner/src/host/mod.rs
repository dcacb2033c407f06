// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Launching and supervising host processes.
//!
//! A host is started in its own process group on Unix (and, on Linux, asks to be killed when its
//! parent dies), or inside a job object on Windows. Either way, terminating a [`HostHandle`] takes
//! down everything the host spawned, and dropping one without terminating it kills the host.

#[cfg(unix)]
#[path = "unix.rs"]
mod os;

#[cfg(windows)]
#[path = "windows.rs"]
mod os;

use crate::{
    config::HostSettings,
    errors::LaunchError,
    registry::{HostProfile, TestCase},
    stopwatch::{StopwatchStart, stopwatch},
};
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::NamedUtf8TempFile;
use chrono::{DateTime, FixedOffset, Local};
use hostbatch_metadata::HostKind;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, io::Write, process::Stdio, time::Duration};
use tokio::process::Child;
use tracing::{debug, warn};

/// Environment variable holding the path of the log file the host should write.
pub const LOG_PATH_ENV: &str = "HOSTBATCH_LOG_PATH";
/// Environment variable holding the id of the batch being run.
pub const BATCH_ID_ENV: &str = "HOSTBATCH_BATCH_ID";
/// Environment variable holding the attempt number, starting at 1.
pub const ATTEMPT_ENV: &str = "HOSTBATCH_ATTEMPT";

/// Environment variables named, but never expanded, in rerun hints.
const RERUN_PASSTHROUGH_ENV: [&str; 2] = ["PYTHON", "PYTHONPATH"];

/// How a host process ended.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum HostExit {
    /// The host exited on its own with this code.
    Exited(i32),
    /// The host was terminated by this signal, without us asking.
    Signaled(i32),
    /// We killed the host.
    Killed,
}

impl HostExit {
    /// Returns the exit code, if the host exited on its own.
    pub fn code(self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(code),
            Self::Signaled(_) | Self::Killed => None,
        }
    }

    /// Returns true if the host exited with code 0.
    pub fn is_success(self) -> bool {
        self == Self::Exited(0)
    }
}

/// Something that can report whether a host has exited without blocking.
///
/// The log monitor only needs this much of a host.
pub trait HostProbe {
    /// Returns how the host exited, or `None` if it is still running.
    fn try_exit(&mut self) -> Option<HostExit>;
}

/// A record of one host lifetime.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct HostRun {
    /// The process id of the host.
    pub host_pid: u32,
    /// When the host was started.
    pub started_at: DateTime<FixedOffset>,
    /// When the host was observed to have ended, if it has.
    pub ended_at: Option<DateTime<FixedOffset>>,
    /// The exit code, or `None` if the host was killed or has not exited.
    pub exit_code: Option<i32>,
    /// The log file the host was told to write.
    pub log_path: Utf8PathBuf,
}

/// Everything needed to start one host lifetime.
#[derive(Copy, Clone, Debug)]
pub struct LaunchRequest<'a> {
    /// The host profile shared by the cases.
    pub profile: &'a HostProfile,
    /// The cases this host lifetime runs, in order.
    pub cases: &'a [TestCase],
    /// Where the host should write its log.
    pub log_path: &'a Utf8Path,
    /// Where the host's stdout and stderr go.
    pub output_path: &'a Utf8Path,
    /// The id of the batch.
    pub batch_id: &'a str,
    /// The attempt number, starting at 1.
    pub attempt: u32,
}

/// Starts hosts of one kind.
#[derive(Clone, Debug)]
pub struct HostLauncher {
    kind: HostKind,
    settings: HostSettings,
    working_dir: Utf8PathBuf,
}

impl HostLauncher {
    /// Creates a launcher for hosts of `kind`.
    ///
    /// `working_dir` is used unless the settings name one of their own.
    pub fn new(kind: HostKind, settings: HostSettings, working_dir: &Utf8Path) -> Self {
        let working_dir = match &settings.working_dir {
            Some(dir) => working_dir.join(dir),
            None => working_dir.to_owned(),
        };
        Self {
            kind,
            settings,
            working_dir,
        }
    }

    /// Returns the working directory hosts are started in.
    pub fn working_dir(&self) -> &Utf8Path {
        &self.working_dir
    }

    /// Builds the command for a host lifetime without starting it.
    ///
    /// Editor hosts running more than one script get their script and case lists through
    /// temporary files, which live as long as the returned command.
    pub fn command(&self, req: &LaunchRequest<'_>) -> Result<HostCommand, LaunchError> {
        let program = self
            .settings
            .program
            .clone()
            .ok_or(LaunchError::NoProgram { kind: self.kind })?;

        let mut list_files = Vec::new();
        let scripts = if self.kind == HostKind::Editor && req.cases.len() > 1 {
            let dir = req.log_path.parent().unwrap_or(Utf8Path::new("."));
            let scripts = write_list_file(
                dir,
                "scripts",
                req.cases.iter().map(|case| case.script_path.as_str()),
            )?;
            let names = write_list_file(dir, "cases", req.cases.iter().map(|case| case.id.as_str()))?;
            let paths = (scripts.path().to_owned(), names.path().to_owned());
            list_files.push(scripts);
            list_files.push(names);
            ScriptsArg::ListFiles {
                scripts: paths.0,
                cases: paths.1,
            }
        } else {
            ScriptsArg::Inline(req.cases)
        };

        let args = host_args(
            self.kind,
            &self.settings,
            req.profile,
            req.cases,
            &scripts,
            req.log_path,
        );

        let mut env = self.settings.env.clone();
        env.extend(
            req.profile
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        env.insert(LOG_PATH_ENV.to_owned(), req.log_path.to_string());
        env.insert(BATCH_ID_ENV.to_owned(), req.batch_id.to_owned());
        env.insert(ATTEMPT_ENV.to_owned(), req.attempt.to_string());

        Ok(HostCommand {
            program,
            args,
            env,
            working_dir: self.working_dir.clone(),
            log_path: req.log_path.to_owned(),
            output_path: req.output_path.to_owned(),
            list_files,
        })
    }

    /// Returns a single line that reproduces `case` on another machine, run from
    /// `workspace_root`.
    ///
    /// Scripts inside `workspace_root` are named relative to it. `PYTHON` and `PYTHONPATH` are
    /// passed through by name so the line doesn't depend on the environment it was generated in.
    pub fn rerun_line(&self, case: &TestCase, workspace_root: &Utf8Path) -> String {
        let mut case = case.clone();
        if let Ok(relative) = case.script_path.strip_prefix(workspace_root) {
            case.script_path = relative.to_owned();
        }
        let case = &case;

        let program = self
            .settings
            .program
            .as_deref()
            .unwrap_or_else(|| self.kind.as_str());
        let log_path = Utf8PathBuf::from(format!("{}.log", case.id));
        let args = host_args(
            self.kind,
            &self.settings,
            &case.profile,
            std::slice::from_ref(case),
            &ScriptsArg::Inline(std::slice::from_ref(case)),
            &log_path,
        );

        let mut parts: Vec<String> = RERUN_PASSTHROUGH_ENV
            .iter()
            .map(|name| format!("{name}=\"${{{name}}}\""))
            .collect();
        let mut env = self.settings.env.clone();
        env.extend(case.profile.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.insert(LOG_PATH_ENV.to_owned(), log_path.to_string());
        for (key, value) in &env {
            parts.push(format!("{key}={}", shell_words::quote(value)));
        }
        parts.push(shell_words::quote(program).into_owned());
        parts.extend(args.iter().map(|arg| shell_words::quote(arg).into_owned()));
        parts.join(" ")
    }

    /// Starts a host lifetime.
    ///
    /// Any stale log at the target path is removed first, so the log monitor only ever sees lines
    /// from this lifetime.
    pub fn launch(&self, req: &LaunchRequest<'_>) -> Result<HostHandle, LaunchError> {
        let command = self.command(req)?;
        command.spawn()
    }
}

/// A fully built host command.
pub struct HostCommand {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Utf8PathBuf,
    log_path: Utf8PathBuf,
    output_path: Utf8PathBuf,
    list_files: Vec<NamedUtf8TempFile>,
}

impl fmt::Debug for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("working_dir", &self.working_dir)
            .field("log_path", &self.log_path)
            .finish_non_exhaustive()
    }
}

impl HostCommand {
    /// Returns the program.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the environment variables set for the host, on top of the inherited ones.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    fn spawn(self) -> Result<HostHandle, LaunchError> {
        for path in [&self.log_path, &self.output_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|error| LaunchError::Prepare {
                    path: parent.to_owned(),
                    error,
                })?;
            }
        }
        match std::fs::remove_file(&self.log_path) {
            Ok(()) => debug!("removed stale host log {}", self.log_path),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(LaunchError::Prepare {
                    path: self.log_path.clone(),
                    error,
                });
            }
        }

        let prepare = |error| LaunchError::Prepare {
            path: self.output_path.clone(),
            error,
        };
        let stdout = std::fs::File::create(&self.output_path).map_err(prepare)?;
        let stderr = stdout.try_clone().map_err(prepare)?;

        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        os::configure_command(&mut cmd);

        let mut cmd = tokio::process::Command::from(cmd);
        cmd.kill_on_drop(true);

        // If creating a job fails, we might be on an old system. Job objects are best-effort.
        let job = os::create_job().ok();

        let child = cmd.spawn().map_err(|error| LaunchError::Spawn {
            program: self.program.clone(),
            error,
        })?;
        let pid = child.id().unwrap_or_default();

        // If assigning the child to the job fails, ignore this. This can happen if the process
        // has exited.
        let _ = os::assign_process_to_job(&child, job.as_ref());

        debug!(
            "launched host `{}` (pid {pid}) with args {:?}",
            self.program, self.args
        );

        Ok(HostHandle {
            child,
            pid,
            program: self.program,
            log_path: self.log_path,
            output_path: self.output_path,
            stopwatch: stopwatch(),
            exit: None,
            ended_at: None,
            job,
            _list_files: self.list_files,
        })
    }
}

/// A running (or exited) host process.
///
/// Dropping the handle kills the host and its process group if it is still running.
pub struct HostHandle {
    child: Child,
    pid: u32,
    program: String,
    log_path: Utf8PathBuf,
    output_path: Utf8PathBuf,
    stopwatch: StopwatchStart,
    exit: Option<HostExit>,
    ended_at: Option<DateTime<FixedOffset>>,
    job: Option<os::Job>,
    _list_files: Vec<NamedUtf8TempFile>,
}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHandle")
            .field("pid", &self.pid)
            .field("program", &self.program)
            .field("exit", &self.exit)
            .finish_non_exhaustive()
    }
}

impl HostHandle {
    /// Returns the process id of the host.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns the path of the host's log file.
    pub fn log_path(&self) -> &Utf8Path {
        &self.log_path
    }

    /// Returns the path of the file capturing the host's stdout and stderr.
    pub fn output_path(&self) -> &Utf8Path {
        &self.output_path
    }

    /// Returns how the host exited, if it has been observed to exit.
    pub fn exit_code(&self) -> Option<HostExit> {
        self.exit
    }

    /// Waits up to `timeout` for the host to exit.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Option<HostExit> {
        if let Some(exit) = self.exit {
            return Some(exit);
        }
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => Some(self.record_exit(os::exit_from_status(status))),
            Ok(Err(error)) => {
                warn!("error waiting for host `{}`: {error}", self.program);
                None
            }
            Err(_) => None,
        }
    }

    /// Asks the host to exit, waits up to `grace_period`, then kills its whole process group.
    ///
    /// Returns how the host ended. A host that exits within the grace period keeps its own exit
    /// status; otherwise this returns [`HostExit::Killed`].
    pub async fn terminate(&mut self, grace_period: Duration) -> HostExit {
        if let Some(exit) = self.try_exit() {
            // The host is gone, but its children may not be.
            os::kill_group_now(self.pid, self.job.as_ref());
            return exit;
        }

        debug!(
            "terminating host `{}` (pid {}) with a grace period of {grace_period:?}",
            self.program, self.pid
        );
        let exited =
            os::terminate_child(&mut self.child, self.pid, self.job.as_ref(), grace_period).await;
        match exited {
            Some(status) => self.record_exit(os::exit_from_status(status)),
            None => {
                // Reap the child so it doesn't linger as a zombie.
                let _ = self.child.wait().await;
                self.record_exit(HostExit::Killed)
            }
        }
    }

    /// Kills the host and its process group immediately.
    pub async fn kill(&mut self) -> HostExit {
        self.terminate(Duration::ZERO).await
    }

    /// Returns a record of this host lifetime.
    pub fn host_run(&self) -> HostRun {
        HostRun {
            host_pid: self.pid,
            started_at: self.stopwatch.snapshot().start_time,
            ended_at: self.ended_at,
            exit_code: self.exit.and_then(HostExit::code),
            log_path: self.log_path.clone(),
        }
    }

    fn record_exit(&mut self, exit: HostExit) -> HostExit {
        if self.exit.is_none() {
            self.exit = Some(exit);
            self.ended_at = Some(Local::now().fixed_offset());
            debug!(
                "host `{}` (pid {}) ended after {:?}: {exit:?}",
                self.program,
                self.pid,
                self.stopwatch.snapshot().duration
            );
        }
        self.exit.unwrap_or(exit)
    }
}

impl HostProbe for HostHandle {
    fn try_exit(&mut self) -> Option<HostExit> {
        if let Some(exit) = self.exit {
            return Some(exit);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => Some(self.record_exit(os::exit_from_status(status))),
            Ok(None) => None,
            Err(error) => {
                warn!("error polling host `{}`: {error}", self.program);
                None
            }
        }
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        if self.exit != Some(HostExit::Killed) {
            os::kill_group_now(self.pid, self.job.as_ref());
        }
    }
}

enum ScriptsArg<'a> {
    Inline(&'a [TestCase]),
    ListFiles {
        scripts: Utf8PathBuf,
        cases: Utf8PathBuf,
    },
}

fn host_args(
    kind: HostKind,
    settings: &HostSettings,
    profile: &HostProfile,
    cases: &[TestCase],
    scripts: &ScriptsArg<'_>,
    log_path: &Utf8Path,
) -> Vec<String> {
    let mut args = settings.args.clone();
    args.extend(profile.args.iter().cloned());

    if !kind.is_editor() {
        if let ScriptsArg::Inline(cases) = scripts {
            args.extend(cases.iter().map(|case| case.script_path.to_string()));
        }
        return args;
    }

    if settings.null_renderer {
        args.push("-rhi=null".to_owned());
    }
    if cases.iter().any(|case| case.attach_debugger) {
        args.push("--attach-debugger".to_owned());
    }
    if cases.iter().any(|case| case.wait_for_debugger) {
        args.push("--wait-for-debugger".to_owned());
    }

    match scripts {
        ScriptsArg::Inline(cases) => {
            let joined = cases
                .iter()
                .map(|case| case.script_path.as_str())
                .collect::<Vec<_>>()
                .join(";");
            args.push("-runpythontest".to_owned());
            args.push(joined);
            if kind == HostKind::Editor {
                if let [case] = cases {
                    args.push(format!("-pythontestcase={}", case.id));
                }
            }
        }
        ScriptsArg::ListFiles {
            scripts,
            cases: case_file,
        } => {
            args.push("-runpythontest".to_owned());
            args.push(scripts.to_string());
            args.push("-pythontestcase".to_owned());
            args.push(case_file.to_string());
        }
    }

    args.push("-logfile".to_owned());
    args.push(log_path.to_string());
    args
}

fn write_list_file<'a>(
    dir: &Utf8Path,
    prefix: &str,
    entries: impl Iterator<Item = &'a str>,
) -> Result<NamedUtf8TempFile, LaunchError> {
    let prepare = |error| LaunchError::Prepare {
        path: dir.to_owned(),
        error,
    };
    std::fs::create_dir_all(dir).map_err(prepare)?;
    let mut file = camino_tempfile::Builder::new()
        .prefix(&format!("hostbatch-{prefix}-"))
        .suffix(".txt")
        .tempfile_in(dir)
        .map_err(prepare)?;
    let contents = entries.collect::<Vec<_>>().join(";");
    file.write_all(contents.as_bytes()).map_err(prepare)?;
    file.flush().map_err(prepare)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{case_defaults, descriptor};
    use crate::registry::TestRegistry;
    use pretty_assertions::assert_eq;

    fn cases(kind: HostKind, ids: &[&str]) -> Vec<TestCase> {
        let registry = TestRegistry::from_descriptors(
            Utf8Path::new("suite.json"),
            "suite",
            Utf8Path::new("/suites"),
            ids.iter().map(|id| {
                let mut d = descriptor(id);
                d.host_kind = kind;
                d.host_env.insert("RHI_DEVICE".to_owned(), "warp".to_owned());
                d
            }),
            &case_defaults(),
        )
        .unwrap();
        registry.iter().cloned().collect()
    }

    fn editor_settings() -> HostSettings {
        HostSettings {
            program: Some("/opt/o3de/bin/Editor".to_owned()),
            args: vec!["-BatchMode".to_owned(), "-autotest_mode".to_owned()],
            null_renderer: true,
            ..Default::default()
        }
    }

    fn request<'a>(cases: &'a [TestCase], log_path: &'a Utf8Path) -> LaunchRequest<'a> {
        LaunchRequest {
            profile: &cases[0].profile,
            cases,
            log_path,
            output_path: log_path,
            batch_id: "0123abcd",
            attempt: 2,
        }
    }

    #[test]
    fn editor_single_case_command() {
        let mut cases = cases(HostKind::Editor, &["viewport"]);
        cases[0].attach_debugger = true;
        let launcher = HostLauncher::new(HostKind::Editor, editor_settings(), Utf8Path::new("/ws"));
        let log = Utf8PathBuf::from("/store/logs/editor.log");
        let command = launcher.command(&request(&cases, &log)).unwrap();

        assert_eq!(command.program(), "/opt/o3de/bin/Editor");
        assert_eq!(
            command.args(),
            [
                "-BatchMode",
                "-autotest_mode",
                "-rhi=null",
                "--attach-debugger",
                "-runpythontest",
                "/suites/viewport.sh",
                "-pythontestcase=viewport",
                "-logfile",
                "/store/logs/editor.log",
            ]
        );
        assert_eq!(command.env()[LOG_PATH_ENV], "/store/logs/editor.log");
        assert_eq!(command.env()[BATCH_ID_ENV], "0123abcd");
        assert_eq!(command.env()[ATTEMPT_ENV], "2");
        assert_eq!(command.env()["RHI_DEVICE"], "warp");
    }

    #[test]
    fn editor_batch_uses_list_files() {
        let dir = camino_tempfile::tempdir().unwrap();
        let cases = cases(HostKind::Editor, &["a", "b"]);
        let launcher = HostLauncher::new(HostKind::Editor, editor_settings(), dir.path());
        let log = dir.path().join("editor.log");
        let command = launcher.command(&request(&cases, &log)).unwrap();

        let args = command.args();
        let pos = args.iter().position(|a| a == "-runpythontest").unwrap();
        let scripts = std::fs::read_to_string(&args[pos + 1]).unwrap();
        assert_eq!(scripts, "/suites/a.sh;/suites/b.sh");
        assert_eq!(args[pos + 2], "-pythontestcase");
        let names = std::fs::read_to_string(&args[pos + 3]).unwrap();
        assert_eq!(names, "a;b");
    }

    #[test]
    fn material_editor_joins_scripts() {
        let cases = cases(HostKind::MaterialEditor, &["a", "b"]);
        let launcher = HostLauncher::new(HostKind::MaterialEditor, editor_settings(), Utf8Path::new("/ws"));
        let log = Utf8PathBuf::from("/store/me.log");
        let command = launcher.command(&request(&cases, &log)).unwrap();
        assert!(
            command
                .args()
                .windows(2)
                .any(|w| w == ["-runpythontest", "/suites/a.sh;/suites/b.sh"]),
            "args: {:?}",
            command.args()
        );
    }

    #[test]
    fn generic_appends_scripts() {
        let cases = cases(HostKind::Generic, &["a", "b"]);
        let settings = HostSettings {
            program: Some("/bin/sh".to_owned()),
            args: vec!["-e".to_owned()],
            ..Default::default()
        };
        let launcher = HostLauncher::new(HostKind::Generic, settings, Utf8Path::new("/ws"));
        let log = Utf8PathBuf::from("/store/generic.log");
        let command = launcher.command(&request(&cases, &log)).unwrap();
        assert_eq!(command.args(), ["-e", "/suites/a.sh", "/suites/b.sh"]);
    }

    #[test]
    fn missing_program_is_a_launch_error() {
        let cases = cases(HostKind::Maya, &["a"]);
        let launcher = HostLauncher::new(HostKind::Maya, HostSettings::default(), Utf8Path::new("/ws"));
        let log = Utf8PathBuf::from("/store/maya.log");
        let error = launcher.command(&request(&cases, &log)).unwrap_err();
        assert!(matches!(error, LaunchError::NoProgram { kind: HostKind::Maya }));
    }

    #[test]
    fn rerun_line_names_env_without_expanding() {
        let cases = cases(HostKind::Editor, &["viewport"]);
        let launcher = HostLauncher::new(HostKind::Editor, editor_settings(), Utf8Path::new("/ws"));
        let line = launcher.rerun_line(&cases[0], Utf8Path::new("/ws"));
        assert!(
            line.starts_with("PYTHON=\"${PYTHON}\" PYTHONPATH=\"${PYTHONPATH}\" "),
            "line: {line}"
        );
        assert_eq!(
            shell_words::split(&line).unwrap(),
            [
                "PYTHON=${PYTHON}",
                "PYTHONPATH=${PYTHONPATH}",
                "HOSTBATCH_LOG_PATH=viewport.log",
                "RHI_DEVICE=warp",
                "/opt/o3de/bin/Editor",
                "-BatchMode",
                "-autotest_mode",
                "-rhi=null",
                "-runpythontest",
                "/suites/viewport.sh",
                "-pythontestcase=viewport",
                "-logfile",
                "viewport.log",
            ]
        );
    }

    #[test]
    fn rerun_line_names_workspace_scripts_relatively() {
        let cases = cases(HostKind::Generic, &["joints"]);
        let settings = HostSettings {
            program: Some("/bin/sh".to_owned()),
            ..Default::default()
        };
        let launcher = HostLauncher::new(HostKind::Generic, settings, Utf8Path::new("/suites"));
        let line = launcher.rerun_line(&cases[0], Utf8Path::new("/suites"));
        let words = shell_words::split(&line).unwrap();
        assert_eq!(words.last().map(String::as_str), Some("joints.sh"), "line: {line}");
        assert!(!line.contains("/suites"), "line: {line}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_kills_a_stuck_host() {
        let dir = camino_tempfile::tempdir().unwrap();
        let cases = cases(HostKind::Generic, &["stuck"]);
        let settings = HostSettings {
            program: Some("/bin/sh".to_owned()),
            args: vec!["-c".to_owned(), "trap '' TERM; sleep 30".to_owned()],
            ..Default::default()
        };
        let launcher = HostLauncher::new(HostKind::Generic, settings, dir.path());
        let log = dir.path().join("host.log");
        let out = dir.path().join("host.out");
        let mut req = request(&cases, &log);
        req.output_path = &out;

        let mut handle = launcher.launch(&req).unwrap();
        assert_eq!(handle.try_exit(), None);
        assert_eq!(handle.wait_timeout(Duration::from_millis(50)).await, None);

        let exit = handle.terminate(Duration::from_millis(200)).await;
        assert_eq!(exit, HostExit::Killed);
        assert_eq!(handle.host_run().exit_code, None);
        assert!(handle.host_run().ended_at.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_code_is_recorded() {
        let dir = camino_tempfile::tempdir().unwrap();
        let cases = cases(HostKind::Generic, &["quick"]);
        let settings = HostSettings {
            program: Some("/bin/sh".to_owned()),
            args: vec!["-c".to_owned(), "echo hello; exit 15".to_owned()],
            ..Default::default()
        };
        let launcher = HostLauncher::new(HostKind::Generic, settings, dir.path());
        let log = dir.path().join("host.log");
        let out = dir.path().join("host.out");
        let mut req = request(&cases, &log);
        req.output_path = &out;

        let mut handle = launcher.launch(&req).unwrap();
        let exit = handle.wait_timeout(Duration::from_secs(10)).await;
        assert_eq!(exit, Some(HostExit::Exited(15)));
        assert_eq!(handle.host_run().exit_code, Some(15));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello\n");
    }
}
