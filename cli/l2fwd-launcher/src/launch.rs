//! Forwarder process launch and supervision.
//!
//! Builds the fixed l2fwd argument vector and runs the forwarder as a child:
//! - Executable lookup on PATH
//! - Sudo credential check ahead of the spawn
//! - Spawning through the elevation strategy
//! - Signal forwarding (SIGTERM, SIGINT, SIGHUP)
//! - Exit status capture
//!
//! A nonzero exit from the forwarder is returned as data, never as an error.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::config::ForwarderConfig;
use crate::error::LaunchError;
use crate::privilege::Elevation;

/// EAL core list option.
pub const CORE_LIST_FLAG: &str = "-l";
/// EAL memory channel option.
pub const MEMORY_CHANNELS_FLAG: &str = "-n";
/// Separates EAL options from application options.
pub const APP_ARGS_DELIMITER: &str = "--";
/// Application port mask option.
pub const PORT_MASK_FLAG: &str = "-p";
/// Application queues-per-lcore option.
pub const QUEUES_FLAG: &str = "-q";

/// A single forwarder invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    executable: String,
    cores: String,
    memory_channels: u32,
    port_mask: u64,
    queues: u32,
}

impl LaunchSpec {
    pub fn from_config(config: &ForwarderConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            cores: config.cores.clone(),
            memory_channels: config.memory_channels,
            port_mask: config.port_mask,
            queues: config.queues,
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    /// Positional arguments: the EAL block, the delimiter, then the
    /// application block. The forwarder's parser depends on this order.
    pub fn args(&self) -> Vec<String> {
        vec![
            CORE_LIST_FLAG.to_string(),
            self.cores.clone(),
            MEMORY_CHANNELS_FLAG.to_string(),
            self.memory_channels.to_string(),
            APP_ARGS_DELIMITER.to_string(),
            PORT_MASK_FLAG.to_string(),
            format!("{:#x}", self.port_mask),
            QUEUES_FLAG.to_string(),
            self.queues.to_string(),
        ]
    }

    /// Human-readable command line, for logs only.
    pub fn command_line(&self) -> String {
        std::iter::once(self.executable.clone())
            .chain(self.args())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How the forwarder terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    /// Exit code, if the child exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the child was killed.
    pub signal: Option<i32>,
}

impl ChildExit {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Shell-style exit code: the child's code, or 128 + signal.
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        }
    }
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Runs a [`LaunchSpec`] to completion.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, spec: &LaunchSpec) -> Result<ChildExit, LaunchError>;
}

/// Log the command line, run it, and report how the child ended.
pub async fn launch(
    runner: &dyn ProcessRunner,
    spec: &LaunchSpec,
) -> Result<ChildExit, LaunchError> {
    info!(executable = spec.executable(), "launching forwarder");

    let exit = runner.run(spec).await?;

    info!(
        code = ?exit.code,
        signal = ?exit.signal,
        "forwarder exited with {exit}"
    );
    Ok(exit)
}

/// Runner that spawns the real forwarder.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    elevation: Elevation,
    search_path: Option<OsString>,
}

impl SystemRunner {
    /// Runner searching the process PATH.
    pub fn new(elevation: Elevation) -> Self {
        Self {
            elevation,
            search_path: None,
        }
    }

    /// Runner searching `path` instead of the process PATH.
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// Full argv the forwarder is started with, elevation prefix included.
    fn invocation(&self, program: &str, spec: &LaunchSpec) -> Vec<String> {
        self.elevation.argv(program, &spec.args())
    }

    /// Have sudo validate the caller's credentials. A refusal is a
    /// [`LaunchError::SpawnFailed`], never a child exit status.
    async fn check_credentials(&self) -> Result<(), LaunchError> {
        let Some(argv) = self.elevation.credential_check() else {
            return Ok(());
        };
        let spawn_failed = |source: io::Error| LaunchError::SpawnFailed {
            program: argv[0].clone(),
            source,
        };

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::inherit())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(spawn_failed)?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = match stderr.trim() {
            "" => format!("{} exited with {}", argv.join(" "), output.status),
            stderr => stderr.to_string(),
        };
        Err(spawn_failed(io::Error::new(
            io::ErrorKind::PermissionDenied,
            detail,
        )))
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, spec: &LaunchSpec) -> Result<ChildExit, LaunchError> {
        let search_path = self.search_path.clone().or_else(|| env::var_os("PATH"));
        let program = resolve_executable(spec.executable(), search_path.as_deref())?;
        let program = program.to_string_lossy().into_owned();

        self.check_credentials().await?;

        let argv = self.invocation(&program, spec);
        info!(command = %argv.join(" "), "starting forwarder");

        // Install before spawning so no signal is missed.
        let forwarder = match SignalForwarder::install() {
            Ok(forwarder) => Some(forwarder),
            Err(e) => {
                warn!(error = %e, "signal forwarding unavailable");
                None
            }
        };

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| LaunchError::SpawnFailed {
                program: program.clone(),
                source,
            })?;

        info!(pid = child.id(), program = %program, "forwarder started");

        let status = match forwarder {
            Some(mut forwarder) => forwarder.wait(&mut child).await,
            None => child.wait().await,
        }
        .map_err(LaunchError::Wait)?;

        Ok(ChildExit::from(status))
    }
}

/// Relays termination signals received by the launcher to the child.
struct SignalForwarder {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
    sighup: tokio::signal::unix::Signal,
}

impl SignalForwarder {
    fn install() -> io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            sighup: signal(SignalKind::hangup())?,
        })
    }

    async fn wait(&mut self, child: &mut Child) -> io::Result<ExitStatus> {
        let Some(raw_pid) = child.id() else {
            return child.wait().await;
        };
        let pid = Pid::from_raw(raw_pid as i32);

        loop {
            let sig = tokio::select! {
                status = child.wait() => return status,
                _ = self.sigterm.recv() => Signal::SIGTERM,
                _ = self.sigint.recv() => Signal::SIGINT,
                _ = self.sighup.recv() => Signal::SIGHUP,
            };

            info!(pid = raw_pid, signal = ?sig, "forwarding signal to forwarder");
            if let Err(e) = kill(pid, sig) {
                warn!(pid = raw_pid, error = %e, "failed to forward signal");
            }
        }
    }
}

/// Locate `name` the way a shell would: paths containing `/` are used as
/// given, bare names are searched in each `search_path` entry.
pub fn resolve_executable(
    name: &str,
    search_path: Option<&OsStr>,
) -> Result<PathBuf, LaunchError> {
    let not_found = || LaunchError::ExecutableNotFound {
        name: name.to_string(),
    };

    if name.contains('/') {
        let path = PathBuf::from(name);
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(not_found())
        };
    }

    let search_path = search_path.ok_or_else(not_found)?;
    env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(not_found)
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Scripted response of a [`MockRunner`].
#[derive(Debug, Clone)]
enum MockOutcome {
    Exit(ChildExit),
    NotFound,
}

/// Mock runner for testing.
#[derive(Debug)]
pub struct MockRunner {
    outcome: MockOutcome,
    calls: Mutex<Vec<LaunchSpec>>,
}

impl MockRunner {
    /// Create a mock runner whose child exits with `code`.
    pub fn exiting(code: i32) -> Self {
        Self {
            outcome: MockOutcome::Exit(ChildExit::exited(code)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock runner whose executable cannot be found.
    pub fn missing_executable() -> Self {
        Self {
            outcome: MockOutcome::NotFound,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Specs received so far.
    pub fn calls(&self) -> Vec<LaunchSpec> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::exiting(0)
    }
}

#[async_trait]
impl ProcessRunner for MockRunner {
    async fn run(&self, spec: &LaunchSpec) -> Result<ChildExit, LaunchError> {
        self.calls.lock().unwrap().push(spec.clone());
        info!(command = %spec.command_line(), "[MOCK] running forwarder");

        match &self.outcome {
            MockOutcome::Exit(exit) => Ok(*exit),
            MockOutcome::NotFound => Err(LaunchError::ExecutableNotFound {
                name: spec.executable().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Link `name` in `dir` to a system binary such as `true` or `false`.
    fn link_binary(dir: &Path, name: &str, binary: &str) -> PathBuf {
        let target = ["/bin", "/usr/bin"]
            .iter()
            .map(|prefix| Path::new(prefix).join(binary))
            .find(|path| path.exists())
            .unwrap();
        let path = dir.join(name);
        std::os::unix::fs::symlink(target, &path).unwrap();
        path
    }

    /// A freshly written script can briefly fail with ETXTBSY while another
    /// test thread is forking.
    async fn launch_retrying(
        runner: &SystemRunner,
        spec: &LaunchSpec,
    ) -> Result<ChildExit, LaunchError> {
        for _ in 0..10 {
            match launch(runner, spec).await {
                Err(LaunchError::SpawnFailed { source, .. })
                    if source.raw_os_error() == Some(nix::errno::Errno::ETXTBSY as i32) =>
                {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                }
                other => return other,
            }
        }
        panic!("script stayed busy");
    }

    fn fake_sudo(path: PathBuf) -> Elevation {
        Elevation::Sudo {
            program: path.to_string_lossy().into_owned(),
            non_interactive: true,
        }
    }

    #[test]
    fn test_default_args_are_fixed() {
        let spec = LaunchSpec::from_config(&ForwarderConfig::default());
        assert_eq!(
            spec.args(),
            vec!["-l", "0-1", "-n", "4", "--", "-p", "0x3", "-q", "1"]
        );
        assert_eq!(spec.args(), spec.args());
    }

    #[test]
    fn test_command_line() {
        let spec = LaunchSpec::from_config(&ForwarderConfig::default());
        assert_eq!(
            spec.command_line(),
            "dpdk-l2fwd -l 0-1 -n 4 -- -p 0x3 -q 1"
        );
    }

    #[test]
    fn test_port_mask_rendered_as_hex() {
        let spec = LaunchSpec::from_config(&ForwarderConfig {
            port_mask: 255,
            ..ForwarderConfig::default()
        });
        assert_eq!(spec.args()[6], "0xff");
    }

    #[test]
    fn test_child_exit_codes() {
        assert!(ChildExit::exited(0).success());
        assert!(!ChildExit::exited(1).success());
        assert_eq!(ChildExit::exited(3).exit_code(), 3);
        assert_eq!(ChildExit::signaled(15).exit_code(), 143);
        assert_eq!(ChildExit::signaled(9).to_string(), "signal 9");
    }

    #[test]
    fn test_resolve_on_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let script = link_binary(dir.path(), "dpdk-l2fwd", "true");

        let resolved = resolve_executable("dpdk-l2fwd", Some(dir.path().as_os_str())).unwrap();
        assert_eq!(resolved, script);
    }

    #[test]
    fn test_resolve_skips_non_executable() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dpdk-l2fwd"), "not a program").unwrap();

        let err = resolve_executable("dpdk-l2fwd", Some(dir.path().as_os_str())).unwrap_err();
        assert!(matches!(err, LaunchError::ExecutableNotFound { .. }));
    }

    #[test]
    fn test_resolve_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let script = link_binary(dir.path(), "fwd", "true");

        let resolved = resolve_executable(script.to_str().unwrap(), None).unwrap();
        assert_eq!(resolved, script);

        let missing = dir.path().join("absent");
        assert!(resolve_executable(missing.to_str().unwrap(), None).is_err());
    }

    #[tokio::test]
    async fn test_system_runner_reports_nonzero_exit_as_data() {
        let dir = tempfile::tempdir().unwrap();
        link_binary(dir.path(), "dpdk-l2fwd", "false");

        let runner = SystemRunner::new(Elevation::Direct).with_search_path(dir.path());
        let spec = LaunchSpec::from_config(&ForwarderConfig::default());

        let exit = launch(&runner, &spec).await.unwrap();
        assert_eq!(exit, ChildExit::exited(1));
    }

    #[tokio::test]
    async fn test_system_runner_passes_args_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("argv");
        write_script(
            dir.path(),
            "dpdk-l2fwd",
            &format!("printf '%s\\n' \"$@\" > '{}'", out.display()),
        );

        let runner = SystemRunner::new(Elevation::Direct).with_search_path(dir.path());
        let spec = LaunchSpec::from_config(&ForwarderConfig::default());
        let exit = launch_retrying(&runner, &spec).await.unwrap();
        assert!(exit.success());

        let recorded: Vec<String> = fs::read_to_string(&out)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(recorded, spec.args());
    }

    #[test]
    fn test_invocation_includes_sudo_prefix() {
        let runner = SystemRunner::new(Elevation::Sudo {
            program: "sudo".to_string(),
            non_interactive: false,
        });
        let spec = LaunchSpec::from_config(&ForwarderConfig::default());

        assert_eq!(
            runner.invocation("/usr/bin/dpdk-l2fwd", &spec).join(" "),
            "sudo /usr/bin/dpdk-l2fwd -l 0-1 -n 4 -- -p 0x3 -q 1"
        );
        assert_eq!(
            SystemRunner::new(Elevation::Direct).invocation("dpdk-l2fwd", &spec)[0],
            "dpdk-l2fwd"
        );
    }

    #[tokio::test]
    async fn test_sudo_refusal_is_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).unwrap();
        link_binary(&bin, "dpdk-l2fwd", "true");
        let sudo = write_script(
            dir.path(),
            "sudo",
            "echo 'sudo: a password is required' >&2\nexit 1",
        );

        let runner = SystemRunner::new(fake_sudo(sudo)).with_search_path(&bin);
        let spec = LaunchSpec::from_config(&ForwarderConfig::default());

        let err = launch_retrying(&runner, &spec).await.unwrap_err();
        match err {
            LaunchError::SpawnFailed { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
                assert!(source.to_string().contains("a password is required"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_sudo_runs_forwarder_after_credential_check() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).unwrap();
        let forwarder = link_binary(&bin, "dpdk-l2fwd", "false");
        let log = dir.path().join("sudo.log");
        let sudo = write_script(
            dir.path(),
            "sudo",
            &format!(
                "printf '%s\\n' \"$*\" >> '{}'\n[ \"$1\" = -n ] && shift\n[ \"$1\" = -v ] && exit 0\nexec \"$@\"",
                log.display()
            ),
        );

        let runner = SystemRunner::new(fake_sudo(sudo)).with_search_path(&bin);
        let spec = LaunchSpec::from_config(&ForwarderConfig::default());

        let exit = launch_retrying(&runner, &spec).await.unwrap();
        assert_eq!(exit, ChildExit::exited(1));

        let calls: Vec<String> = fs::read_to_string(&log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(calls.first().map(String::as_str), Some("-n -v"));
        assert_eq!(
            calls.last(),
            Some(&format!(
                "-n {} -l 0-1 -n 4 -- -p 0x3 -q 1",
                forwarder.display()
            ))
        );
    }

    #[tokio::test]
    async fn test_system_runner_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SystemRunner::new(Elevation::Direct).with_search_path(dir.path());
        let spec = LaunchSpec::from_config(&ForwarderConfig::default());

        let err = launch(&runner, &spec).await.unwrap_err();
        assert_eq!(err.reason_code(), "executable_not_found");
    }

    #[tokio::test]
    async fn test_mock_runner_records_calls() {
        let runner = MockRunner::exiting(7);
        let spec = LaunchSpec::from_config(&ForwarderConfig::default());

        let exit = launch(&runner, &spec).await.unwrap();
        assert_eq!(exit.exit_code(), 7);
        assert_eq!(runner.calls(), vec![spec]);
    }
}
