//! Process supervision for external language servers.
//!
//! [`ServerProcess`] owns the OS handle of one spawned server. It performs no
//! protocol logic: the client state machine sends `shutdown`/`exit` itself
//! and then asks this module to wait for the process to go away.
//!
//! Two termination policies exist:
//! - [`ServerProcess::await_termination`] is used by an orderly stop. On
//!   timeout the process is left alone to exit on its own.
//! - [`ServerProcess::terminate`] is used to roll back a failed start. It
//!   escalates SIGTERM then SIGKILL so no partially started process survives.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::error::{ClientError, ClientResult};

const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Executable, arguments and environment of a server launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl ServerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Shell-like rendering for logs and debug info.
    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Whether `path` is a regular file the current user may execute.
pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Search `PATH` for an executable called `name`.
///
/// Names containing a path separator are checked directly.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|full| is_executable(full))
}

/// Resolve a server executable.
///
/// A configured path wins and must be executable; otherwise `name` is looked
/// up on `PATH`, and the bundled fallback is tried last.
pub fn find_executable(
    configured: Option<&Path>,
    name: &str,
    bundled: Option<&Path>,
) -> ClientResult<PathBuf> {
    if let Some(path) = configured {
        if is_executable(path) {
            return Ok(path.to_path_buf());
        }
        return Err(ClientError::spawn(
            path.display().to_string(),
            "configured executable does not exist or is not executable",
        ));
    }
    if let Some(found) = find_on_path(name) {
        return Ok(found);
    }
    if let Some(path) = bundled.filter(|p| is_executable(p)) {
        return Ok(path.to_path_buf());
    }
    Err(ClientError::spawn(name, "executable not found on PATH"))
}

/// Where per-run logfiles go and how they are named.
#[derive(Debug, Clone)]
pub struct LogfileSpec {
    pub dir: PathBuf,
    pub prefix: String,
    /// TCP port used as the file key; the PID is used when absent.
    pub port: Option<u16>,
}

impl LogfileSpec {
    /// `<dir>/<prefix>_<key>_<stream>.log`
    pub fn path_for(&self, key: &str, stream: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}_{}.log", self.prefix, key, stream))
    }
}

/// How the child's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    /// stdin/stdout carry the protocol; stderr goes to a logfile.
    Pipes,
    /// The protocol runs over TCP; stdout and stderr both go to logfiles.
    LogOnly,
}

/// A spawned server process.
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
    pid: u32,
    program: String,
    logfiles: Vec<PathBuf>,
    stdio: Option<(ChildStdout, ChildStdin)>,
    log_tasks: Vec<JoinHandle<()>>,
}

impl ServerProcess {
    /// Spawn `command` and start copying its diagnostic streams to logfiles.
    ///
    /// Fails with `Spawn` if the executable cannot be started; nothing is
    /// retained in that case.
    pub async fn spawn(
        command: &ServerCommand,
        logs: &LogfileSpec,
        mode: StdioMode,
    ) -> ClientResult<Self> {
        let program = command.display();
        debug!(target: "tsunagi::process", "Spawning {}", program);

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        match mode {
            StdioMode::Pipes => cmd.stdin(Stdio::piped()),
            StdioMode::LogOnly => cmd.stdin(Stdio::null()),
        };
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ClientError::spawn(program.clone(), e.to_string()))?;
        let pid = child.id().unwrap_or_default();
        let key = match logs.port {
            Some(port) => port.to_string(),
            None => pid.to_string(),
        };

        let stderr = child.stderr.take();
        let stdout = child.stdout.take();
        let stdin = child.stdin.take();

        let mut logfiles = Vec::new();
        let mut log_tasks = Vec::new();

        // stderr capture starts before anything else can fail.
        if let Some(stderr) = stderr {
            capture(stderr, logs.path_for(&key, "stderr"), &mut logfiles, &mut log_tasks).await;
        }

        let stdio = match (mode, stdout, stdin) {
            (StdioMode::Pipes, Some(stdout), Some(stdin)) => Some((stdout, stdin)),
            (StdioMode::LogOnly, Some(stdout), _) => {
                capture(stdout, logs.path_for(&key, "stdout"), &mut logfiles, &mut log_tasks).await;
                None
            }
            _ => None,
        };
        if mode == StdioMode::Pipes && stdio.is_none() {
            let _ = child.start_kill();
            return Err(ClientError::spawn(
                program,
                "child stdio pipes were not available",
            ));
        }

        info!(target: "tsunagi::process", "Started {} (pid {})", program, pid);
        Ok(Self {
            child,
            pid,
            program,
            logfiles,
            stdio,
            log_tasks,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn logfiles(&self) -> &[PathBuf] {
        &self.logfiles
    }

    /// Hand the protocol pipes (stdout, stdin) to a transport. Only once.
    pub fn take_stdio(&mut self) -> Option<(ChildStdout, ChildStdin)> {
        self.stdio.take()
    }

    /// Non-blocking liveness probe.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait for the process to exit, bounded by `timeout`.
    ///
    /// On timeout the process is deliberately not killed.
    pub async fn await_termination(&mut self, timeout: Duration) -> ClientResult<ExitStatus> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(
                    target: "tsunagi::process",
                    "{} (pid {}) exited with {}",
                    self.program,
                    self.pid,
                    status
                );
                self.drain_log_tasks().await;
                Ok(status)
            }
            Ok(Err(e)) => Err(ClientError::Io(e)),
            Err(_) => {
                warn!(
                    target: "tsunagi::process",
                    "{} (pid {}) still running after {:?}; leaving it to exit on its own",
                    self.program,
                    self.pid,
                    timeout
                );
                Err(ClientError::TerminationTimeout {
                    pid: self.pid,
                    timeout,
                })
            }
        }
    }

    /// Stop the process unconditionally: SIGTERM, then SIGKILL after `grace`.
    pub async fn terminate(&mut self, grace: Duration) {
        if !self.is_running() {
            return;
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Ok(raw) = i32::try_from(self.pid) {
                if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                    debug!(
                        target: "tsunagi::process",
                        "SIGTERM to pid {} failed: {}",
                        self.pid,
                        e
                    );
                }
            }
            if tokio::time::timeout(grace, self.child.wait()).await.is_ok() {
                self.drain_log_tasks().await;
                return;
            }
        }
        #[cfg(not(unix))]
        let _ = grace;

        warn!(
            target: "tsunagi::process",
            "Killing {} (pid {})",
            self.program,
            self.pid
        );
        if let Err(e) = self.child.kill().await {
            warn!(
                target: "tsunagi::process",
                "Failed to kill pid {}: {}",
                self.pid,
                e
            );
        }
        self.drain_log_tasks().await;
    }

    async fn drain_log_tasks(&mut self) {
        for task in self.log_tasks.drain(..) {
            // A grandchild may still hold the pipe open.
            let _ = tokio::time::timeout(LOG_DRAIN_TIMEOUT, task).await;
        }
    }
}

async fn capture<R>(
    stream: R,
    path: PathBuf,
    logfiles: &mut Vec<PathBuf>,
    tasks: &mut Vec<JoinHandle<()>>,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    match tokio::fs::File::create(&path).await {
        Ok(mut file) => {
            let mut stream = stream;
            let task_path = path.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = tokio::io::copy(&mut stream, &mut file).await {
                    debug!(
                        target: "tsunagi::process",
                        "Stopped copying to {}: {}",
                        task_path.display(),
                        e
                    );
                }
            }));
            logfiles.push(path);
        }
        Err(e) => warn!(
            target: "tsunagi::process",
            "Cannot create logfile {}: {}",
            path.display(),
            e
        ),
    }
}

/// Delete logfiles, ignoring ones that are already gone.
pub fn remove_logfiles(paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(target: "tsunagi::process", "Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                target: "tsunagi::process",
                "Failed to remove logfile {}: {}",
                path.display(),
                e
            ),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn logs(dir: &Path) -> LogfileSpec {
        LogfileSpec {
            dir: dir.to_path_buf(),
            prefix: "test_server".into(),
            port: None,
        }
    }

    #[test]
    fn command_display_joins_program_and_args() {
        let command = ServerCommand::new("/usr/bin/clangd")
            .arg("-limit-results=500")
            .env("RUSTC", "rustc");
        assert_eq!(command.display(), "/usr/bin/clangd -limit-results=500");
        assert_eq!(command.env, vec![("RUSTC".to_string(), "rustc".to_string())]);
    }

    #[test]
    fn find_executable_prefers_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("server");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(find_executable(Some(&exe), "sh", None).unwrap(), exe);
    }

    #[test]
    fn find_executable_rejects_non_executable_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_exec");
        std::fs::write(&file, "").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = find_executable(Some(&file), "sh", None).unwrap_err();
        assert!(matches!(err, ClientError::Spawn { .. }));
    }

    #[test]
    fn find_executable_searches_path_then_bundled() {
        assert!(find_executable(None, "sh", None).unwrap().ends_with("sh"));

        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("bundled-server");
        std::fs::write(&bundled, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bundled, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(
            find_executable(None, "no-such-server-xyz", Some(&bundled)).unwrap(),
            bundled
        );
        assert!(find_executable(None, "no-such-server-xyz", None).is_err());
    }

    #[tokio::test]
    async fn spawn_missing_executable_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let command = ServerCommand::new("/nonexistent/server-xyz");
        let err = ServerProcess::spawn(&command, &logs(dir.path()), StdioMode::Pipes)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Spawn { .. }));
    }

    #[tokio::test]
    async fn stderr_is_copied_to_pid_named_logfile() {
        let dir = tempfile::tempdir().unwrap();
        let command = ServerCommand::new("sh").args(["-c", "echo boom >&2"]);
        let mut process = ServerProcess::spawn(&command, &logs(dir.path()), StdioMode::Pipes)
            .await
            .unwrap();

        let expected = dir
            .path()
            .join(format!("test_server_{}_stderr.log", process.pid()));
        assert_eq!(process.logfiles(), [expected.clone()]);

        process
            .await_termination(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&expected).unwrap(), "boom\n");

        remove_logfiles(process.logfiles());
        assert!(!expected.exists());
        remove_logfiles(process.logfiles());
    }

    #[tokio::test]
    async fn log_only_mode_uses_port_key_and_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let spec = LogfileSpec {
            port: Some(4242),
            ..logs(dir.path())
        };
        let command = ServerCommand::new("sh").args(["-c", "echo out; echo err >&2"]);
        let mut process = ServerProcess::spawn(&command, &spec, StdioMode::LogOnly)
            .await
            .unwrap();
        assert!(process.take_stdio().is_none());
        process
            .await_termination(Duration::from_secs(5))
            .await
            .unwrap();

        let stdout = dir.path().join("test_server_4242_stdout.log");
        let stderr = dir.path().join("test_server_4242_stderr.log");
        assert_eq!(std::fs::read_to_string(stdout).unwrap(), "out\n");
        assert_eq!(std::fs::read_to_string(stderr).unwrap(), "err\n");
    }

    #[tokio::test]
    async fn await_termination_times_out_without_killing() {
        let dir = tempfile::tempdir().unwrap();
        let command = ServerCommand::new("sleep").arg("30");
        let mut process = ServerProcess::spawn(&command, &logs(dir.path()), StdioMode::Pipes)
            .await
            .unwrap();

        let err = process
            .await_termination(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::TerminationTimeout { .. }));
        assert!(process.is_running());

        process.terminate(Duration::from_secs(2)).await;
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn terminate_is_noop_for_exited_process() {
        let dir = tempfile::tempdir().unwrap();
        let command = ServerCommand::new("true");
        let mut process = ServerProcess::spawn(&command, &logs(dir.path()), StdioMode::Pipes)
            .await
            .unwrap();
        process
            .await_termination(Duration::from_secs(5))
            .await
            .unwrap();
        process.terminate(Duration::from_millis(10)).await;
        assert!(!process.is_running());
    }
}
