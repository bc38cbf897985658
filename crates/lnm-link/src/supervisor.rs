//! Launching and watching the `lightningd` child process.
//!
//! The supervisor is owned by the link actor and is only asked to act when
//! nothing answers on the RPC socket. It decides the program and argument
//! vector from `ConnectionConfig`, stages binaries once if this is a first
//! start, spawns the child and hands it to a watcher task. The watcher logs
//! the daemon's output, keeps the last lines for diagnosis, and reports the
//! exit back to the actor as an `ActorEvent::DaemonExited`.
//!
//! # Panic-Free Guarantees
//!
//! - Spawn failures are returned as `DaemonSpawnError`
//! - Exit reports to a stopped actor are dropped silently

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lnm_core::{ConnectionConfig, DaemonExitError, DaemonSpawnError};

use crate::link::ActorEvent;
use crate::staging::BinaryStager;

/// Environment override for the daemon executable.
pub const LIGHTNINGD_ENV: &str = "LNM_LIGHTNINGD";

/// Executable name looked up when no path is configured.
pub const DAEMON_PROGRAM: &str = "lightningd";

/// Output lines kept for exit classification.
pub const OUTPUT_TAIL_LINES: usize = 200;

/// How long the daemon gets to exit after SIGTERM.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// How long to keep reading output after the daemon has exited.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// Output fragments that mean the daemon cannot reach its upstream node
/// with the configured credentials.
const CREDENTIAL_SIGNATURES: &[&str] = &[
    "could not locate rpc credentials",
    "incorrect rpcuser or rpcpassword",
    "rpcpassword is not set",
];

// ============================================================================
// Command Line
// ============================================================================

/// Resolves the daemon executable.
///
/// Order: configured path, `LNM_LIGHTNINGD`, a `lightningd` next to the
/// running executable, then `lightningd` on `PATH`.
pub fn resolve_daemon_binary(config: &ConnectionConfig) -> PathBuf {
    resolve_with_env(config, std::env::var_os(LIGHTNINGD_ENV))
}

fn resolve_with_env(config: &ConnectionConfig, env_override: Option<OsString>) -> PathBuf {
    if let Some(path) = &config.lightningd_path {
        return path.clone();
    }
    if let Some(path) = env_override.filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DAEMON_PROGRAM)))
        .filter(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from(DAEMON_PROGRAM))
}

fn flag(name: &str, value: impl AsRef<OsStr>) -> OsString {
    let mut arg = OsString::from(format!("--{name}="));
    arg.push(value);
    arg
}

/// Builds the daemon's argument vector.
pub fn build_arguments(config: &ConnectionConfig) -> Vec<OsString> {
    let mut args = vec![
        flag("network", config.network.as_str()),
        flag("lightning-dir", config.effective_lightning_dir()),
        flag("pid-file", config.effective_pid_file()),
        flag("rpc-file", &config.socket_path),
        flag("log-level", &config.log_level),
    ];

    if let Some(upstream) = &config.upstream {
        if let Some(cli) = &upstream.cli_path {
            args.push(flag("bitcoin-cli", cli));
        }
        if let Some(dir) = &upstream.data_dir {
            args.push(flag("bitcoin-datadir", dir));
        }
        if let Some(host) = &upstream.rpc_connect {
            args.push(flag("bitcoin-rpcconnect", host));
        }
        if let Some(port) = upstream.rpc_port {
            args.push(flag("bitcoin-rpcport", port.to_string()));
        }
        if let Some(user) = &upstream.rpc_user {
            args.push(flag("bitcoin-rpcuser", user));
        }
        if let Some(password) = &upstream.rpc_password {
            args.push(flag("bitcoin-rpcpassword", password));
        }
    }

    if let Some(address) = &config.external_address {
        args.push(flag("announce-addr", address));
    }

    args.push(flag(
        "allow-deprecated-apis",
        if config.allow_deprecated_apis { "true" } else { "false" },
    ));
    args
}

/// Renders arguments for logging with secrets masked.
fn redacted(args: &[OsString]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            let arg = arg.to_string_lossy();
            if arg.starts_with("--bitcoin-rpcpassword=") {
                "--bitcoin-rpcpassword=***".to_string()
            } else {
                arg.into_owned()
            }
        })
        .collect()
}

/// Classifies a daemon exit from its status code and captured output.
pub fn classify_exit(code: Option<i32>, output: &[String]) -> DaemonExitError {
    let credentials = output.iter().any(|line| {
        let line = line.to_lowercase();
        CREDENTIAL_SIGNATURES.iter().any(|sig| line.contains(sig))
    });
    if credentials {
        DaemonExitError::CredentialsMissing
    } else {
        DaemonExitError::UnexpectedExit(code)
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Result of asking the supervisor to make sure a daemon is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LaunchOutcome {
    Launched { pid: Option<u32> },
    AlreadySupervised,
    Throttled { remaining: Duration },
}

#[derive(Debug)]
struct Supervised {
    launch: u64,
    pid: Option<u32>,
    stop: CancellationToken,
}

/// Owns at most one `lightningd` child at a time.
pub(crate) struct DaemonSupervisor {
    config: Arc<ConnectionConfig>,
    stager: Box<dyn BinaryStager>,
    staged: bool,
    staged_program: Option<PathBuf>,
    relaunch_delay: Duration,
    last_launch: Option<Instant>,
    launches: u64,
    current: Option<Supervised>,
    events: mpsc::UnboundedSender<ActorEvent>,
    cancel: CancellationToken,
}

impl DaemonSupervisor {
    pub(crate) fn new(
        config: Arc<ConnectionConfig>,
        stager: Box<dyn BinaryStager>,
        relaunch_delay: Duration,
        events: mpsc::UnboundedSender<ActorEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            stager,
            staged: false,
            staged_program: None,
            relaunch_delay,
            last_launch: None,
            launches: 0,
            current: None,
            events,
            cancel,
        }
    }

    /// PID of the supervised daemon, if one is running.
    pub(crate) fn pid(&self) -> Option<u32> {
        self.current.as_ref().and_then(|c| c.pid)
    }

    /// Launches the daemon unless one is already supervised or the last
    /// launch was too recent.
    pub(crate) fn ensure_running(&mut self) -> Result<LaunchOutcome, DaemonSpawnError> {
        if self.current.is_some() {
            return Ok(LaunchOutcome::AlreadySupervised);
        }

        let now = Instant::now();
        if let Some(last) = self.last_launch {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.relaunch_delay {
                return Ok(LaunchOutcome::Throttled {
                    remaining: self.relaunch_delay.saturating_sub(elapsed),
                });
            }
        }
        self.last_launch = Some(now);

        self.stage()?;

        let program = self
            .staged_program
            .clone()
            .unwrap_or_else(|| resolve_daemon_binary(&self.config));
        let args = build_arguments(&self.config);

        let lightning_dir = self.config.effective_lightning_dir();
        std::fs::create_dir_all(&lightning_dir).map_err(|e| {
            DaemonSpawnError::LaunchFailed(format!(
                "cannot create {}: {e}",
                lightning_dir.display()
            ))
        })?;

        debug!(program = %program.display(), args = ?redacted(&args), "Launching daemon");

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    DaemonSpawnError::ExecNotFound(program.display().to_string())
                }
                _ => DaemonSpawnError::LaunchFailed(format!("{}: {e}", program.display())),
            })?;

        self.launches = self.launches.saturating_add(1);
        let launch = self.launches;
        let pid = child.id();
        let stop = self.cancel.child_token();
        tokio::spawn(watch_process(child, launch, self.events.clone(), stop.clone()));
        self.current = Some(Supervised { launch, pid, stop });

        info!(launch, pid = ?pid, program = %program.display(), "Daemon launched");
        Ok(LaunchOutcome::Launched { pid })
    }

    fn stage(&mut self) -> Result<(), DaemonSpawnError> {
        if self.staged || !self.config.first_start {
            return Ok(());
        }
        let staged_program = self
            .stager
            .prepare_daemon_binary()
            .map_err(|e| DaemonSpawnError::LaunchFailed(format!("staging failed: {e}")))?;
        if let Some(program) = &staged_program {
            info!(program = %program.display(), "Daemon binaries staged");
        }
        self.staged_program = staged_program;
        self.staged = true;
        Ok(())
    }

    /// Records the exit of launch `launch`.
    ///
    /// Returns the classified exit, or `None` for a launch that is no longer
    /// the supervised one.
    pub(crate) fn on_exit(
        &mut self,
        launch: u64,
        code: Option<i32>,
        output: &[String],
    ) -> Option<DaemonExitError> {
        match &self.current {
            Some(current) if current.launch == launch => {}
            _ => return None,
        }
        self.current = None;
        Some(classify_exit(code, output))
    }

    /// Forgets the last launch time so the next request launches at once.
    pub(crate) fn reset_throttle(&mut self) {
        self.last_launch = None;
    }

    /// Stops the supervised daemon, if any.
    pub(crate) fn shutdown(&mut self) {
        if let Some(current) = self.current.take() {
            info!(launch = current.launch, pid = ?current.pid, "Stopping daemon");
            current.stop.cancel();
        }
    }
}

// ============================================================================
// Process Watcher
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Line-by-line reader over both output pipes of the child.
struct OutputCapture {
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    stderr: Option<Lines<BufReader<ChildStderr>>>,
    tail: VecDeque<String>,
}

impl OutputCapture {
    fn new(child: &mut Child) -> Self {
        Self {
            stdout: child.stdout.take().map(|s| BufReader::new(s).lines()),
            stderr: child.stderr.take().map(|s| BufReader::new(s).lines()),
            tail: VecDeque::with_capacity(OUTPUT_TAIL_LINES),
        }
    }

    fn is_open(&self) -> bool {
        self.stdout.is_some() || self.stderr.is_some()
    }

    /// Reads the next line from whichever pipe has one.
    ///
    /// Never completes once both pipes are closed.
    async fn pump(&mut self) {
        let (line, stream) = tokio::select! {
            line = next_line(&mut self.stdout) => (line, Stream::Stdout),
            line = next_line(&mut self.stderr) => (line, Stream::Stderr),
        };

        match (line, stream) {
            (Some(line), stream) => {
                debug!(target: "lightningd", stream = ?stream, "{line}");
                if self.tail.len() >= OUTPUT_TAIL_LINES {
                    self.tail.pop_front();
                }
                self.tail.push_back(line);
            }
            (None, Stream::Stdout) => self.stdout = None,
            (None, Stream::Stderr) => self.stderr = None,
        }
    }

    fn into_tail(self) -> Vec<String> {
        self.tail.into()
    }
}

async fn next_line<R>(lines: &mut Option<Lines<R>>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    match lines {
        Some(reader) => reader.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

async fn watch_process(
    mut child: Child,
    launch: u64,
    events: mpsc::UnboundedSender<ActorEvent>,
    stop: CancellationToken,
) {
    let mut output = OutputCapture::new(&mut child);

    let status = loop {
        tokio::select! {
            _ = stop.cancelled() => {
                terminate(&mut child).await;
                return;
            }
            status = child.wait() => break status,
            _ = output.pump(), if output.is_open() => {}
        }
    };

    let _ = timeout(OUTPUT_DRAIN, async {
        while output.is_open() {
            output.pump().await;
        }
    })
    .await;

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(launch, error = %e, "Failed to collect daemon exit status");
            None
        }
    };
    warn!(launch, code = ?code, "Daemon exited");

    let _ = events.send(ActorEvent::DaemonExited {
        launch,
        code,
        output: output.into_tail(),
    });
}

/// Asks the child to stop, then kills it after the grace period.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            // SAFETY: `pid` is our own child, which has not been reaped yet.
            let result = unsafe { libc::kill(pid, libc::SIGTERM) };
            if result == 0 {
                if let Ok(status) = timeout(TERMINATE_GRACE, child.wait()).await {
                    debug!(pid, status = ?status, "Daemon stopped");
                    return;
                }
                warn!(pid, "Daemon ignored SIGTERM, killing");
            }
        }
    }

    if let Err(e) = child.kill().await {
        debug!(error = %e, "Failed to kill daemon");
    }
}
