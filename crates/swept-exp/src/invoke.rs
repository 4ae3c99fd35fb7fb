use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use serde::{Deserialize, Serialize};
use swept_core::errors::{ErrorInfo, SweepError};

use crate::cancel::CancelToken;
use crate::outcome::{CapturedStream, OutcomeStatus, RunOutcome};
use crate::space::RunConfig;

/// Default cap on captured bytes per output stream.
pub const DEFAULT_CAPTURE_LIMIT: usize = 1 << 20;

/// Executes exactly one attempt of a run configuration.
///
/// Implementations never retry; the scheduler owns retry policy.
pub trait Invoke: Send + Sync {
    fn invoke(&self, config: &RunConfig, cancel: &CancelToken) -> RunOutcome;
}

impl<T: Invoke + ?Sized> Invoke for &T {
    fn invoke(&self, config: &RunConfig, cancel: &CancelToken) -> RunOutcome {
        (**self).invoke(config, cancel)
    }
}

/// Multi-process launcher used when more than one process is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherSpec {
    #[serde(default = "LauncherSpec::default_program")]
    pub program: String,
    #[serde(default = "LauncherSpec::default_np_flag")]
    pub np_flag: String,
}

impl LauncherSpec {
    fn default_program() -> String {
        "mpirun".to_string()
    }

    fn default_np_flag() -> String {
        "-np".to_string()
    }
}

impl Default for LauncherSpec {
    fn default() -> Self {
        Self {
            program: Self::default_program(),
            np_flag: Self::default_np_flag(),
        }
    }
}

/// Everything needed to turn a [`RunConfig`] into a process.
#[derive(Debug, Clone)]
pub struct InvokerSettings {
    /// Directory holding one solver binary per equation.
    pub binary_dir: PathBuf,
    /// Resolved equation-spec file per equation name.
    pub equation_specs: BTreeMap<String, PathBuf>,
    /// Directory the solver writes its results into.
    pub output_dir: PathBuf,
    pub nproc: u32,
    pub launcher: LauncherSpec,
    /// Extra launcher arguments, passed through verbatim.
    pub launcher_opts: Vec<String>,
    pub timeout: Duration,
    pub capture_limit: usize,
    /// Time between a graceful terminate and a forceful kill.
    pub grace: Duration,
    pub poll_interval: Duration,
}

impl InvokerSettings {
    pub fn new(binary_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary_dir: binary_dir.into(),
            equation_specs: BTreeMap::new(),
            output_dir: output_dir.into(),
            nproc: 1,
            launcher: LauncherSpec::default(),
            launcher_opts: Vec::new(),
            timeout: Duration::from_secs(600),
            capture_limit: DEFAULT_CAPTURE_LIMIT,
            grace: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
        }
    }

    /// Builds the ordered argument vector for one run.
    pub fn invocation(&self, config: &RunConfig) -> Result<Invocation, SweepError> {
        let eqspec = self.equation_specs.get(&config.equation).ok_or_else(|| {
            SweepError::InvalidSpec(
                ErrorInfo::new(
                    "missing_equation_spec",
                    format!("no equation spec for {}", config.equation),
                )
                .with_context("equation", config.equation.clone()),
            )
        })?;
        let binary = self.binary_dir.join(&config.equation);

        let mut solver: Vec<OsString> = Vec::with_capacity(14);
        solver.push(binary.into_os_string());
        solver.push(config.scheme.clone().into());
        solver.push(eqspec.clone().into_os_string());
        solver.push(self.output_dir.clone().into_os_string());
        solver.extend(config.solver_args().into_iter().map(OsString::from));

        if self.nproc > 1 {
            let mut args: Vec<OsString> = vec![
                self.launcher.np_flag.clone().into(),
                self.nproc.to_string().into(),
            ];
            args.extend(self.launcher_opts.iter().map(OsString::from));
            args.extend(solver);
            Ok(Invocation {
                program: self.launcher.program.clone().into(),
                args,
            })
        } else {
            let mut solver = solver.into_iter();
            let program = solver.next().unwrap_or_default();
            Ok(Invocation {
                program,
                args: solver.collect(),
            })
        }
    }
}

/// A program and its arguments, never joined into a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Runs the external solver as a child process.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    settings: InvokerSettings,
}

enum WaitEnd {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
    WaitFailed(String),
}

impl ProcessInvoker {
    pub fn new(settings: InvokerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &InvokerSettings {
        &self.settings
    }

    fn wait(&self, child: &mut Child, started: Instant, cancel: &CancelToken) -> WaitEnd {
        let deadline = started + self.settings.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    // Background helpers left in the group would keep our pipes open.
                    signal_group(child, Signal::Kill);
                    return WaitEnd::Exited(status);
                }
                Ok(None) => {}
                Err(err) => {
                    self.terminate(child);
                    return WaitEnd::WaitFailed(err.to_string());
                }
            }
            if cancel.is_cancelled() {
                self.terminate(child);
                return WaitEnd::Cancelled;
            }
            if Instant::now() >= deadline {
                self.terminate(child);
                return WaitEnd::TimedOut;
            }
            thread::sleep(self.settings.poll_interval);
        }
    }

    /// Asks the process group to stop, then kills it once the grace period lapses.
    fn terminate(&self, child: &mut Child) {
        signal_group(child, Signal::Terminate);
        let deadline = Instant::now() + self.settings.grace;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() >= deadline => {
                    signal_group(child, Signal::Kill);
                    let _ = child.kill();
                    break;
                }
                Ok(None) => thread::sleep(self.settings.poll_interval),
                Err(_) => {
                    let _ = child.kill();
                    break;
                }
            }
        }
        // Stragglers that ignored the terminate still hold our pipes open.
        signal_group(child, Signal::Kill);
        let _ = child.wait();
    }
}

impl Invoke for ProcessInvoker {
    fn invoke(&self, config: &RunConfig, cancel: &CancelToken) -> RunOutcome {
        if cancel.is_cancelled() {
            return RunOutcome::not_started(config.clone(), OutcomeStatus::Cancelled);
        }
        let invocation = match self.settings.invocation(config) {
            Ok(invocation) => invocation,
            Err(err) => {
                tracing::error!(%config, error = %err, "cannot build solver command");
                return RunOutcome::not_started(
                    config.clone(),
                    OutcomeStatus::SpawnFailed {
                        cause: err.to_string(),
                    },
                );
            }
        };

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        tracing::debug!(%config, command = %invocation, "launching solver");
        let started = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                tracing::error!(%config, command = %invocation, error = %err, "solver failed to start");
                return RunOutcome::not_started(
                    config.clone(),
                    OutcomeStatus::SpawnFailed {
                        cause: format!("{}: {}", invocation.program.to_string_lossy(), err),
                    },
                );
            }
        };

        let limit = self.settings.capture_limit;
        let stdout = child.stdout.take().map(|pipe| capture(pipe, limit));
        let stderr = child.stderr.take().map(|pipe| capture(pipe, limit));

        let end = self.wait(&mut child, started, cancel);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        // Descendants that left the group can still hold the pipes.
        let drain_by = (started + self.settings.timeout).max(Instant::now() + self.settings.grace);
        let stdout = join_capture(stdout, drain_by);
        let stderr = join_capture(stderr, drain_by);

        let status = match end {
            WaitEnd::Exited(status) => match status.code() {
                Some(0) => OutcomeStatus::Success,
                Some(code) => OutcomeStatus::NonZeroExit { code },
                None => OutcomeStatus::NonZeroExit { code: -1 },
            },
            WaitEnd::TimedOut => OutcomeStatus::TimedOut,
            WaitEnd::Cancelled => OutcomeStatus::Cancelled,
            WaitEnd::WaitFailed(err) => {
                tracing::error!(%config, error = %err, "waiting on solver failed");
                OutcomeStatus::NonZeroExit { code: -1 }
            }
        };
        if !status.is_success() {
            tracing::warn!(%config, kind = status.kind(), elapsed_ms, "solver run failed");
        }

        RunOutcome {
            config: config.clone(),
            status,
            elapsed_ms,
            stdout,
            stderr,
            retries: 0,
        }
    }
}

/// Reads a pipe to the end, keeping at most `limit` bytes.
///
/// The pipe is always drained so the child never blocks on a full buffer.
fn capture<R: Read + Send + 'static>(mut pipe: R, limit: usize) -> Receiver<CapturedStream> {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let mut kept = Vec::new();
        let mut total = 0u64;
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    total += n as u64;
                    let room = limit.saturating_sub(kept.len());
                    kept.extend_from_slice(&buf[..n.min(room)]);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = tx.send(CapturedStream::from_bytes(&kept, total));
    });
    rx
}

/// Waits for a reader until `deadline`; a stream still open by then is dropped.
fn join_capture(reader: Option<Receiver<CapturedStream>>, deadline: Instant) -> CapturedStream {
    reader
        .and_then(|reader| reader.recv_deadline(deadline).ok())
        .unwrap_or_default()
}

#[derive(Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(child: &mut Child, signal: Signal) {
    let signo = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // The child leads its own process group, so launcher ranks receive the signal too.
    unsafe {
        libc::killpg(child.id() as libc::pid_t, signo);
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _signal: Signal) {
    let _ = child.kill();
}
