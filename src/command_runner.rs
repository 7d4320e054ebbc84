//! Command execution with live progress streaming.
//!
//! Every external process the orchestrator starts goes through
//! [`CommandRunner::run`]. One invocation uses four activities:
//!
//! - a reader thread for stdout and one for stderr, each forwarding lines,
//! - a waiter thread that owns the `Child` and reports its exit status,
//! - the event loop on the calling thread.
//!
//! Readers and the waiter only talk to a bounded fan-in channel. The event
//! loop alone owns the inactivity deadline, the synthetic progress ticker and
//! the outbound [`ProgressSink`], so emission order is decided in one place.
//! Line order within one stream is preserved; interleaving between stdout and
//! stderr is not deterministic.

use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use tracing::{debug, info, warn};

use crate::credential::{Credential, Privilege};
use crate::error::{InstallError, Result};
use crate::install_state::Phase;
use crate::process_guard::{
    send_signal_to_group, signal_group_or_process, ChildRegistry, CommandProcessGroup,
};
use crate::progress::{LogWindow, ProgressEvent, ProgressSink};

/// Inactivity window after which a command is killed
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Interval of the synthetic progress ticker
pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// Share of the remaining distance to `end` covered per tick
const TICK_FRACTION: f64 = 0.05;

/// Capacity of the reader/waiter fan-in queue
const FAN_IN_CAPACITY: usize = 256;

/// Time a process group gets between SIGTERM and SIGKILL
const KILL_GRACE: Duration = Duration::from_secs(3);

/// How long buffered output is drained after exit or termination
const FLUSH_WINDOW: Duration = Duration::from_millis(250);

/// Cooperative cancellation flag shared between the caller and the runner.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A structured process invocation. Arguments are never joined into a shell
/// string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Run with elevated privileges
    pub privileged: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            privileged: false,
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

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.privileged {
            f.write_str("[privileged] ")?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// The slice of overall progress one command may move through.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRange {
    pub phase: Phase,
    pub start: f64,
    pub end: f64,
    /// Fixed label; the command line is shown when absent
    pub step: Option<String>,
}

impl StepRange {
    pub fn new(phase: Phase, start: f64, end: f64) -> Self {
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        Self {
            phase,
            start,
            end,
            step: None,
        }
    }

    /// The whole sub-range reserved for `phase`
    pub fn for_phase(phase: Phase) -> Self {
        let (start, end) = phase.range();
        Self::new(phase, start, end)
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Part `index` of `count` equal consecutive parts of this range
    pub fn split(&self, index: usize, count: usize) -> Self {
        let count = count.max(1);
        let index = index.min(count - 1);
        let width = (self.end - self.start) / count as f64;
        Self {
            phase: self.phase,
            start: self.start + width * index as f64,
            end: self.start + width * (index + 1) as f64,
            step: self.step.clone(),
        }
    }
}

/// Runner settings for one installation run
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub timeout: Duration,
    pub tick: Duration,
    /// Announce commands without executing them
    pub dry_run: bool,
    pub privilege: Privilege,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            tick: DEFAULT_TICK,
            dry_run: false,
            privilege: Privilege::Direct,
        }
    }
}

/// Summary of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    /// Last non-empty line seen on either stream (redacted)
    pub last_line: Option<String>,
    pub line_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Messages from the helper threads to the event loop
enum RunnerMessage {
    Line(OutputStream, String),
    Closed(OutputStream),
    Exited(std::io::Result<ExitStatus>),
}

/// What a non-zero exit means to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitPolicy {
    /// The step failed; emit the failure event
    Fail,
    /// The command answered a query; close the step quietly
    Answer,
}

/// Why the event loop stopped the process itself
enum Abort {
    Timeout,
    Cancelled,
}

/// Mutable state of one event loop
struct LoopState {
    progress: f64,
    last_line: Option<String>,
    line_count: usize,
    open_streams: u8,
    exit: Option<std::io::Result<ExitStatus>>,
}

/// Executes commands and turns their output into progress events.
#[derive(Debug)]
pub struct CommandRunner {
    config: RunnerConfig,
    sink: ProgressSink,
    cancel: CancellationToken,
    log: Mutex<LogWindow>,
}

impl CommandRunner {
    pub fn new(config: RunnerConfig, sink: ProgressSink, cancel: CancellationToken) -> Self {
        Self {
            config,
            sink,
            cancel,
            log: Mutex::new(LogWindow::default()),
        }
    }

    pub fn sink(&self) -> &ProgressSink {
        &self.sink
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Redact the credential from text leaving the runner
    pub fn redact(&self, text: &str) -> String {
        self.config.privilege.redact(text)
    }

    /// Most recent output lines across every command of this run
    pub fn recent_output(&self) -> Vec<String> {
        self.log.lock().map(|w| w.lines()).unwrap_or_default()
    }

    /// Run a command to completion, streaming its output as progress events.
    pub fn run(&self, spec: &CommandSpec, range: &StepRange) -> Result<CommandOutput> {
        self.execute(spec, range, ExitPolicy::Fail)
    }

    fn execute(
        &self,
        spec: &CommandSpec,
        range: &StepRange,
        policy: ExitPolicy,
    ) -> Result<CommandOutput> {
        let command = self.redact(&spec.to_string());
        let step = range.step.clone().unwrap_or_else(|| command.clone());

        self.sink.emit(
            ProgressEvent::new(range.phase, range.start, &step)
                .privileged(spec.privileged)
                .with_command(&command),
        );

        if self.cancel.is_cancelled() {
            return Err(InstallError::Cancelled { command });
        }

        if self.config.dry_run {
            info!(%command, "dry-run: skipping execution");
            self.sink.emit(
                ProgressEvent::new(range.phase, range.end, &step)
                    .privileged(spec.privileged)
                    .with_command(&command)
                    .with_log(format!("[dry-run] {}", command)),
            );
            return Ok(CommandOutput::default());
        }

        info!(%command, phase = ?range.phase, "running command");

        let mut child = self
            .build_command(spec)
            .spawn()
            .map_err(|source| InstallError::Spawn {
                command: command.clone(),
                source,
            })?;
        let pid = child.id();
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }

        if let (Some(stdin), Some(credential)) = (child.stdin.take(), self.password()) {
            if let Err(e) = credential.write_to(stdin) {
                debug!(%e, "could not hand credential to sudo");
            }
        }

        let (tx, rx) = mpsc::sync_channel::<RunnerMessage>(FAN_IN_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, OutputStream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, OutputStream::Stderr, tx.clone());
        }
        let waiter_tx = tx;
        thread::spawn(move || {
            let status = child.wait();
            let _ = waiter_tx.send(RunnerMessage::Exited(status));
        });

        let result = self.event_loop(&rx, pid, &command, &step, spec.privileged, range, policy);

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }
        result
    }

    /// Run a query command and report whether it succeeded.
    ///
    /// A non-zero exit is an answer, not an error: the step ends at
    /// `range.end` without a failure event. In dry-run mode the answer is
    /// always `false` so the follow-up action is shown.
    pub fn check(&self, spec: &CommandSpec, range: &StepRange) -> Result<bool> {
        if self.config.dry_run {
            self.sink.emit(
                ProgressEvent::new(range.phase, range.start, self.redact(&spec.to_string()))
                    .with_command(self.redact(&spec.to_string())),
            );
            return Ok(false);
        }
        match self.execute(spec, range, ExitPolicy::Answer) {
            Ok(_) => Ok(true),
            Err(InstallError::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The credential sudo should read, if there is one worth sending
    fn password(&self) -> Option<&Credential> {
        self.config.privilege.credential().filter(|c| !c.is_empty())
    }

    fn build_command(&self, spec: &CommandSpec) -> Command {
        let sudo = spec.privileged && matches!(self.config.privilege, Privilege::Sudo(_));
        let feeds_password = sudo && self.password().is_some();

        let mut cmd = if sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("-S");
            if feeds_password {
                // With a cached timestamp sudo skips the read and the password
                // line would reach the privileged command; -k forces the read
                cmd.arg("-k");
            }
            cmd.args(["-p", "", "--"]);
            if !spec.env.is_empty() {
                // sudo resets the environment; pass variables through env(1)
                cmd.arg("env");
                cmd.args(spec.env.iter().map(|(k, v)| format!("{}={}", k, v)));
            }
            cmd.arg(&spec.program);
            cmd
        } else {
            let mut cmd = Command::new(&spec.program);
            cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            cmd
        };

        cmd.args(&spec.args)
            .stdin(if feeds_password { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group();
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn event_loop(
        &self,
        rx: &Receiver<RunnerMessage>,
        pid: u32,
        command: &str,
        step: &str,
        privileged: bool,
        range: &StepRange,
        policy: ExitPolicy,
    ) -> Result<CommandOutput> {
        let timeout = self.config.timeout;
        let tick = self.config.tick;
        let mut state = LoopState {
            progress: range.start,
            last_line: None,
            line_count: 0,
            open_streams: 2,
            exit: None,
        };
        let mut deadline = Instant::now() + timeout;
        let mut next_tick = Instant::now() + tick;
        let mut drain_until: Option<Instant> = None;

        let abort = loop {
            if state.exit.is_some() && state.open_streams == 0 {
                break None;
            }
            if self.cancel.is_cancelled() {
                break Some(Abort::Cancelled);
            }

            let now = Instant::now();
            if let Some(limit) = drain_until {
                // A backgrounded grandchild can keep the pipes open forever
                if now >= limit {
                    debug!(%command, "output still open after exit, stopping leftover processes");
                    self.stop_stragglers(rx, pid, &mut state, step, privileged, range.phase);
                    break None;
                }
            } else if now >= deadline {
                break Some(Abort::Timeout);
            }

            let mut wake = next_tick.min(deadline);
            if let Some(limit) = drain_until {
                wake = wake.min(limit);
            }

            match rx.recv_timeout(wake.saturating_duration_since(now)) {
                Ok(RunnerMessage::Line(stream, line)) => {
                    deadline = Instant::now() + timeout;
                    self.record_line(&mut state, stream, &line, step, privileged, range.phase);
                }
                Ok(RunnerMessage::Closed(_)) => {
                    state.open_streams = state.open_streams.saturating_sub(1);
                }
                Ok(RunnerMessage::Exited(status)) => {
                    state.exit = Some(status);
                    drain_until = Some(Instant::now() + FLUSH_WINDOW);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break None,
            }

            if Instant::now() >= next_tick {
                next_tick += tick;
                if range.end > range.start && state.exit.is_none() {
                    state.progress += (range.end - state.progress) * TICK_FRACTION;
                    self.sink.emit(
                        ProgressEvent::new(range.phase, state.progress, step)
                            .privileged(privileged),
                    );
                }
            }
        };

        if let Some(abort) = abort {
            self.terminate(rx, pid, &mut state, step, privileged, range.phase);
            let err = match abort {
                Abort::Timeout => {
                    warn!(%command, timeout_secs = timeout.as_secs(), "command timed out");
                    InstallError::Timeout {
                        command: command.to_string(),
                        timeout,
                    }
                }
                Abort::Cancelled => {
                    warn!(%command, "command cancelled");
                    InstallError::Cancelled {
                        command: command.to_string(),
                    }
                }
            };
            self.emit_failure(&state, &err, step, privileged, range);
            return Err(err);
        }

        let status = match state.exit.take() {
            Some(Ok(status)) => status,
            Some(Err(e)) => return Err(InstallError::Io(e)),
            None => {
                return Err(InstallError::Io(std::io::Error::other(
                    "process waiter disappeared without reporting an exit status",
                )))
            }
        };

        if status.success() {
            debug!(%command, lines = state.line_count, "command succeeded");
            self.sink.emit(
                ProgressEvent::new(range.phase, range.end, step).privileged(privileged),
            );
            Ok(CommandOutput {
                exit_code: status.code(),
                last_line: state.last_line,
                line_count: state.line_count,
            })
        } else {
            let err = InstallError::CommandFailed {
                command: command.to_string(),
                code: status.code(),
                last_line: state.last_line.clone().unwrap_or_default(),
            };
            match policy {
                ExitPolicy::Fail => {
                    warn!(%command, code = ?status.code(), "command failed");
                    self.emit_failure(&state, &err, step, privileged, range);
                }
                ExitPolicy::Answer => {
                    debug!(%command, code = ?status.code(), "query answered no");
                    self.sink.emit(
                        ProgressEvent::new(range.phase, range.end, step).privileged(privileged),
                    );
                }
            }
            Err(err)
        }
    }

    fn record_line(
        &self,
        state: &mut LoopState,
        stream: OutputStream,
        line: &str,
        step: &str,
        privileged: bool,
        phase: Phase,
    ) {
        let line = self.redact(line);
        debug!(%stream, "{}", line);
        state.line_count += 1;
        if !line.trim().is_empty() {
            state.last_line = Some(line.clone());
        }
        if let Ok(mut window) = self.log.lock() {
            window.push(line.clone());
        }
        self.sink.emit(
            ProgressEvent::new(phase, state.progress, step)
                .privileged(privileged)
                .with_log(line),
        );
    }

    /// SIGTERM the process group, escalate to SIGKILL after the grace
    /// period, and keep flushing output until the waiter has reaped it.
    fn terminate(
        &self,
        rx: &Receiver<RunnerMessage>,
        pid: u32,
        state: &mut LoopState,
        step: &str,
        privileged: bool,
        phase: Phase,
    ) {
        if state.exit.is_some() {
            return;
        }
        signal_group_or_process(pid, Signal::SIGTERM);
        if !self.drain_until_exit(rx, state, step, privileged, phase, KILL_GRACE) {
            warn!(pid, "process group ignored SIGTERM, sending SIGKILL");
            signal_group_or_process(pid, Signal::SIGKILL);
            if !self.drain_until_exit(rx, state, step, privileged, phase, KILL_GRACE) {
                warn!(pid, "process was not reaped after SIGKILL");
            }
        }
    }

    /// The main process has exited but something left in its group still
    /// holds the pipes open. SIGTERM the group, SIGKILL whatever survives
    /// the grace period.
    fn stop_stragglers(
        &self,
        rx: &Receiver<RunnerMessage>,
        pid: u32,
        state: &mut LoopState,
        step: &str,
        privileged: bool,
        phase: Phase,
    ) {
        for sig in [Signal::SIGTERM, Signal::SIGKILL] {
            if let Err(e) = send_signal_to_group(pid, sig) {
                debug!(pid, %e, "process group already gone");
                return;
            }
            if self.drain_until_closed(rx, state, step, privileged, phase, KILL_GRACE) {
                return;
            }
            warn!(pid, ?sig, "output still open after signalling the process group");
        }
    }

    /// Keep recording output until both streams have closed
    fn drain_until_closed(
        &self,
        rx: &Receiver<RunnerMessage>,
        state: &mut LoopState,
        step: &str,
        privileged: bool,
        phase: Phase,
        limit: Duration,
    ) -> bool {
        let until = Instant::now() + limit;
        while state.open_streams > 0 {
            let now = Instant::now();
            if now >= until {
                return false;
            }
            match rx.recv_timeout(until - now) {
                Ok(RunnerMessage::Line(stream, line)) => {
                    self.record_line(state, stream, &line, step, privileged, phase);
                }
                Ok(RunnerMessage::Closed(_)) => {
                    state.open_streams = state.open_streams.saturating_sub(1);
                }
                Ok(RunnerMessage::Exited(_)) => {}
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => return true,
            }
        }
        true
    }

    fn drain_until_exit(
        &self,
        rx: &Receiver<RunnerMessage>,
        state: &mut LoopState,
        step: &str,
        privileged: bool,
        phase: Phase,
        limit: Duration,
    ) -> bool {
        let until = Instant::now() + limit;
        loop {
            let now = Instant::now();
            if now >= until {
                return state.exit.is_some();
            }
            match rx.recv_timeout(until - now) {
                Ok(RunnerMessage::Line(stream, line)) => {
                    self.record_line(state, stream, &line, step, privileged, phase);
                }
                Ok(RunnerMessage::Closed(_)) => {
                    state.open_streams = state.open_streams.saturating_sub(1);
                }
                Ok(RunnerMessage::Exited(status)) => {
                    state.exit = Some(status);
                    return true;
                }
                Err(RecvTimeoutError::Timeout) => return state.exit.is_some(),
                Err(RecvTimeoutError::Disconnected) => return true,
            }
        }
    }

    fn emit_failure(
        &self,
        state: &LoopState,
        err: &InstallError,
        step: &str,
        privileged: bool,
        range: &StepRange,
    ) {
        let mut event = ProgressEvent::new(range.phase, range.start, step)
            .privileged(privileged)
            .with_error(self.redact(&err.to_string()));
        if let Some(line) = &state.last_line {
            event = event.with_log(line.clone());
        }
        self.sink.emit(event);
    }
}

/// Forward lines from one output stream until EOF.
///
/// Bytes are decoded lossily and carriage-return progress bars collapse to
/// their final segment, so a non-UTF-8 byte never stops the drain (a full
/// pipe would block the child).
fn spawn_reader<R: Read + Send + 'static>(
    stream: R,
    kind: OutputStream,
    tx: SyncSender<RunnerMessage>,
) {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    let text = text.trim_end_matches(['\n', '\r']);
                    let line = text.rsplit('\r').next().unwrap_or(text).to_string();
                    if tx.send(RunnerMessage::Line(kind, line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(stream = %kind, %e, "read error, closing stream");
                    break;
                }
            }
        }
        let _ = tx.send(RunnerMessage::Closed(kind));
    });
}
