//! Process execution and supervision.
//!
//! This module contains the per-process `Supervisor`, which owns one child's
//! lifecycle (start, output capture, graceful-then-forced stop, restart), and
//! the `SupervisorSet` that starts and shuts down every configured process in
//! parallel. Lifecycle changes are reported to the UI loop through the event
//! channel.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::ProcessError;
use crate::events::{Event, Target};
use crate::output::{sanitize_line, OutputBuffer};
use crate::process::{Capture, ProcessSpec, ProcessState, ProcessView};

/// Time a child gets to exit after SIGTERM before it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
/// How long after its last output line a process still counts as active.
pub const DEFAULT_ACTIVITY_WINDOW: Duration = Duration::from_secs(60);

const STOPPING_MARKER: &str = "stopping...";
const GRACEFUL_MARKER: &str = "stopped gracefully";
const EXITED_MARKER: &str = "stopped (process had already exited)";
const RESTART_MARKER: &str = "restarting...";

/// Timing knobs shared by every supervisor in a set.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    grace_period: Duration,
    activity_window: Duration,
}

impl SupervisorConfig {
    pub fn new(grace_period: Duration, activity_window: Duration) -> Self {
        Self {
            grace_period,
            activity_window,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD, DEFAULT_ACTIVITY_WINDOW)
    }
}

#[derive(Debug)]
enum StopOutcome {
    AlreadyExited(ExitStatus),
    Graceful(ExitStatus),
    Forced,
}

/// Owner of one supervised child process.
///
/// Cheap to clone; all clones address the same process. Every piece of
/// mutable state sits behind one private lock that is never held across an
/// await point. Stop and restart additionally serialize on a lifecycle lock,
/// so a second call waits for the one in flight.
#[derive(Debug, Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    spec: ProcessSpec,
    target: Target,
    config: SupervisorConfig,
    events: mpsc::Sender<Event>,
    lifecycle: AsyncMutex<()>,
    shared: Mutex<Shared>,
}

#[derive(Debug)]
struct Shared {
    state: ProcessState,
    output: OutputBuffer,
    last_activity: Option<Instant>,
    started_at: Option<Instant>,
    stopped: bool,
    /// Bumped on every start so a previous run's pump cannot write into this one.
    run: u64,
    capture: Capture,
    child: Option<Child>,
    cancel: Option<watch::Sender<bool>>,
}

impl Supervisor {
    pub fn new(
        spec: ProcessSpec,
        target: Target,
        config: SupervisorConfig,
        events: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                spec,
                target,
                config,
                events,
                lifecycle: AsyncMutex::new(()),
                shared: Mutex::new(Shared {
                    state: ProcessState::Idle,
                    output: OutputBuffer::new(),
                    last_activity: None,
                    started_at: None,
                    stopped: false,
                    run: 0,
                    capture: Capture::Pending,
                    child: None,
                    cancel: None,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn shortname(&self) -> &str {
        &self.inner.spec.shortname
    }

    pub fn target(&self) -> Target {
        self.inner.target
    }

    pub fn state(&self) -> ProcessState {
        self.lock().state
    }

    /// Spawns the configured command and starts capturing its output.
    ///
    /// Fails once the process has been stopped; only [`Supervisor::restart`]
    /// brings a stopped process back. Starting a running process is a no-op.
    pub fn start(&self) -> Result<(), ProcessError> {
        let name = self.shortname().to_string();
        let mut shared = self.lock();
        if shared.stopped {
            return Err(ProcessError::AlreadyStopped(name));
        }
        if shared.child.is_some() {
            debug!(process = %name, "start ignored, already running");
            return Ok(());
        }

        let mut command = shell_command(&self.inner.spec.command);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            shortname: name.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        info!(process = %name, pid = child.id().unwrap_or(0), "started");

        shared.run += 1;
        let run = shared.run;
        shared.child = Some(child);
        shared.cancel = Some(cancel_tx);
        shared.state = ProcessState::Running;
        shared.started_at = Some(Instant::now());
        shared.capture = Capture::Capturing;
        drop(shared);

        tokio::spawn(pump_output(self.clone(), run, stdout, stderr, cancel_rx));
        Ok(())
    }

    /// Stops the process: SIGTERM, then a kill once the grace period elapses.
    ///
    /// Idempotent. A call made while another stop is still in its grace
    /// period waits for that stop to finish, then returns `Ok` without
    /// signalling again.
    pub async fn stop(&self) -> Result<(), ProcessError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.stop_locked().await
    }

    async fn stop_locked(&self) -> Result<(), ProcessError> {
        let (run, child, cancel) = {
            let mut shared = self.lock();
            if shared.stopped {
                return Ok(());
            }
            shared.stopped = true;
            let child = shared.child.take();
            if child.is_some() {
                shared.state = ProcessState::Stopping;
                shared.output.push_marker(STOPPING_MARKER);
            } else {
                shared.state = ProcessState::Stopped;
            }
            (shared.run, child, shared.cancel.take())
        };
        if let Some(cancel) = cancel {
            let _ = cancel.send(true);
        }
        let Some(mut child) = child else {
            debug!(process = %self.shortname(), "stopped before it ever ran");
            return Ok(());
        };

        let result = self.terminate(&mut child).await;
        let marker = match &result {
            Ok(StopOutcome::AlreadyExited(status)) => {
                info!(process = %self.shortname(), %status, "already exited");
                EXITED_MARKER.to_string()
            }
            Ok(StopOutcome::Graceful(status)) => {
                info!(process = %self.shortname(), %status, "stopped gracefully");
                GRACEFUL_MARKER.to_string()
            }
            Ok(StopOutcome::Forced) => {
                warn!(process = %self.shortname(), "grace period elapsed, killed");
                format!(
                    "killed after {}ms grace period",
                    self.inner.config.grace_period.as_millis()
                )
            }
            Err(err) => {
                warn!(process = %self.shortname(), error = %err, "stop failed");
                format!("stop failed: {}", err)
            }
        };
        {
            let mut shared = self.lock();
            if shared.run == run {
                shared.state = ProcessState::Stopped;
                shared.output.push_marker(&marker);
            }
        }
        self.notify_updated();
        result.map(|_| ())
    }

    async fn terminate(&self, child: &mut Child) -> Result<StopOutcome, ProcessError> {
        let shortname = || self.shortname().to_string();
        match child.try_wait() {
            Ok(Some(status)) => return Ok(StopOutcome::AlreadyExited(status)),
            Ok(None) => {}
            Err(source) => {
                return Err(ProcessError::Wait {
                    shortname: shortname(),
                    source,
                })
            }
        }

        if let Err(source) = request_termination(child) {
            let _ = child.start_kill();
            return Err(ProcessError::Signal {
                shortname: shortname(),
                source,
            });
        }

        match tokio::time::timeout(self.inner.config.grace_period, child.wait()).await {
            Ok(Ok(status)) => Ok(StopOutcome::Graceful(status)),
            Ok(Err(source)) => Err(ProcessError::Wait {
                shortname: shortname(),
                source,
            }),
            Err(_) => {
                child.kill().await.map_err(|source| ProcessError::Kill {
                    shortname: shortname(),
                    source,
                })?;
                Ok(StopOutcome::Forced)
            }
        }
    }

    /// Stops the process if it ever ran, resets its output and starts it again.
    ///
    /// Waits for a stop already in flight before spawning the new child.
    pub async fn restart(&self) -> Result<(), ProcessError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.state() != ProcessState::Idle {
            self.stop_locked().await?;
        }
        {
            let mut shared = self.lock();
            shared.stopped = false;
            shared.output.reset(RESTART_MARKER);
        }
        self.start()
    }

    pub fn output(&self) -> String {
        self.lock().output.as_str().to_string()
    }

    pub fn clear_output(&self) {
        self.lock().output.clear();
    }

    /// Whether output arrived within the activity window.
    pub fn is_active(&self) -> bool {
        let window = self.inner.config.activity_window;
        self.lock()
            .last_activity
            .map(|at| at.elapsed() < window)
            .unwrap_or(false)
    }

    /// Forgets the last activity so the process reads as inactive right away.
    pub fn mark_seen(&self) {
        self.lock().last_activity = None;
    }

    pub fn snapshot(&self) -> ProcessView {
        let shared = self.lock();
        ProcessView {
            shortname: self.inner.spec.shortname.clone(),
            command: self.inner.spec.command.clone(),
            description: self.inner.spec.description.clone(),
            output: shared.output.as_str().to_string(),
            state: shared.state,
            capture: shared.capture.clone(),
            started_at: shared.started_at,
            last_activity: shared.last_activity,
        }
    }

    /// Starts the process and reports the outcome on the event channel.
    pub async fn start_reported(&self) {
        let result = self.start();
        self.report_start(result).await;
    }

    /// Restarts the process and reports the outcome on the event channel.
    pub async fn restart_reported(&self) {
        let result = self.restart().await;
        self.report_start(result).await;
    }

    /// Stops the process, logging any failure, then asks the UI to refresh.
    pub async fn stop_reported(&self) {
        if let Err(err) = self.stop().await {
            warn!(process = %self.shortname(), error = %err, "error stopping process");
        }
        let _ = self
            .inner
            .events
            .send(Event::ProcessUpdated {
                target: self.target(),
            })
            .await;
    }

    async fn report_start(&self, result: Result<(), ProcessError>) {
        let target = self.target();
        let event = match result {
            Ok(()) => Event::ProcessStarted { target },
            Err(err) => {
                warn!(process = %self.shortname(), error = %err, "error starting process");
                Event::ProcessStartFailed {
                    target,
                    error: err.to_string(),
                }
            }
        };
        let _ = self.inner.events.send(event).await;
    }

    fn record_line(&self, run: u64, line: &str) {
        let clean = sanitize_line(line);
        {
            let mut shared = self.lock();
            if shared.run != run {
                return;
            }
            shared.output.push_line(&clean);
            shared.last_activity = Some(Instant::now());
        }
        self.notify_updated();
    }

    fn finish_capture(&self, run: u64, capture: Capture) {
        let mut shared = self.lock();
        if shared.run == run {
            shared.capture = capture;
        }
    }

    // Output updates coalesce: dropping one when the queue is full is harmless
    // because the next tick recomputes everything anyway.
    fn notify_updated(&self) {
        let _ = self.inner.events.try_send(Event::ProcessUpdated {
            target: self.target(),
        });
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> io::Result<()> {
    // No pid means the child was already reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> io::Result<()> {
    // No graceful console signal for a plain child here; the kill is the request.
    child.start_kill()
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Stdout,
    Stderr,
}

/// Line reader that accepts arbitrary bytes; invalid UTF-8 is replaced.
///
/// Partial lines stay in `pending`, so a read dropped by `select!` loses
/// nothing.
struct LineReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.pending).await?;
        if read == 0 && self.pending.is_empty() {
            return Ok(None);
        }
        let mut line = std::mem::take(&mut self.pending);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

async fn next_line<R>(reader: &mut Option<LineReader<R>>) -> io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.next_line().await,
        None => Ok(None),
    }
}

// Merges stdout and stderr into the process's buffer until both close or the
// run is cancelled. The signal is checked before and after every read, and the
// select drops the readers on cancellation so no read outlives it.
async fn pump_output(
    supervisor: Supervisor,
    run: u64,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut stdout = stdout.map(LineReader::new);
    let mut stderr = stderr.map(LineReader::new);
    let name = supervisor.shortname().to_string();

    let end = loop {
        if *cancel.borrow() {
            break Capture::Cancelled;
        }
        if stdout.is_none() && stderr.is_none() {
            break Capture::Closed;
        }
        let (source, read) = tokio::select! {
            biased;
            _ = cancel.changed() => break Capture::Cancelled,
            read = next_line(&mut stdout), if stdout.is_some() => (Source::Stdout, read),
            read = next_line(&mut stderr), if stderr.is_some() => (Source::Stderr, read),
        };
        if *cancel.borrow() {
            break Capture::Cancelled;
        }
        match read {
            Ok(Some(line)) => supervisor.record_line(run, &line),
            Ok(None) => match source {
                Source::Stdout => stdout = None,
                Source::Stderr => stderr = None,
            },
            Err(err) => {
                warn!(process = %name, error = %err, "error reading output");
                break Capture::Failed(err.to_string());
            }
        }
    };

    debug!(process = %name, capture = ?end, "output capture ended");
    supervisor.finish_capture(run, end);
    supervisor.notify_updated();
}

/// Every configured process and command.
#[derive(Debug, Clone)]
pub struct SupervisorSet {
    processes: Vec<Supervisor>,
    commands: Vec<Supervisor>,
}

impl SupervisorSet {
    pub fn new(
        processes: Vec<ProcessSpec>,
        commands: Vec<ProcessSpec>,
        config: SupervisorConfig,
        events: mpsc::Sender<Event>,
    ) -> Self {
        let processes = processes
            .into_iter()
            .enumerate()
            .map(|(id, spec)| Supervisor::new(spec, Target::Process(id), config, events.clone()))
            .collect();
        let commands = commands
            .into_iter()
            .enumerate()
            .map(|(id, spec)| Supervisor::new(spec, Target::Command(id), config, events.clone()))
            .collect();
        Self {
            processes,
            commands,
        }
    }

    pub fn processes(&self) -> &[Supervisor] {
        &self.processes
    }

    pub fn commands(&self) -> &[Supervisor] {
        &self.commands
    }

    pub fn get(&self, target: Target) -> Option<&Supervisor> {
        match target {
            Target::Process(id) => self.processes.get(id),
            Target::Command(id) => self.commands.get(id),
        }
    }

    pub fn find(&self, shortname: &str) -> Option<&Supervisor> {
        self.processes.iter().find(|p| p.shortname() == shortname)
    }

    /// Starts every process concurrently. Each outcome arrives as its own event.
    pub fn start_all(&self) {
        for supervisor in &self.processes {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.start_reported().await });
        }
    }

    /// Stops every process and command concurrently and waits for all of them.
    ///
    /// Returns the failures; they are already logged.
    pub async fn shutdown_all(&self) -> Vec<(String, ProcessError)> {
        let mut stops = JoinSet::new();
        for supervisor in self.processes.iter().chain(self.commands.iter()) {
            let supervisor = supervisor.clone();
            stops.spawn(async move {
                let result = supervisor.stop().await;
                (supervisor.shortname().to_string(), result)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(err))) => {
                    warn!(process = %name, error = %err, "error stopping process");
                    failures.push((name, err));
                }
                Err(err) => warn!(error = %err, "stop task failed"),
            }
        }
        info!(failed = failures.len(), "all processes stopped");
        failures
    }
}
