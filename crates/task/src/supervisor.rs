//! Child process supervision
//!
//! Each phase runs as its own process group so that signals reach the tool
//! and anything it spawned. The supervisor waits for whichever happens first:
//! the child exits, its hard timeout elapses, or the shared [`Interrupt`] is
//! raised. In the last two cases the group is signalled and, if it has not
//! exited within the kill grace period, killed.
//!
//! Captured stdout must reach end of file within the kill grace period after
//! the child is gone. A process left behind holding the pipe open gets the
//! whole group killed and the phase counts as timed out.

use crate::interrupt::Interrupt;
use stackscore_core::{Error, Result};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// One invocation of the external tool
#[derive(Debug, Clone, Default)]
pub struct JobCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Added on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// Removed from the inherited environment
    pub env_remove: Vec<String>,
}

impl JobCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            ..Self::default()
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::command_execution(&self.program, self.args.clone(), message, None)
    }
}

/// Receives the child's stdout as it arrives
pub trait ChunkSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;
}

impl ChunkSink for Vec<u8> {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}

/// Where the child's stdout goes
pub enum Stdout<'a> {
    /// Passed through to our own stdout
    Inherit,
    /// Streamed chunk by chunk into a sink
    Capture(&'a mut (dyn ChunkSink + Send)),
}

/// How a supervised child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    /// Killed by a signal it did not get from us
    Signaled,
    TimedOut,
    Interrupted,
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }
}

#[derive(Debug, Clone, Copy)]
enum TermSignal {
    Terminate,
    Interrupt,
}

/// Runs [`JobCommand`]s under a timeout and the shared interrupt
#[derive(Debug, Clone)]
pub struct Supervisor {
    interrupt: Interrupt,
    kill_grace: Duration,
}

impl Supervisor {
    pub fn new(interrupt: Interrupt, kill_grace: Duration) -> Self {
        Self {
            interrupt,
            kill_grace,
        }
    }

    /// Run `command` to completion.
    ///
    /// Errors only when the child cannot be spawned or waited on, or when a
    /// capture sink fails while the child otherwise succeeded.
    pub async fn run(
        &self,
        command: &JobCommand,
        timeout: Duration,
        stdout: Stdout<'_>,
    ) -> Result<ExitOutcome> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for key in &command.env_remove {
            cmd.env_remove(key);
        }
        cmd.envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let sink = match stdout {
            Stdout::Inherit => {
                cmd.stdout(Stdio::inherit());
                None
            }
            Stdout::Capture(sink) => {
                cmd.stdout(Stdio::piped());
                Some(sink)
            }
        };

        #[cfg(unix)]
        cmd.process_group(0);

        let _active = self.interrupt.enter_child();
        let mut child = cmd
            .spawn()
            .map_err(|e| command.error(format!("Failed to spawn: {e}")))?;
        let pid = child.id();
        tracing::debug!(program = %command.program, pid = ?pid, "Spawned child process");

        let piped = child.stdout.take();
        let pump = async move {
            match (piped, sink) {
                (Some(out), Some(sink)) => pump_chunks(out, sink).await,
                _ => Ok(()),
            }
        };
        tokio::pin!(pump);

        let mut pumped = None;
        let outcome = {
            let wait = self.wait_for_exit(&mut child, timeout);
            tokio::pin!(wait);
            loop {
                tokio::select! {
                    result = &mut pump, if pumped.is_none() => pumped = Some(result),
                    outcome = &mut wait => break outcome,
                }
            }
        };
        let mut outcome = outcome.map_err(|e| command.error(format!("Failed to wait: {e}")))?;

        let pumped = match pumped {
            Some(result) => result,
            None => match tokio::time::timeout(self.kill_grace, &mut pump).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        grace_ms = millis(self.kill_grace),
                        "Output still open after child exit, killing process group"
                    );
                    kill_process_group(pid);
                    if outcome != ExitOutcome::Interrupted {
                        outcome = ExitOutcome::TimedOut;
                    }
                    Ok(())
                }
            },
        };
        if let Err(e) = pumped {
            if outcome.is_success() {
                return Err(e);
            }
            tracing::warn!(error = %e, "Discarding output of failed child");
        }
        Ok(outcome)
    }

    async fn wait_for_exit(&self, child: &mut Child, timeout: Duration) -> io::Result<ExitOutcome> {
        enum Event {
            Exited(io::Result<ExitStatus>),
            TimedOut,
            Interrupted,
        }

        let event = tokio::select! {
            biased;
            status = child.wait() => Event::Exited(status),
            _ = self.interrupt.requested() => Event::Interrupted,
            _ = tokio::time::sleep(timeout) => Event::TimedOut,
        };

        match event {
            Event::Exited(status) => Ok(classify(status?)),
            Event::TimedOut => {
                tracing::warn!(timeout_secs = timeout.as_secs_f64(), "Child timed out, terminating");
                self.terminate(child, TermSignal::Terminate).await;
                Ok(ExitOutcome::TimedOut)
            }
            Event::Interrupted => {
                tracing::info!("Received SIGINT. Forwarding this to our child process.");
                self.terminate(child, TermSignal::Interrupt).await;
                Ok(ExitOutcome::Interrupted)
            }
        }
    }

    async fn terminate(&self, child: &mut Child, signal: TermSignal) {
        send_signal(child, signal);
        if tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok() {
            return;
        }

        tracing::warn!(
            grace_ms = millis(self.kill_grace),
            "Child ignored termination, killing"
        );
        kill_process_group(child.id());
        if let Err(e) = child.start_kill() {
            tracing::debug!(error = %e, "Child already gone");
        }
        let _ = child.wait().await;
    }
}

async fn pump_chunks(mut out: ChildStdout, sink: &mut (dyn ChunkSink + Send)) -> Result<()> {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut first_error = None;

    loop {
        let n = match out.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        // Keep draining after a sink failure so the child never blocks on a full pipe
        if first_error.is_none() {
            if let Err(e) = sink.write_chunk(&buf[..n]) {
                first_error = Some(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn classify(status: ExitStatus) -> ExitOutcome {
    match status.code() {
        Some(code) => ExitOutcome::Exited(code),
        None => ExitOutcome::Signaled,
    }
}

#[cfg(unix)]
fn send_signal(child: &Child, signal: TermSignal) {
    let signum = match signal {
        TermSignal::Terminate => libc::SIGTERM,
        TermSignal::Interrupt => libc::SIGINT,
    };
    if let Some(pid) = child.id() {
        signal_group(pid, signum);
    }
}

#[cfg(not(unix))]
fn send_signal(child: &mut Child, _signal: TermSignal) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        signal_group(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(unix)]
fn signal_group(pid: u32, signum: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // The child leads its own group, so its pid is the group id
    // SAFETY: kill has no memory-safety preconditions
    let result = unsafe { libc::kill(-pid, signum) };
    if result != 0 {
        // SAFETY: as above
        unsafe {
            libc::kill(pid, signum);
        }
    }
}
