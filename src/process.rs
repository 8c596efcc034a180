//! External-process lifecycle: supervised long-running tools and blocking
//! helper commands.
//!
//! [`SupervisedProcess`] owns exactly one external process. Termination is
//! unconditional and idempotent: it runs on explicit [`terminate`], and the
//! `Drop` impl repeats it so the process cannot outlive its scope even when
//! the scope body returned early, errored, or unwound from a panic.
//!
//! [`terminate`]: SupervisedProcess::terminate

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::{Receiver, channel};
use std::thread;
use std::time::{Duration, Instant};

use crate::cli::ShutdownController;
use crate::error::{BpError, BpResult};

/// Default bound on the graceful-termination wait before force-kill.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

#[must_use]
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// What to do with the supervised process's stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrMode {
    /// Let the tool write to the controlling terminal.
    Inherit,
    /// Drain stderr into debug-level log lines.
    Capture,
}

/// A running external process with guaranteed teardown.
///
/// Stdout is always piped and drained by a reader thread, line by line, into
/// an internal channel; callers consume it via [`next_line`]. This keeps the
/// tool from blocking on a full pipe while the controlling thread is busy.
///
/// [`next_line`]: SupervisedProcess::next_line
pub struct SupervisedProcess {
    child: Option<Child>,
    rendered: String,
    pid: u32,
    grace: Duration,
    stdout_lines: Receiver<String>,
}

impl std::fmt::Debug for SupervisedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedProcess")
            .field("command", &self.rendered)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl SupervisedProcess {
    /// Spawn `cmd` (program followed by arguments) with the default grace
    /// period.
    pub fn spawn(cmd: &[String], stderr: StderrMode) -> BpResult<Self> {
        Self::spawn_with_grace(cmd, stderr, DEFAULT_GRACE)
    }

    /// Spawn with an explicit graceful-termination bound.
    ///
    /// Fails with `ProcessLaunch` before any caller code runs when the
    /// executable is missing or cannot be started.
    pub fn spawn_with_grace(
        cmd: &[String],
        stderr: StderrMode,
        grace: Duration,
    ) -> BpResult<Self> {
        let Some((program, args)) = cmd.split_first() else {
            return Err(BpError::ProcessLaunch {
                command: String::new(),
                reason: "empty command line".to_owned(),
            });
        };

        if !command_exists(program) {
            return Err(BpError::ProcessLaunch {
                command: program.clone(),
                reason: "not found on PATH".to_owned(),
            });
        }

        let rendered = cmd.join(" ");
        let mut command = Command::new(program);
        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(match stderr {
            StderrMode::Inherit => Stdio::inherit(),
            StderrMode::Capture => Stdio::piped(),
        });

        let mut child = command.spawn().map_err(|e| BpError::ProcessLaunch {
            command: rendered.clone(),
            reason: e.to_string(),
        })?;
        let pid = child.id();

        let stdout_pipe = child.stdout.take().ok_or_else(|| BpError::ProcessLaunch {
            command: rendered.clone(),
            reason: "stdout pipe unavailable".to_owned(),
        })?;
        let (line_tx, stdout_lines) = channel();
        thread::spawn(move || {
            let reader = BufReader::new(stdout_pipe);
            for line in reader.lines() {
                match line {
                    Ok(text) => {
                        if line_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        if stderr == StderrMode::Capture
            && let Some(stderr_pipe) = child.stderr.take()
        {
            let tool = rendered.clone();
            thread::spawn(move || {
                let reader = BufReader::new(stderr_pipe);
                for line in reader.lines().map_while(Result::ok) {
                    tracing::debug!(tool = %tool, "stderr: {line}");
                }
            });
        }

        tracing::info!(pid = pid, command = %rendered, "supervised process started");
        Ok(Self {
            child: Some(child),
            rendered,
            pid,
            grace,
            stdout_lines,
        })
    }

    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.rendered
    }

    /// Health check. An unexpected early exit is observable here; it does
    /// not abort the caller's scope on its own.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    tracing::warn!(
                        pid = self.pid,
                        status = %status,
                        command = %self.rendered,
                        "supervised process exited before scope end"
                    );
                    false
                }
                Err(_) => false,
            },
            None => false,
        }
    }

    /// Wait up to `timeout` for one stdout line from the tool.
    #[must_use]
    pub fn next_line(&self, timeout: Duration) -> Option<String> {
        self.stdout_lines.recv_timeout(timeout).ok()
    }

    /// Request graceful termination, wait up to the grace period, then
    /// force-kill. Idempotent: the second and later calls are no-ops.
    pub fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if matches!(child.try_wait(), Ok(Some(_))) {
            tracing::info!(pid = self.pid, "supervised process already exited");
            return;
        }

        tracing::info!(pid = self.pid, command = %self.rendered, "terminating supervised process");
        send_term_signal(self.pid);

        let started = Instant::now();
        while started.elapsed() < self.grace {
            if matches!(child.try_wait(), Ok(Some(_))) {
                return;
            }
            thread::sleep(Duration::from_millis(50));
        }

        tracing::warn!(
            pid = self.pid,
            grace_ms = self.grace.as_millis() as u64,
            "grace period elapsed, force-killing"
        );
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(unix)]
fn send_term_signal(pid: u32) {
    if pid == 0 || pid > i32::MAX as u32 {
        tracing::warn!(pid = pid, "skipping TERM for out-of-range pid");
        return;
    }
    let _ = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .output();
}

#[cfg(not(unix))]
fn send_term_signal(_pid: u32) {}

/// Run a helper command to completion, capturing output.
pub fn run_command(program: &str, args: &[String], cwd: Option<&Path>) -> BpResult<Output> {
    if !command_exists(program) {
        return Err(BpError::ProcessLaunch {
            command: program.to_owned(),
            reason: "not found on PATH".to_owned(),
        });
    }

    let rendered = format!("{} {}", program, args.join(" "));
    let mut command = Command::new(program);
    command.args(args);
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = command.output()?;
    validate_command_output(&rendered, output)
}

/// Run a helper command to completion, polling the shutdown flag.
///
/// On Ctrl+C the child is killed and `Interrupted` is returned, so the
/// caller's scope unwinds through the normal cleanup paths.
pub fn run_command_interruptible(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
) -> BpResult<Output> {
    if !command_exists(program) {
        return Err(BpError::ProcessLaunch {
            command: program.to_owned(),
            reason: "not found on PATH".to_owned(),
        });
    }

    let rendered = format!("{} {}", program, args.join(" "));
    let mut command = Command::new(program);
    command.args(args);
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|e| BpError::ProcessLaunch {
        command: rendered.clone(),
        reason: e.to_string(),
    })?;

    let (Some(mut stdout_pipe), Some(mut stderr_pipe)) =
        (child.stdout.take(), child.stderr.take())
    else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(BpError::ProcessLaunch {
            command: rendered,
            reason: "output pipes unavailable".to_owned(),
        });
    };

    let (stdout_tx, stdout_rx) = channel();
    let (stderr_tx, stderr_rx) = channel();

    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf);
        let _ = stdout_tx.send(buf);
    });

    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf);
        let _ = stderr_tx.send(buf);
    });

    loop {
        if let Some(status) = child.try_wait()? {
            let stdout = stdout_rx
                .recv_timeout(Duration::from_millis(100))
                .unwrap_or_default();
            let stderr = stderr_rx
                .recv_timeout(Duration::from_millis(100))
                .unwrap_or_default();
            return validate_command_output(
                &rendered,
                Output {
                    status,
                    stdout,
                    stderr,
                },
            );
        }

        if ShutdownController::is_shutting_down() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(BpError::Interrupted);
        }

        thread::sleep(Duration::from_millis(50));
    }
}

fn validate_command_output(rendered: &str, output: Output) -> BpResult<Output> {
    if output.status.success() {
        return Ok(output);
    }

    let status = output.status.code().unwrap_or(-1);
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    Err(BpError::from_command_failure(
        rendered.to_owned(),
        status,
        stderr,
    ))
}
