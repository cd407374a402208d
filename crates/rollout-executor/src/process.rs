//! External process execution with output capture and cancellation.

use rollout_core::CancelSignal;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Output lines kept for error reporting.
const MAX_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}{}", format_tail(.tail))]
    Failed {
        command: String,
        status: ExitStatus,
        tail: Vec<String>,
    },

    #[error("process cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_tail(tail: &[String]) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(":\n{}", tail.join("\n"))
    }
}

/// Result of a process that ran to completion.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    /// Last lines of combined stdout and stderr, in arrival order.
    pub tail: Vec<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
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

    /// Run the process to completion.
    ///
    /// With `env` set the child sees exactly that environment, otherwise it
    /// inherits ours. The child is killed if `cancel` fires first.
    pub async fn run(
        &self,
        env: Option<&HashMap<String, String>>,
        cancel: &CancelSignal,
    ) -> Result<ProcessOutput, ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(env) = env {
            command.env_clear().envs(env);
        }

        debug!(command = %self, "Spawning process");
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            terminate(&mut child, &self.program).await;
            return Err(ProcessError::Io(std::io::Error::other(
                "child output was not captured",
            )));
        };
        let mut stdout_reader = BufReader::new(stdout);
        let mut stderr_reader = BufReader::new(stderr);
        // Partial lines stay in these buffers across select iterations.
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut tail = VecDeque::with_capacity(MAX_TAIL_LINES);

        while stdout_open || stderr_open {
            let read = tokio::select! {
                read = stdout_reader.read_until(b'\n', &mut stdout_buf), if stdout_open => {
                    (read, &mut stdout_buf, &mut stdout_open, "stdout")
                }
                read = stderr_reader.read_until(b'\n', &mut stderr_buf), if stderr_open => {
                    (read, &mut stderr_buf, &mut stderr_open, "stderr")
                }
                _ = cancel.cancelled() => {
                    terminate(&mut child, &self.program).await;
                    return Err(ProcessError::Cancelled);
                }
            };

            match read {
                (Ok(0), buf, open, _) => {
                    if !buf.is_empty() {
                        self.record(&mut tail, take_line(buf));
                    }
                    *open = false;
                }
                (Ok(_), buf, _, _) => self.record(&mut tail, take_line(buf)),
                (Err(e), _, _, stream) => {
                    warn!(program = %self.program, error = %e, stream, "Error reading output");
                    terminate(&mut child, &self.program).await;
                    return Err(ProcessError::Io(e));
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                terminate(&mut child, &self.program).await;
                return Err(ProcessError::Cancelled);
            }
        };

        debug!(command = %self, %status, "Process exited");
        Ok(ProcessOutput {
            status,
            tail: tail.into(),
        })
    }

    /// Run the process and treat a non-zero exit as an error.
    pub async fn run_checked(
        &self,
        env: Option<&HashMap<String, String>>,
        cancel: &CancelSignal,
    ) -> Result<ProcessOutput, ProcessError> {
        let output = self.run(env, cancel).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ProcessError::Failed {
                command: self.to_string(),
                status: output.status,
                tail: output.tail,
            })
        }
    }

    fn record(&self, tail: &mut VecDeque<String>, line: String) {
        debug!(program = %self.program, "{}", line);
        if tail.len() == MAX_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Drain `buf` into one output line. Invalid UTF-8 is replaced, not rejected.
fn take_line(buf: &mut Vec<u8>) -> String {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    line
}

async fn terminate(child: &mut Child, program: &str) {
    if let Err(e) = child.kill().await {
        warn!(program = %program, error = %e, "Failed to kill process");
    } else {
        debug!(program = %program, "Killed process");
    }
}
