//! External tool invocation.
//!
//! Runs one external command as a child process with a hard timeout and
//! captures its output. There are no retries at this layer; callers decide
//! what a failure means for them.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, error, warn};

/// Errors that can occur while running an external tool
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout")]
    Timeout,

    #[error("{stderr}")]
    Failed { status: Option<i32>, stderr: String },
}

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
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
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Runs external commands.
///
/// `Ok` carries the captured standard output of a zero exit; everything else is
/// a [`ToolError`].
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand, timeout: Duration) -> Result<String, ToolError>;
}

/// [`ToolRunner`] backed by real child processes.
///
/// The configured environment is layered on top of the inherited one for every
/// child, so tuning flags never touch the host process environment.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    env: BTreeMap<String, String>,
}

impl ProcessRunner {
    pub fn new(env: BTreeMap<String, String>) -> Self {
        Self { env }
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, command: &ToolCommand, timeout: Duration) -> Result<String, ToolError> {
        debug!(command = %command, timeout_secs = timeout.as_secs_f64(), "Running external command");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: command.program.display().to_string(),
                source,
            })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        // Pipes are drained while waiting so a chatty child cannot block on a full pipe
        let outcome = tokio::time::timeout(timeout, async {
            tokio::try_join!(
                read_pipe(stdout.as_mut()),
                read_pipe(stderr.as_mut()),
                child.wait()
            )
        })
        .await;

        match outcome {
            Ok(Ok((out, err, status))) => {
                if status.success() {
                    Ok(String::from_utf8_lossy(&out).into_owned())
                } else {
                    let stderr = String::from_utf8_lossy(&err).into_owned();
                    error!(
                        command = %command,
                        status = ?status.code(),
                        stderr = %stderr.trim(),
                        "Command failed"
                    );
                    Err(ToolError::Failed {
                        status: status.code(),
                        stderr,
                    })
                }
            }
            Ok(Err(e)) => {
                error!(command = %command, error = %e, "Failed to collect command output");
                Err(io_error(command, e))
            }
            Err(_) => {
                error!(
                    command = %command,
                    timeout_secs = timeout.as_secs_f64(),
                    "Command timed out"
                );
                if let Err(e) = child.kill().await {
                    warn!(command = %command, error = %e, "Failed to kill timed out command");
                }
                Err(ToolError::Timeout)
            }
        }
    }
}

/// The child started but its output or exit status could not be collected
fn io_error(command: &ToolCommand, source: std::io::Error) -> ToolError {
    ToolError::Io {
        program: command.program.display().to_string(),
        source,
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
