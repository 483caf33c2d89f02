use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use super::SourceError;

fn command(program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Runs a command to completion and returns its stdout
pub(crate) async fn capture(program: &str, args: &[&str]) -> Result<String, SourceError> {
    let output = command(program, args)
        .output()
        .await
        .map_err(|source| SourceError::Command {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(SourceError::CommandStatus {
            program: program.to_string(),
            status: output.status.to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Line-by-line stdout of a long-running command
///
/// The child is killed when the stream is dropped.
pub(crate) struct LineStream {
    program: String,
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl LineStream {
    pub(crate) fn spawn(program: &str, args: &[&str]) -> Result<Self, SourceError> {
        let mut child = command(program, args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SourceError::Command {
                program: program.to_string(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Unavailable(format!("{program} has no stdout")))?;

        debug!(program = %program, pid = ?child.id(), "Spawned follower");

        Ok(Self {
            program: program.to_string(),
            child,
            lines: BufReader::new(stdout).lines(),
        })
    }

    /// Next line, or `None` once the command has exited
    pub(crate) async fn next_line(&mut self) -> Option<String> {
        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!(program = %self.program, error = %e, "Failed to read output");
                None
            }
        }
    }

    pub(crate) async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(program = %self.program, error = %e, "Follower already gone");
        }
    }
}
