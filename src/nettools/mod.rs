//! Subprocess adapters for `curl`, `grep`, `whois`, and `dig`.
//!
//! Every invocation goes through [`run_tool`]: argument vectors only (no
//! shell), a hard deadline, and a capped output buffer. Adapters classify
//! failures instead of propagating raw I/O errors so the pipeline can
//! treat a tool failure as "candidate unverified" rather than a crash.

mod curl;
mod dig;
mod grep;
mod whois;

pub use curl::{curl_fetch, CurlOptions, CurlResult};
pub use dig::{dig_lookup, DigOptions};
pub use grep::grep_matches;
pub use whois::{whois_lookup, WhoisOptions, WhoisServerMode, WhoisServerPicker};

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Output buffer cap per stream. Anything beyond this is discarded and the
/// invocation reported as oversize.
pub const MAX_TOOL_OUTPUT: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} not found or failed to spawn: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} timed out after {timeout:?}")]
    Timeout { tool: &'static str, timeout: Duration },
    #[error("{tool} produced more than {MAX_TOOL_OUTPUT} bytes")]
    Oversize { tool: &'static str },
    #[error("{tool} exited with {code:?}: {stderr}")]
    NonZeroExit {
        tool: &'static str,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{tool} I/O error: {source}")]
    Io {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Raw result of one subprocess run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run a tool with a hard deadline and capped, lossily-decoded output.
///
/// `stdin_data`, when present, is written to the child's stdin and the
/// handle closed before reading output (the `grep` adapter pipes bodies
/// this way).
pub async fn run_tool(
    tool: &'static str,
    args: &[String],
    timeout: Duration,
    stdin_data: Option<&[u8]>,
) -> Result<ToolOutput, ToolError> {
    let mut command = Command::new(tool);
    command
        .args(args)
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|source| ToolError::Spawn { tool, source })?;

    let run = async {
        if let Some(data) = stdin_data {
            if let Some(mut stdin) = child.stdin.take() {
                use tokio::io::AsyncWriteExt;
                // a dead child closes the pipe early; that's its answer
                let _ = stdin.write_all(data).await;
                let _ = stdin.shutdown().await;
            }
        }

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let stdout_read = async {
            match stdout_pipe.as_mut() {
                Some(pipe) => {
                    pipe.take((MAX_TOOL_OUTPUT + 1) as u64)
                        .read_to_end(&mut stdout_buf)
                        .await
                }
                None => Ok(0),
            }
        };
        let stderr_read = async {
            match stderr_pipe.as_mut() {
                Some(pipe) => {
                    pipe.take((MAX_TOOL_OUTPUT + 1) as u64)
                        .read_to_end(&mut stderr_buf)
                        .await
                }
                None => Ok(0),
            }
        };

        let (stdout_res, stderr_res, status) =
            tokio::join!(stdout_read, stderr_read, child.wait());

        stdout_res.map_err(|source| ToolError::Io { tool, source })?;
        stderr_res.map_err(|source| ToolError::Io { tool, source })?;
        let status = status.map_err(|source| ToolError::Io { tool, source })?;

        if stdout_buf.len() > MAX_TOOL_OUTPUT || stderr_buf.len() > MAX_TOOL_OUTPUT {
            return Err(ToolError::Oversize { tool });
        }

        Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
            exit_code: status.code(),
        })
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(result) => result,
        Err(_) => {
            // kill_on_drop reaps the child when it goes out of scope below
            Err(ToolError::Timeout { tool, timeout })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let out = run_tool(
            "echo",
            &["hello".to_string()],
            Duration::from_secs(5),
            None,
        )
        .await
        .expect("echo runs");
        assert_eq!(out.stdout.trim(), "hello");
        assert!(out.success());
    }

    #[tokio::test]
    async fn reports_missing_tool_as_spawn_error() {
        let err = run_tool(
            "blockscan-no-such-tool",
            &[],
            Duration::from_secs(1),
            None,
        )
        .await
        .expect_err("tool does not exist");
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn enforces_deadline() {
        let err = run_tool(
            "sleep",
            &["5".to_string()],
            Duration::from_millis(100),
            None,
        )
        .await
        .expect_err("sleep must time out");
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn pipes_stdin() {
        let out = run_tool(
            "cat",
            &[],
            Duration::from_secs(5),
            Some(b"piped content"),
        )
        .await
        .expect("cat runs");
        assert_eq!(out.stdout, "piped content");
    }
}
