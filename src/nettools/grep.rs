//! `grep` adapter: literal, case-insensitive pattern checks over fetched
//! bodies. One pattern per invocation; the caller composes AND/OR.

use std::time::Duration;

use super::{run_tool, ToolError};

/// True iff `grep -F -i -q <pattern>` matches the body. A nonzero exit
/// from grep means "no match" (exit 1) and is not an error; anything else
/// propagates.
pub async fn grep_matches(
    body: &str,
    pattern: &str,
    timeout: Duration,
) -> Result<bool, ToolError> {
    let args = vec![
        "-F".to_string(),
        "-i".to_string(),
        "-q".to_string(),
        pattern.to_string(),
    ];
    let output = run_tool("grep", &args, timeout, Some(body.as_bytes())).await?;
    match output.exit_code {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        code => Err(ToolError::NonZeroExit {
            tool: "grep",
            code,
            stderr: output.stderr,
        }),
    }
}
