// src/utils/shell.rs
use std::process::Output;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, trace, warn};

/// Execute a shell command under a timeout budget. Delegated rewrites fan
/// out across entire tenant namespaces, so no external call runs unbounded.
pub async fn execute_command(cmd: &str, timeout_secs: u64) -> Result<Output> {
    debug!("Executing command with timeout {}s: {}", timeout_secs, cmd);

    let command_future = Command::new("sh").arg("-c").arg(cmd).output();

    let output = match tokio::time::timeout(
        std::time::Duration::from_secs(timeout_secs),
        command_future,
    )
    .await
    {
        Ok(result) => result.context(format!("Failed to execute command: {}", cmd))?,
        Err(_) => {
            warn!("Command timed out after {} seconds: {}", timeout_secs, cmd);
            anyhow::bail!("Command timed out after {} seconds: {}", timeout_secs, cmd);
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("Command failed: {}\nStderr: {}", cmd, stderr);
    } else {
        trace!("Command succeeded: {}", cmd);
    }

    Ok(output)
}
