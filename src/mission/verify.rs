//! Runs the operator-supplied verification command.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub passed: bool,
    pub output: String,
}

/// Shells out in the given working directory with a wall-clock deadline.
/// Pass iff the command launched and exited zero. Stdout and stderr are
/// concatenated (newline-separated) and trimmed.
pub async fn run_verify(cmd: &str, cwd: &Path, deadline: Duration) -> VerifyOutcome {
    debug!(cmd, cwd = %cwd.display(), "Running verification command");

    let run = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(deadline, run).await {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let combined = format!("{}\n{}", stdout, stderr).trim().to_string();
            VerifyOutcome {
                passed: output.status.success(),
                output: combined,
            }
        }
        Ok(Err(e)) => VerifyOutcome {
            passed: false,
            output: format!("failed to launch verification command: {}", e),
        },
        Err(_) => VerifyOutcome {
            passed: false,
            output: format!(
                "verification command timed out after {}s",
                deadline.as_secs()
            ),
        },
    }
}
