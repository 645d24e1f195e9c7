//! Shell command execution.

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Exit-code surrogate reported when a command exceeds its timeout,
/// mirroring the `timeout(1)` convention.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit-code surrogate when the shell itself could not be spawned.
const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// How much trailing stderr is kept for the failure summary.
const STDERR_TAIL_BYTES: usize = 512;

/// Result of running one command.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// The command's exit code (or a surrogate for timeout/spawn failure).
    pub exit_code: i32,

    /// Bounded tail of the captured stderr.
    pub stderr_tail: String,

    /// Wall-clock execution time.
    pub duration: Duration,
}

impl ExecutionOutcome {
    /// True when the command exited 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// One-line failure summary recorded as the job's `last_error`.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.stderr_tail.is_empty() {
            format!("exit code {}", self.exit_code)
        } else {
            format!("exit code {}: {}", self.exit_code, self.stderr_tail)
        }
    }
}

/// Runs job commands through `sh -c`, so `&&`, redirection and quoting
/// behave as they would in a shell.
#[derive(Debug, Clone, Default)]
pub struct JobExecutor {
    timeout: Option<Duration>,
}

impl JobExecutor {
    /// An executor with no timeout: commands may run indefinitely.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An executor that kills commands running longer than `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Executes a command and classifies its outcome.
    ///
    /// Never returns an error: spawn failures and timeouts are folded into
    /// the outcome with surrogate exit codes so they drive the normal retry
    /// state machine.
    pub async fn execute(&self, command: &str) -> ExecutionOutcome {
        let started = Instant::now();

        let mut shell = Command::new("sh");
        shell
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let output_future = shell.output();

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, output_future).await {
                Ok(result) => result,
                Err(_) => {
                    // Dropping the output future kills the child.
                    debug!(command, timeout_secs = limit.as_secs(), "command timed out");
                    return ExecutionOutcome {
                        exit_code: TIMEOUT_EXIT_CODE,
                        stderr_tail: format!("timed out after {}s", limit.as_secs()),
                        duration: started.elapsed(),
                    };
                }
            },
            None => output_future.await,
        };

        let duration = started.elapsed();

        match result {
            Ok(output) => {
                // A signal-terminated child has no code; report -1.
                let exit_code = output.status.code().unwrap_or(-1);
                let stderr = String::from_utf8_lossy(&output.stderr);
                ExecutionOutcome {
                    exit_code,
                    stderr_tail: tail(&stderr, STDERR_TAIL_BYTES),
                    duration,
                }
            }
            Err(e) => ExecutionOutcome {
                exit_code: SPAWN_FAILURE_EXIT_CODE,
                stderr_tail: format!("failed to spawn shell: {e}"),
                duration,
            },
        }
    }
}

/// Last `max_bytes` of a string, cut on a char boundary.
fn tail(s: &str, max_bytes: usize) -> String {
    let trimmed = s.trim_end();
    if trimmed.len() <= max_bytes {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - max_bytes;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command() {
        let outcome = JobExecutor::new().execute("echo ok").await;
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.success());
        assert!(outcome.stderr_tail.is_empty());
    }

    #[tokio::test]
    async fn exit_code_is_preserved() {
        let outcome = JobExecutor::new().execute("exit 7").await;
        assert_eq!(outcome.exit_code, 7);
        assert!(!outcome.success());
        assert_eq!(outcome.summary(), "exit code 7");
    }

    #[tokio::test]
    async fn shell_operators_work() {
        let outcome = JobExecutor::new().execute("true && echo done").await;
        assert!(outcome.success());
    }

    #[tokio::test]
    async fn stderr_tail_is_captured() {
        let outcome = JobExecutor::new().execute("echo boom >&2; exit 1").await;
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(outcome.stderr_tail, "boom");
        assert_eq!(outcome.summary(), "exit code 1: boom");
    }

    #[tokio::test]
    async fn long_stderr_is_bounded() {
        let outcome = JobExecutor::new()
            .execute("yes error | head -n 200 >&2; exit 1")
            .await;
        assert!(outcome.stderr_tail.len() <= STDERR_TAIL_BYTES);
        assert!(outcome.stderr_tail.ends_with("error"));
    }

    #[tokio::test]
    async fn timeout_reports_the_surrogate_exit_code() {
        let executor = JobExecutor::with_timeout(Some(Duration::from_millis(100)));
        let outcome = executor.execute("sleep 5").await;
        assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
        assert!(outcome.stderr_tail.contains("timed out"));
        assert!(outcome.duration < Duration::from_secs(2));
    }

    #[test]
    fn tail_respects_char_boundaries() {
        let s = "日本語テキスト";
        let cut = tail(s, 5);
        assert!(cut.len() <= 5);
        assert!(s.ends_with(&cut) || cut.is_empty());
    }
}
