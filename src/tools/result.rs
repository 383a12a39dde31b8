//! Execution results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit code reported when the deadline terminated the process
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// How an invocation reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// The process exited on its own before the deadline
    Completed,

    /// The deadline fired first and the process was killed
    TimedOut,
}

impl CompletionReason {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionReason::Completed => "completed",
            CompletionReason::TimedOut => "timed_out",
        }
    }
}

/// Result of one command execution
///
/// Built once by `ExecutionResult::assemble` and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Human-readable command line (display only; execution used the vector)
    pub display_command: String,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error, including the timeout diagnostic if any
    pub stderr: String,

    /// Process exit code, or `TIMEOUT_EXIT_CODE`
    pub exit_code: i32,

    /// Terminal classification
    pub completion_reason: CompletionReason,

    /// `exit_code == 0`
    pub success: bool,

    /// Wall-clock time from spawn to completion in milliseconds
    pub duration_ms: f64,

    /// When the process was spawned
    pub started_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Build the final record
    pub fn assemble(
        display_command: String,
        stdout: String,
        stderr: String,
        exit_code: i32,
        completion_reason: CompletionReason,
        duration_ms: f64,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            display_command,
            stdout,
            stderr,
            exit_code,
            completion_reason,
            success: exit_code == 0,
            duration_ms,
            started_at,
        }
    }

    /// Whether the deadline ended this execution
    pub fn timed_out(&self) -> bool {
        self.completion_reason == CompletionReason::TimedOut
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match self.completion_reason {
            CompletionReason::TimedOut => format!("Timeout after {:.0}ms", self.duration_ms),
            CompletionReason::Completed if self.success => format!(
                "Success (exit code: {}, {:.0}ms, {} bytes output)",
                self.exit_code,
                self.duration_ms,
                self.stdout.len()
            ),
            CompletionReason::Completed => format!(
                "Failed (exit code: {}, {:.0}ms, {} bytes output)",
                self.exit_code,
                self.duration_ms,
                self.stdout.len() + self.stderr.len()
            ),
        }
    }
}

/// Reconstruct a command line for display
///
/// ```
/// use kubenlp_gateway::tools::display_command;
///
/// let args = vec!["get".to_string(), "pods".to_string()];
/// assert_eq!(display_command("kubectl", &args), "kubectl get pods");
/// ```
pub fn display_command(binary: &str, args: &[String]) -> String {
    std::iter::once(binary)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i32, reason: CompletionReason) -> ExecutionResult {
        ExecutionResult::assemble(
            "kubectl get nodes".to_string(),
            "out".to_string(),
            "err".to_string(),
            exit_code,
            reason,
            100.0,
            Utc::now(),
        )
    }

    #[test]
    fn test_success_derived_from_exit_code() {
        assert!(result(0, CompletionReason::Completed).success);
        assert!(!result(1, CompletionReason::Completed).success);
        assert!(!result(TIMEOUT_EXIT_CODE, CompletionReason::TimedOut).success);
    }

    #[test]
    fn test_summary() {
        assert!(result(0, CompletionReason::Completed).summary().contains("Success"));
        assert!(result(2, CompletionReason::Completed).summary().contains("Failed"));
        assert!(result(-1, CompletionReason::TimedOut).summary().contains("Timeout"));
    }

    #[test]
    fn test_display_command() {
        assert_eq!(display_command("kubectl", &[]), "kubectl");
        let args = vec!["logs".to_string(), "web-0".to_string(), "--tail=5".to_string()];
        assert_eq!(display_command("kubectl", &args), "kubectl logs web-0 --tail=5");
    }

    #[test]
    fn test_completion_reason_serialization() {
        let json = serde_json::to_string(&CompletionReason::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
        assert_eq!(CompletionReason::Completed.as_str(), "completed");
    }
}
