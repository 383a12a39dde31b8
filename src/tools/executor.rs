//! Command Gateway
//!
//! Runs one candidate command end to end: policy check, spawn, deadline race,
//! result assembly. Implements timeout handling, output capture, and proper
//! error handling.

use super::arbiter::CompletionArbiter;
use super::process::ProcessHandle;
use super::result::{display_command, CompletionReason, ExecutionResult, TIMEOUT_EXIT_CODE};
use super::timeout::{DeadlineTimer, ExecutionTimeout};
use super::validator::{CandidateCommand, ExecutionPolicy, ValidatedCommand};
use crate::error::GatewayError;
use crate::metrics;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};

/// Default external binary
pub const DEFAULT_BINARY: &str = "kubectl";

/// Configuration for command execution
///
/// Immutable once handed to a `CommandGateway`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Binary to execute, resolved through PATH (default: kubectl)
    pub binary: String,

    /// Timeout for execution (default: 30 seconds)
    pub timeout: ExecutionTimeout,

    /// Allowed command verbs
    pub policy: ExecutionPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            timeout: ExecutionTimeout::default(),
            policy: ExecutionPolicy::default(),
        }
    }
}

impl GatewayConfig {
    /// Use a different binary
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Use a different timeout
    pub fn with_timeout(mut self, timeout: ExecutionTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a different allow-list
    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// How the race between exit and deadline ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Exited(i32),
    TimedOut,
}

/// Requests termination when the invocation is dropped
///
/// Covers invocations abandoned mid-flight (e.g. a disconnected HTTP
/// client). A no-op once the process has exited.
struct TerminateOnDrop(Arc<ProcessHandle>);

impl Drop for TerminateOnDrop {
    fn drop(&mut self) {
        self.0.request_termination();
    }
}

/// Gateway for policy-checked, time-bounded command execution
///
/// Cheap to clone; clones share the same immutable configuration.
///
/// # Example
///
/// ```no_run
/// use kubenlp_gateway::tools::{CommandGateway, GatewayConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let gateway = CommandGateway::new(GatewayConfig::default());
///
///     let result = gateway.execute("get nodes").await?;
///     println!("{} -> {}", result.display_command, result.exit_code);
///     println!("{}", result.stdout);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CommandGateway {
    config: Arc<GatewayConfig>,
}

impl Default for CommandGateway {
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}

impl CommandGateway {
    /// Create a gateway with the given configuration
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Get a reference to the config
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Validate a command without running it
    pub fn check(&self, text: &str) -> Result<ValidatedCommand, GatewayError> {
        let candidate = CandidateCommand::parse(text)
            .map_err(|e| self.rejected(e, String::new()))?;
        self.validate(&candidate)
    }

    /// Parse, validate and execute a candidate command
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The text is empty (`MalformedInput`)
    /// - The verb is not allowed (`PolicyViolation`)
    /// - The binary cannot be launched (`SpawnFailure`)
    ///
    /// A timeout is not an error; it produces a result with
    /// `CompletionReason::TimedOut`.
    pub async fn execute(&self, text: &str) -> Result<ExecutionResult, GatewayError> {
        let candidate = CandidateCommand::parse(text)
            .map_err(|e| self.rejected(e, String::new()))?;
        self.execute_candidate(&candidate).await
    }

    /// Validate and execute an already tokenized candidate
    pub async fn execute_candidate(
        &self,
        candidate: &CandidateCommand,
    ) -> Result<ExecutionResult, GatewayError> {
        let validated = self.validate(candidate)?;

        let span = info_span!(
            "invocation",
            id = %uuid::Uuid::new_v4(),
            verb = validated.verb(),
        );
        self.run(validated).instrument(span).await
    }

    fn validate(&self, candidate: &CandidateCommand) -> Result<ValidatedCommand, GatewayError> {
        self.config.policy.validate(candidate).map_err(|e| {
            let command = display_command(&self.config.binary, candidate.args());
            self.rejected(e, command)
        })
    }

    fn rejected(&self, error: super::PolicyError, command: String) -> GatewayError {
        let error = GatewayError::from_policy(error, command);
        metrics::record_rejection(error.kind());
        error
    }

    async fn run(&self, validated: ValidatedCommand) -> Result<ExecutionResult, GatewayError> {
        let binary = &self.config.binary;
        let command = display_command(binary, validated.args());
        info!("Executing: {}", command);

        let started_at = Utc::now();
        let start = Instant::now();

        let handle = match ProcessHandle::spawn(binary, validated.args()) {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                warn!("{}", e);
                metrics::record_rejection("spawn_failure");
                return Err(e.into());
            }
        };
        let _terminate = TerminateOnDrop(handle.clone());
        let _in_flight = metrics::InFlightGuard::new();

        let (arbiter, settled) = CompletionArbiter::new();
        let timeout = self.config.timeout;

        let timer = {
            let handle = handle.clone();
            let arbiter = arbiter.clone();
            DeadlineTimer::arm(timeout.start(), move || {
                // Kill first, unconditionally; harmless if the process is gone
                handle.request_termination();
                arbiter.settle(Completion::TimedOut);
            })
        };

        {
            let handle = handle.clone();
            let arbiter = arbiter.clone();
            tokio::spawn(async move {
                let exit = handle.wait_for_exit().await;
                arbiter.settle(Completion::Exited(exit.code));
            });
        }

        let completion = settled
            .await
            .map_err(|_| GatewayError::Internal("completion signal lost".to_string()))?;

        let (exit_code, reason) = match completion {
            Completion::Exited(code) => {
                timer.disarm();
                // The exit is already decided; this only collects trailing output
                handle.wait_for_output().await;
                handle.stdout().seal();
                handle.stderr().seal();
                (code, CompletionReason::Completed)
            }
            Completion::TimedOut => {
                warn!("Command timed out after {:?}: {}", timeout.duration(), command);
                handle.stdout().seal();
                handle.stderr().seal_with_line(&timeout.diagnostic());
                (TIMEOUT_EXIT_CODE, CompletionReason::TimedOut)
            }
        };

        let duration = start.elapsed();
        metrics::record_completion(reason.as_str(), duration);

        let result = ExecutionResult::assemble(
            command,
            handle.stdout().snapshot(),
            handle.stderr().snapshot(),
            exit_code,
            reason,
            duration.as_secs_f64() * 1000.0,
            started_at,
        );

        info!("{}", result.summary());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn gateway(binary: &str, verbs: &[&str], timeout: ExecutionTimeout) -> CommandGateway {
        CommandGateway::new(
            GatewayConfig::default()
                .with_binary(binary)
                .with_policy(ExecutionPolicy::new(verbs.iter().copied()))
                .with_timeout(timeout),
        )
    }

    /// Test executing a simple echo command
    #[tokio::test]
    async fn test_execute_echo() {
        let gateway = gateway("echo", &["get"], ExecutionTimeout::default());
        let result = gateway.execute("get nodes").await.unwrap();

        assert_eq!(result.display_command, "echo get nodes");
        assert_eq!(result.stdout, "get nodes\n");
        assert_eq!(result.stderr, "");
        assert_eq!(result.exit_code, 0);
        assert!(result.success);
        assert_eq!(result.completion_reason, CompletionReason::Completed);
        assert!(result.duration_ms >= 0.0);
    }

    /// Test executing a command that fails
    #[tokio::test]
    async fn test_execute_failing_command() {
        let gateway = gateway("false", &["get"], ExecutionTimeout::default());
        let result = gateway.execute("get pods").await.unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.completion_reason, CompletionReason::Completed);
    }

    /// Test timeout handling
    #[tokio::test]
    async fn test_timeout() {
        let gateway = gateway("sleep", &["60"], ExecutionTimeout::from_secs(1));

        let started = Instant::now();
        let result = gateway.execute("60").await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(result.timed_out());
        assert_eq!(result.exit_code, -1);
        assert!(!result.success);
        assert!(result.stderr.ends_with("Command timed out after 1 second."));
    }

    #[tokio::test]
    async fn test_natural_exit_wins_while_grandchild_holds_pipe() {
        // sh exits at once; the background sleep keeps stdout open past the
        // 1s deadline and past the drain grace period
        let gateway = gateway("sh", &["-c"], ExecutionTimeout::from_secs(1));
        let result = gateway
            .execute("-c echo${IFS}parent;sleep${IFS}20&exit${IFS}0")
            .await
            .unwrap();

        assert_eq!(result.completion_reason, CompletionReason::Completed);
        assert_eq!(result.exit_code, 0);
        assert!(result.success);
        assert_eq!(result.stdout, "parent\n");
        assert_eq!(result.stderr, "");
    }

    #[tokio::test]
    async fn test_unbounded_timeout_still_completes() {
        let gateway = gateway("echo", &["get"], ExecutionTimeout::from_secs(u64::MAX));
        let result = gateway.execute("get nodes").await.unwrap();

        assert_eq!(result.completion_reason, CompletionReason::Completed);
        assert_eq!(result.stdout, "get nodes\n");
    }

    #[tokio::test]
    async fn test_rejected_verb_never_spawns() {
        // The binary does not exist: a spawn attempt would surface SpawnFailure
        let gateway = gateway("this-command-does-not-exist-12345", &["get"], ExecutionTimeout::default());
        let err = gateway.execute("delete deployment foo").await.unwrap_err();

        match err {
            GatewayError::PolicyViolation { verb, allowed, command } => {
                assert_eq!(verb, "delete");
                assert_eq!(allowed, vec!["get".to_string()]);
                assert_eq!(command, "this-command-does-not-exist-12345 delete deployment foo");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_command_is_malformed() {
        let gateway = CommandGateway::default();
        let err = gateway.execute("   ").await.unwrap_err();
        assert_eq!(err.kind(), "malformed_input");
    }

    /// Test that non-existent commands fail appropriately
    #[tokio::test]
    async fn test_nonexistent_binary() {
        let gateway = gateway("this-command-does-not-exist-12345", &["get"], ExecutionTimeout::default());
        let err = gateway.execute("get nodes").await.unwrap_err();

        assert_eq!(err.kind(), "spawn_failure");
        assert!(err.to_string().contains("Failed to spawn"));
    }

    #[tokio::test]
    async fn test_check_does_not_execute() {
        let gateway = gateway("this-command-does-not-exist-12345", &["get"], ExecutionTimeout::default());
        let validated = gateway.check("get nodes").unwrap();
        assert_eq!(validated.args(), &["get", "nodes"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_invocations_are_independent() {
        let gateway = gateway("echo", &["get"], ExecutionTimeout::default());

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let gateway = gateway.clone();
                tokio::spawn(async move { gateway.execute(&format!("get pod-{}", i)).await })
            })
            .collect();

        for (i, task) in futures::future::join_all(tasks).await.into_iter().enumerate() {
            let result = task.unwrap().unwrap();
            assert_eq!(result.stdout, format!("get pod-{}\n", i));
        }
    }

    #[tokio::test]
    async fn test_gateway_config_builder() {
        let config = GatewayConfig::default();
        assert_eq!(config.binary, "kubectl");
        assert_eq!(config.timeout.duration(), Duration::from_secs(30));
        assert!(config.policy.is_allowed("get"));

        let config = GatewayConfig::default()
            .with_binary("oc")
            .with_timeout(ExecutionTimeout::from_secs(5))
            .with_policy(ExecutionPolicy::new(["top"]));
        assert_eq!(config.binary, "oc");
        assert_eq!(config.timeout.duration(), Duration::from_secs(5));
        assert!(!config.policy.is_allowed("get"));
    }
}
