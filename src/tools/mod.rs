//! Command Execution Subsystem
//!
//! This module runs allow-listed cluster commands as subprocesses and turns
//! each invocation into exactly one result.
//!
//! # Guarantees
//!
//! - **Verb Allow-List**: Only commands whose first token is an allowed verb run
//! - **List Invocation**: Arguments are passed as a vector, never through a shell
//! - **Deadline Enforcement**: Every execution is bounded by a configurable timeout
//! - **Single Completion**: Natural exit and deadline expiry race through one arbiter
//!
//! # Architecture
//!
//! The module is organized into:
//! - `validator.rs`: Command parsing and verb policy
//! - `process.rs`: Subprocess spawning and output capture
//! - `timeout.rs`: Deadlines and the deadline timer
//! - `arbiter.rs`: Single-assignment completion cell
//! - `result.rs`: Result assembly
//! - `executor.rs`: The end-to-end gateway
//!
//! # Example
//!
//! ```no_run
//! use kubenlp_gateway::tools::CommandGateway;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = CommandGateway::default();
//!
//!     let result = gateway.execute("get pods -n default").await?;
//!     println!("Exit code: {}", result.exit_code);
//!     println!("Stdout: {}", result.stdout);
//!
//!     Ok(())
//! }
//! ```

mod arbiter;
mod executor;
mod process;
mod result;
mod timeout;
mod validator;

pub use arbiter::CompletionArbiter;
pub use executor::{CommandGateway, GatewayConfig, DEFAULT_BINARY};
pub use process::{ExitState, OutputBuffer, ProcessHandle, SpawnError};
pub use result::{display_command, CompletionReason, ExecutionResult, TIMEOUT_EXIT_CODE};
pub use timeout::{
    Deadline, DeadlineTimer, ExecutionTimeout, DEFAULT_TIMEOUT_SECS, MAX_TIMEOUT_SECS,
};
pub use validator::{
    CandidateCommand, ExecutionPolicy, PolicyError, ValidatedCommand, DEFAULT_ALLOWED_VERBS,
};
