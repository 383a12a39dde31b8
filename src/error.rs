//! Gateway error taxonomy
//!
//! Every way a request can fail before producing an `ExecutionResult`.
//! A deadline expiry is not an error: it yields a normal result carrying the
//! sentinel exit code.

use crate::tools::{PolicyError, SpawnError};

/// Errors surfaced to callers of the gateway
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    MalformedInput(String),

    #[error("Failed to translate request: {message}")]
    TranslationFailure {
        message: String,

        /// HTTP status returned by the translator, if it answered at all
        upstream_status: Option<u16>,
    },

    #[error("Failed to generate a command from the translator output")]
    GenerationFailure,

    #[error("Command rejected. Only the following verbs are allowed: {}", .allowed.join(", "))]
    PolicyViolation {
        /// The rejected verb
        verb: String,

        /// The full allow-list
        allowed: Vec<String>,

        /// Display form of the rejected command
        command: String,
    },

    #[error(transparent)]
    SpawnFailure(#[from] SpawnError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Machine-readable error class
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::MalformedInput(_) => "malformed_input",
            GatewayError::TranslationFailure { .. } => "translation_failure",
            GatewayError::GenerationFailure => "generation_failure",
            GatewayError::PolicyViolation { .. } => "policy_violation",
            GatewayError::SpawnFailure(_) => "spawn_failure",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// Convert a policy error, attaching the display form of the command
    pub fn from_policy(error: PolicyError, command: String) -> Self {
        match error {
            PolicyError::MalformedInput => {
                GatewayError::MalformedInput("command text is empty".to_string())
            }
            PolicyError::PolicyViolation { verb, allowed } => GatewayError::PolicyViolation {
                verb,
                allowed,
                command,
            },
        }
    }
}
