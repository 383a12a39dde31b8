//! Command Policy Module
//!
//! This module decides whether a candidate command may be executed at all.
//! It uses an allow-list of leading verbs: only commands whose first token is
//! a known read-mostly verb (e.g. `get`, `describe`, `logs`) are passed on to
//! the process invoker.
//!
//! The check runs before anything touches the operating system. A rejected
//! command never results in a spawned process.

use std::collections::BTreeSet;

/// Verbs allowed when no explicit policy is configured
pub const DEFAULT_ALLOWED_VERBS: &[&str] = &["get", "describe", "logs", "exec", "rollout", "scale"];

/// Error types for policy validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("Command text is empty")]
    MalformedInput,

    #[error("Command rejected. Only the following verbs are allowed: {}", .allowed.join(", "))]
    PolicyViolation {
        /// The verb that was not on the allow-list
        verb: String,

        /// The full allow-list, in sorted order
        allowed: Vec<String>,
    },
}

/// A candidate command proposed for execution
///
/// Holds the raw text as received plus its whitespace-tokenized argument
/// vector. The first token is the verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateCommand {
    raw: String,
    args: Vec<String>,
}

impl CandidateCommand {
    /// Tokenize a candidate command
    ///
    /// Any run of whitespace (spaces, tabs, newlines) separates tokens.
    /// Returns `PolicyError::MalformedInput` if nothing is left after trimming.
    ///
    /// # Example
    ///
    /// ```
    /// use kubenlp_gateway::tools::CandidateCommand;
    ///
    /// let candidate = CandidateCommand::parse("  get   pods\n-n kube-system ").unwrap();
    /// assert_eq!(candidate.verb(), "get");
    /// assert_eq!(candidate.args(), &["get", "pods", "-n", "kube-system"]);
    /// ```
    pub fn parse(text: &str) -> Result<Self, PolicyError> {
        let args: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        if args.is_empty() {
            return Err(PolicyError::MalformedInput);
        }

        Ok(Self {
            raw: text.to_string(),
            args,
        })
    }

    /// The text this command was parsed from
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The first token
    pub fn verb(&self) -> &str {
        // parse() guarantees at least one token
        &self.args[0]
    }

    /// All tokens, verb included
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Tokens joined by single spaces
    pub fn normalized(&self) -> String {
        self.args.join(" ")
    }
}

/// A command that has passed policy validation
///
/// Only `ExecutionPolicy::validate` constructs this type, so holding one is
/// proof that the verb was on the allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCommand {
    args: Vec<String>,
}

impl ValidatedCommand {
    /// The argument vector to hand to the external binary
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The verb that was accepted
    pub fn verb(&self) -> &str {
        &self.args[0]
    }
}

/// Allow-list of command verbs
///
/// Verbs are stored lower-cased and compared case-insensitively. The policy
/// is immutable once built and is shared read-only between concurrent
/// invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicy {
    allowed_verbs: BTreeSet<String>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_VERBS.iter().copied())
    }
}

impl ExecutionPolicy {
    /// Create a policy from a list of verbs
    ///
    /// Blank entries are ignored; surrounding whitespace is trimmed.
    pub fn new<I, S>(verbs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed_verbs = verbs
            .into_iter()
            .map(|v| v.as_ref().trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .collect();

        Self { allowed_verbs }
    }

    /// Check if a verb is on the allow-list
    pub fn is_allowed(&self, verb: &str) -> bool {
        self.allowed_verbs.contains(&verb.to_lowercase())
    }

    /// The allow-list in sorted order
    pub fn allowed_verbs(&self) -> Vec<String> {
        self.allowed_verbs.iter().cloned().collect()
    }

    /// Validate a candidate command against the allow-list
    ///
    /// # Example
    ///
    /// ```
    /// use kubenlp_gateway::tools::{CandidateCommand, ExecutionPolicy, PolicyError};
    ///
    /// let policy = ExecutionPolicy::default();
    ///
    /// let ok = policy.validate(&CandidateCommand::parse("get nodes").unwrap());
    /// assert!(ok.is_ok());
    ///
    /// let rejected = policy.validate(&CandidateCommand::parse("delete pod web").unwrap());
    /// assert!(matches!(rejected, Err(PolicyError::PolicyViolation { .. })));
    /// ```
    pub fn validate(&self, candidate: &CandidateCommand) -> Result<ValidatedCommand, PolicyError> {
        let verb = candidate.verb();

        if !self.is_allowed(verb) {
            tracing::warn!(verb, "Command verb is not on the allow-list");
            return Err(PolicyError::PolicyViolation {
                verb: verb.to_string(),
                allowed: self.allowed_verbs(),
            });
        }

        tracing::debug!(verb, "Command validated successfully");
        Ok(ValidatedCommand {
            args: candidate.args().to_vec(),
        })
    }

    /// Parse and validate in one step
    pub fn validate_text(&self, text: &str) -> Result<ValidatedCommand, PolicyError> {
        let candidate = CandidateCommand::parse(text)?;
        self.validate(&candidate)
    }
}
