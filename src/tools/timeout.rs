//! Execution Timeout Management
//!
//! This module provides the deadline that bounds every command execution.
//! `ExecutionTimeout` is the configured duration; `Deadline` is that duration
//! anchored at spawn time; `DeadlineTimer` is the armed timer racing the
//! process.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Default execution timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Largest timeout accepted from configuration (24 hours)
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Stand-in expiry for durations the clock cannot represent
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Execution timeout configuration
///
/// Timeouts are enforced to prevent commands from hanging indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionTimeout {
    /// The timeout duration
    duration: Duration,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::from_secs(DEFAULT_TIMEOUT_SECS)
    }
}

impl ExecutionTimeout {
    /// Create a new execution timeout
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use kubenlp_gateway::tools::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(10));
    /// assert_eq!(timeout.duration(), Duration::from_secs(10));
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Create a timeout from seconds
    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Get the timeout duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Anchor the timeout at the current instant
    pub fn start(&self) -> Deadline {
        Deadline {
            started_at: Instant::now(),
            duration: self.duration,
        }
    }

    /// Diagnostic line appended to stderr when this timeout fires
    ///
    /// ```
    /// use kubenlp_gateway::tools::ExecutionTimeout;
    ///
    /// assert_eq!(
    ///     ExecutionTimeout::default().diagnostic(),
    ///     "Command timed out after 30 seconds."
    /// );
    /// ```
    pub fn diagnostic(&self) -> String {
        let millis = self.duration.as_millis();
        if millis % 1000 == 0 {
            let secs = millis / 1000;
            let unit = if secs == 1 { "second" } else { "seconds" };
            format!("Command timed out after {} {}.", secs, unit)
        } else {
            format!("Command timed out after {} milliseconds.", millis)
        }
    }
}

/// An absolute expiry point
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started_at: Instant,
    duration: Duration,
}

impl Deadline {
    /// When the deadline was anchored
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// When the deadline expires
    ///
    /// Durations too large for the clock saturate to a point decades away.
    pub fn expires_at(&self) -> Instant {
        self.started_at
            .checked_add(self.duration)
            .or_else(|| self.started_at.checked_add(FAR_FUTURE))
            .unwrap_or(self.started_at)
    }

    #[cfg(test)]
    pub(crate) fn remaining(&self) -> Duration {
        self.expires_at().saturating_duration_since(Instant::now())
    }

    #[cfg(test)]
    pub(crate) fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at()
    }
}

/// An armed timer
///
/// Runs `on_expire` once the deadline passes unless disarmed first. Dropping
/// the timer disarms it, so a timer can never outlive the invocation that
/// armed it.
#[derive(Debug)]
pub struct DeadlineTimer {
    task: Option<JoinHandle<()>>,
}

impl DeadlineTimer {
    /// Arm a timer for `deadline`
    ///
    /// `on_expire` runs on a runtime worker, concurrently with whatever the
    /// caller is doing.
    pub fn arm<F>(deadline: Deadline, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            time::sleep_until(deadline.expires_at()).await;
            on_expire();
        });

        Self { task: Some(task) }
    }

    /// Disarm the timer
    ///
    /// After this returns the callback will not start. A callback that had
    /// already started runs to completion; callers resolve that race through
    /// the completion arbiter.
    pub fn disarm(mut self) {
        self.cancel();
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
