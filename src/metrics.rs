// Prometheus metrics for the command gateway
//
// Exposes metrics on the /metrics HTTP endpoint:
// - Executions by completion reason (counter)
// - Rejections by error kind (counter)
// - Execution duration (histogram)
// - Commands in flight (gauge)
// - Translator requests by outcome (counter)

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{Arc, Once};
use std::time::Duration;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref COMMANDS_EXECUTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("commands_executed_total", "Total number of commands that ran to a result"),
        &["reason"]
    ).expect("Failed to create commands executed metric");

    pub static ref COMMANDS_REJECTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("commands_rejected_total", "Total number of requests that failed before producing a result"),
        &["kind"]
    ).expect("Failed to create commands rejected metric");

    pub static ref COMMAND_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("command_duration_seconds", "Command execution duration in seconds")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]),
        &["reason"]
    ).expect("Failed to create command duration metric");

    pub static ref COMMANDS_IN_FLIGHT: IntGauge = IntGauge::new(
        "commands_in_flight",
        "Number of external processes currently running"
    ).expect("Failed to create commands in flight metric");

    pub static ref TRANSLATOR_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("translator_requests_total", "Total number of translator requests"),
        &["status"]
    ).expect("Failed to create translator requests metric");
}

static INIT: Once = Once::new();

/// Register all metrics with the registry
///
/// Safe to call more than once; only the first call registers.
pub fn init() -> prometheus::Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = register_all();
    });
    result
}

fn register_all() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(COMMANDS_EXECUTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMMANDS_REJECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMMAND_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(COMMANDS_IN_FLIGHT.clone()))?;
    REGISTRY.register(Box::new(TRANSLATOR_REQUESTS_TOTAL.clone()))?;
    Ok(())
}

/// Record a finished execution
pub fn record_completion(reason: &str, duration: Duration) {
    COMMANDS_EXECUTED_TOTAL.with_label_values(&[reason]).inc();
    COMMAND_DURATION_SECONDS
        .with_label_values(&[reason])
        .observe(duration.as_secs_f64());
}

/// Record a request that failed before producing a result
pub fn record_rejection(kind: &str) {
    COMMANDS_REJECTED_TOTAL.with_label_values(&[kind]).inc();
}

/// Record a translator call outcome
pub fn record_translation(status: &str) {
    TRANSLATOR_REQUESTS_TOTAL.with_label_values(&[status]).inc();
}

/// Keeps `COMMANDS_IN_FLIGHT` incremented while alive
pub struct InFlightGuard(());

impl InFlightGuard {
    pub fn new() -> Self {
        COMMANDS_IN_FLIGHT.inc();
        Self(())
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        COMMANDS_IN_FLIGHT.dec();
    }
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }

    #[test]
    fn test_record_completion() {
        let before = COMMANDS_EXECUTED_TOTAL.with_label_values(&["completed"]).get();
        record_completion("completed", Duration::from_millis(120));
        let after = COMMANDS_EXECUTED_TOTAL.with_label_values(&["completed"]).get();
        assert!(after > before);
    }

    #[test]
    fn test_gather_contains_registered_metrics() {
        init().unwrap();
        record_rejection("policy_violation");

        let text = gather_metrics().unwrap();
        assert!(text.contains("commands_rejected_total"));
    }
}
