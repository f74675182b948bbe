//! Prometheus metrics for the admission gate.
//!
//! One registry per process, exposed on `/metrics` in text exposition
//! format. Decision counters are labelled by reason so operators can
//! separate policy denials from rate limiting at a glance.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::engine::Decision;

/// Gate metrics registry
#[derive(Debug)]
pub struct GateMetrics {
    registry: Registry,
    /// Decisions by reason
    decisions_total: IntCounterVec,
    /// Ask requests that hit the internal deadline
    ask_timeouts_total: IntCounter,
    /// Policy reloads by result
    policy_reloads_total: IntCounterVec,
    /// Currently tracked client windows
    tracked_clients: IntGauge,
}

impl GateMetrics {
    /// Create and register all gate metrics
    pub fn new() -> Self {
        let registry = Registry::new();

        let decisions_total = IntCounterVec::new(
            Opts::new(
                "certgate_decisions_total",
                "Admission decisions by outcome reason",
            ),
            &["reason"],
        )
        .expect("static metric options");

        let ask_timeouts_total = IntCounter::with_opts(Opts::new(
            "certgate_ask_timeouts_total",
            "Ask requests denied because the internal deadline expired",
        ))
        .expect("static metric options");

        let policy_reloads_total = IntCounterVec::new(
            Opts::new(
                "certgate_policy_reloads_total",
                "Policy reload attempts by result",
            ),
            &["result"],
        )
        .expect("static metric options");

        let tracked_clients = IntGauge::with_opts(Opts::new(
            "certgate_tracked_clients",
            "Client windows currently held by the abuse tracker",
        ))
        .expect("static metric options");

        registry
            .register(Box::new(decisions_total.clone()))
            .expect("register decisions counter");
        registry
            .register(Box::new(ask_timeouts_total.clone()))
            .expect("register timeout counter");
        registry
            .register(Box::new(policy_reloads_total.clone()))
            .expect("register reload counter");
        registry
            .register(Box::new(tracked_clients.clone()))
            .expect("register client gauge");

        Self {
            registry,
            decisions_total,
            ask_timeouts_total,
            policy_reloads_total,
            tracked_clients,
        }
    }

    /// Count one decision by its reason
    pub fn record_decision(&self, decision: &Decision) {
        self.decisions_total
            .with_label_values(&[decision.reason.as_str()])
            .inc();
    }

    /// Count one internal ask deadline expiry
    pub fn record_timeout(&self) {
        self.ask_timeouts_total.inc();
    }

    /// Count one policy reload attempt
    pub fn record_reload(&self, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.policy_reloads_total.with_label_values(&[result]).inc();
    }

    /// Update the tracked-clients gauge
    pub fn set_tracked_clients(&self, count: usize) {
        self.tracked_clients.set(count as i64);
    }

    /// Render the registry in Prometheus text exposition format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

impl Default for GateMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DecisionReason;

    #[test]
    fn test_decision_counter_increments() {
        let metrics = GateMetrics::new();

        metrics.record_decision(&Decision {
            hostname: "foo.example.com".to_string(),
            allowed: true,
            reason: DecisionReason::PolicyMatch,
        });
        metrics.record_decision(&Decision {
            hostname: "bar.example.com".to_string(),
            allowed: false,
            reason: DecisionReason::RateLimited,
        });

        let text = metrics.encode().expect("encode");
        assert!(text.contains(r#"certgate_decisions_total{reason="policy_match"} 1"#));
        assert!(text.contains(r#"certgate_decisions_total{reason="rate_limited"} 1"#));
    }

    #[test]
    fn test_timeout_and_reload_counters() {
        let metrics = GateMetrics::new();

        metrics.record_timeout();
        metrics.record_reload(true);
        metrics.record_reload(false);
        metrics.set_tracked_clients(7);

        let text = metrics.encode().expect("encode");
        assert!(text.contains("certgate_ask_timeouts_total 1"));
        assert!(text.contains(r#"certgate_policy_reloads_total{result="ok"} 1"#));
        assert!(text.contains(r#"certgate_policy_reloads_total{result="error"} 1"#));
        assert!(text.contains("certgate_tracked_clients 7"));
    }
}
