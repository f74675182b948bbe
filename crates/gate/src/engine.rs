//! Admission decision engine.
//!
//! Ties the policy store and the abuse tracker together into the single
//! question the proxy asks: may a certificate be minted for this
//! hostname, right now, for this client?
//!
//! The engine fails closed. Malformed input, a missing policy, an
//! exhausted rate budget, and any internal fault all resolve to deny;
//! nothing here can resolve to an implicit allow.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::errors::GateError;
use crate::hostname;
use crate::metrics::GateMetrics;
use crate::policy::{PolicyOutcome, PolicyStore};
use crate::tracker::AbuseTracker;

/// Why a decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    /// A policy permits issuance and the rate budget held
    PolicyMatch,
    /// No permitting policy, a denying policy won, or malformed input
    PolicyReject,
    /// Policy permitted but a rate threshold was exceeded
    RateLimited,
}

impl DecisionReason {
    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::PolicyMatch => "policy_match",
            DecisionReason::PolicyReject => "policy_reject",
            DecisionReason::RateLimited => "rate_limited",
        }
    }
}

/// One admission decision, constructed per request and never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Normalized hostname, or the raw input when it failed to normalize
    pub hostname: String,
    pub allowed: bool,
    pub reason: DecisionReason,
}

/// Admission decision engine
pub struct DecisionEngine {
    store: Arc<PolicyStore>,
    tracker: Arc<AbuseTracker>,
    metrics: Arc<GateMetrics>,
    per_client_threshold: u32,
    global_threshold: u32,
}

impl DecisionEngine {
    /// Create an engine over the given store and tracker
    pub fn new(
        store: Arc<PolicyStore>,
        tracker: Arc<AbuseTracker>,
        metrics: Arc<GateMetrics>,
        per_client_threshold: u32,
        global_threshold: u32,
    ) -> Self {
        debug!(
            per_client_threshold,
            global_threshold, "Creating decision engine"
        );
        Self {
            store,
            tracker,
            metrics,
            per_client_threshold,
            global_threshold,
        }
    }

    /// Decide whether a certificate may be issued for `raw_hostname`.
    ///
    /// Order matters: malformed and policy-rejected hostnames are turned
    /// away before the tracker is charged, so floods of garbage SNI
    /// cannot consume a legitimate client's rate budget.
    pub fn decide(&self, raw_hostname: &str, client: &str, now: Instant) -> Decision {
        let hostname = match hostname::normalize(raw_hostname) {
            Ok(h) => h,
            Err(e) => {
                let decision = Decision {
                    hostname: raw_hostname.to_string(),
                    allowed: false,
                    reason: DecisionReason::PolicyReject,
                };
                info!(
                    hostname = %raw_hostname,
                    client = %client,
                    allowed = false,
                    reason = decision.reason.as_str(),
                    error = %e,
                    "Rejected malformed hostname"
                );
                self.metrics.record_decision(&decision);
                return decision;
            }
        };

        let decision = match self.store.load().evaluate(&hostname) {
            PolicyOutcome::Deny | PolicyOutcome::NoMatch => Decision {
                hostname,
                allowed: false,
                reason: DecisionReason::PolicyReject,
            },
            PolicyOutcome::Allow => {
                let charge = self.tracker.record(client, now);
                if charge.client_count > self.per_client_threshold
                    || charge.global_count > self.global_threshold
                {
                    let err = GateError::RateLimitExceeded {
                        client: client.to_string(),
                    };
                    debug!(
                        client_count = charge.client_count,
                        global_count = charge.global_count,
                        error = %err,
                        "Rate threshold exceeded"
                    );
                    Decision {
                        hostname,
                        allowed: false,
                        reason: DecisionReason::RateLimited,
                    }
                } else {
                    Decision {
                        hostname,
                        allowed: true,
                        reason: DecisionReason::PolicyMatch,
                    }
                }
            }
        };

        // Expected traffic shaping logs at normal severity
        info!(
            hostname = %decision.hostname,
            client = %client,
            allowed = decision.allowed,
            reason = decision.reason.as_str(),
            "Admission decision"
        );

        self.metrics.record_decision(&decision);
        self.metrics
            .set_tracked_clients(self.tracker.tracked_clients());

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certgate_config::PolicyEntry;
    use std::time::Duration;

    fn entry(pattern: &str, allow: bool) -> PolicyEntry {
        PolicyEntry {
            pattern: pattern.to_string(),
            allow,
        }
    }

    fn engine(entries: &[PolicyEntry], per_client: u32, global: u32) -> DecisionEngine {
        DecisionEngine::new(
            Arc::new(PolicyStore::new(entries)),
            Arc::new(AbuseTracker::new(Duration::from_secs(60), 64)),
            Arc::new(GateMetrics::new()),
            per_client,
            global,
        )
    }

    #[test]
    fn test_unmatched_hostname_policy_reject() {
        let e = engine(&[entry("*.pds.snek.cc", true)], 5, 50);
        let d = e.decide("other.example.com", "10.0.0.1", Instant::now());

        assert!(!d.allowed);
        assert_eq!(d.reason, DecisionReason::PolicyReject);
    }

    #[test]
    fn test_matched_hostname_allowed_below_threshold() {
        let e = engine(&[entry("*.pds.snek.cc", true)], 5, 50);
        let d = e.decide("foo.pds.snek.cc", "10.0.0.1", Instant::now());

        assert!(d.allowed);
        assert_eq!(d.reason, DecisionReason::PolicyMatch);
        assert_eq!(d.hostname, "foo.pds.snek.cc");
    }

    #[test]
    fn test_rate_limit_after_threshold() {
        let e = engine(&[entry("*.pds.snek.cc", true)], 5, 50);
        let now = Instant::now();

        for i in 0..5 {
            let d = e.decide("foo.pds.snek.cc", "10.0.0.1", now + Duration::from_secs(i));
            assert!(d.allowed, "attempt {} should be allowed", i + 1);
        }

        let sixth = e.decide("foo.pds.snek.cc", "10.0.0.1", now + Duration::from_secs(10));
        assert!(!sixth.allowed);
        assert_eq!(sixth.reason, DecisionReason::RateLimited);
    }

    #[test]
    fn test_rate_limit_per_client_independent() {
        let e = engine(&[entry("*.pds.snek.cc", true)], 5, 50);
        let now = Instant::now();

        for _ in 0..6 {
            e.decide("foo.pds.snek.cc", "10.0.0.1", now);
        }

        // Client B has its own budget
        let d = e.decide("foo.pds.snek.cc", "10.0.0.2", now);
        assert!(d.allowed);
    }

    #[test]
    fn test_global_threshold_binds_across_clients() {
        let e = engine(&[entry("*.pds.snek.cc", true)], 100, 10);
        let now = Instant::now();

        for i in 0..10 {
            let client = format!("10.0.0.{i}");
            let d = e.decide("foo.pds.snek.cc", &client, now);
            assert!(d.allowed);
        }

        let d = e.decide("foo.pds.snek.cc", "10.0.0.99", now);
        assert!(!d.allowed);
        assert_eq!(d.reason, DecisionReason::RateLimited);
    }

    #[test]
    fn test_exact_deny_beats_wildcard_allow() {
        let e = engine(
            &[entry("*.example.com", true), entry("sub.example.com", false)],
            5,
            50,
        );

        let d = e.decide("sub.example.com", "10.0.0.1", Instant::now());
        assert!(!d.allowed);
        assert_eq!(d.reason, DecisionReason::PolicyReject);
    }

    #[test]
    fn test_malformed_hostname_no_tracker_charge() {
        let tracker = Arc::new(AbuseTracker::new(Duration::from_secs(60), 64));
        let e = DecisionEngine::new(
            Arc::new(PolicyStore::new(&[entry("*.pds.snek.cc", true)])),
            Arc::clone(&tracker),
            Arc::new(GateMetrics::new()),
            5,
            50,
        );

        let d = e.decide("http://evil\x00.com", "10.0.0.1", Instant::now());
        assert!(!d.allowed);
        assert_eq!(d.reason, DecisionReason::PolicyReject);
        assert_eq!(tracker.tracked_clients(), 0);
    }

    #[test]
    fn test_policy_reject_no_tracker_charge() {
        let tracker = Arc::new(AbuseTracker::new(Duration::from_secs(60), 64));
        let e = DecisionEngine::new(
            Arc::new(PolicyStore::new(&[entry("*.pds.snek.cc", true)])),
            Arc::clone(&tracker),
            Arc::new(GateMetrics::new()),
            5,
            50,
        );

        e.decide("unmatched.example.com", "10.0.0.1", Instant::now());
        assert_eq!(tracker.tracked_clients(), 0);
    }

    #[test]
    fn test_case_and_trailing_dot_normalized() {
        let e = engine(&[entry("*.pds.snek.cc", true)], 5, 50);

        let d = e.decide("Foo.PDS.Snek.CC.", "10.0.0.1", Instant::now());
        assert!(d.allowed);
        assert_eq!(d.hostname, "foo.pds.snek.cc");
    }

    #[test]
    fn test_same_decision_replayed_below_threshold() {
        let e = engine(&[entry("*.pds.snek.cc", true)], 5, 50);
        let now = Instant::now();

        let first = e.decide("foo.pds.snek.cc", "10.0.0.1", now);
        let second = e.decide("foo.pds.snek.cc", "10.0.0.1", now);

        assert_eq!(first.reason, second.reason);
        assert_eq!(first.allowed, second.allowed);
    }
}
