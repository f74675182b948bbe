//! Domain policy store.
//!
//! Holds the authoritative set of hostnames eligible for automatic
//! certificate issuance. Patterns are exact hostnames or wildcard
//! suffixes (`*.pds.example.com`). The compiled set is swapped
//! wholesale on reload; readers never observe a partial update.
//!
//! # Lookup cost
//!
//! Evaluation is one exact-map probe plus one wildcard-map probe per
//! label of the queried hostname, so cost scales with the hostname's
//! depth, not with the number of registered policies. This keeps the
//! hot path cheap under hostname flooding.
//!
//! # Thread safety
//!
//! The live [`PolicySet`] sits behind an [`ArcSwap`]; `decide` callers
//! take a cheap load, and reload is a pointer swap.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use certgate_config::PolicyEntry;

use crate::hostname;

/// A single hostname issuance policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostnamePolicy {
    /// Exact hostname or `*.`-prefixed wildcard-suffix pattern
    pub pattern: String,
    /// Whether matching hostnames may trigger certificate issuance
    pub allow_cert_issuance: bool,
}

impl From<&PolicyEntry> for HostnamePolicy {
    fn from(entry: &PolicyEntry) -> Self {
        Self {
            pattern: entry.pattern.clone(),
            allow_cert_issuance: entry.allow,
        }
    }
}

/// Outcome of a policy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// Most specific matching policy allows issuance
    Allow,
    /// Most specific matching policy denies issuance
    Deny,
    /// No policy matches the hostname
    NoMatch,
}

/// An immutable compiled policy set
///
/// Exact patterns and wildcard suffixes live in separate maps. Two
/// entries with the same pattern and conflicting verdicts compile to
/// deny (fail closed).
#[derive(Debug, Default)]
pub struct PolicySet {
    /// Exact hostname -> allow
    exact: HashMap<String, bool>,
    /// Wildcard suffix (the part after `*.`) -> allow
    wildcard: HashMap<String, bool>,
}

impl PolicySet {
    /// Compile a policy set from configuration entries
    pub fn from_entries(entries: &[PolicyEntry]) -> Self {
        Self::from_policies(entries.iter().map(HostnamePolicy::from))
    }

    /// Compile a policy set
    ///
    /// Patterns that do not normalize to a valid hostname are skipped
    /// with a warning; configuration validation rejects them upfront,
    /// so this only fires on a hot-reloaded file that bypassed `test`.
    pub fn from_policies(policies: impl IntoIterator<Item = HostnamePolicy>) -> Self {
        let mut set = PolicySet::default();

        for policy in policies {
            let (is_wildcard, raw_suffix) = match policy.pattern.strip_prefix("*.") {
                Some(suffix) => (true, suffix),
                None => (false, policy.pattern.as_str()),
            };

            let suffix = match hostname::normalize(raw_suffix) {
                Ok(s) => s,
                Err(e) => {
                    warn!(
                        pattern = %policy.pattern,
                        error = %e,
                        "Skipping invalid policy pattern"
                    );
                    continue;
                }
            };

            let map = if is_wildcard {
                &mut set.wildcard
            } else {
                &mut set.exact
            };

            match map.entry(suffix) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(policy.allow_cert_issuance);
                }
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    if *slot.get() != policy.allow_cert_issuance {
                        warn!(
                            pattern = %policy.pattern,
                            "Conflicting verdicts for identical pattern, denying"
                        );
                        slot.insert(false);
                    }
                }
            }
        }

        set
    }

    /// Evaluate a normalized hostname against the policy set
    ///
    /// Specificity: an exact match always wins; otherwise the longest
    /// matching wildcard suffix wins. Evaluation is total: the result
    /// is always one of the three outcomes, never "unknown".
    pub fn evaluate(&self, hostname: &str) -> PolicyOutcome {
        if let Some(&allow) = self.exact.get(hostname) {
            return verdict(allow);
        }

        // Probe successively shorter suffixes; the first hit is the
        // longest (most specific) wildcard. `*.x` requires at least one
        // label before the suffix, so the full hostname is not probed.
        let mut rest = hostname;
        while let Some(dot) = rest.find('.') {
            rest = &rest[dot + 1..];
            if let Some(&allow) = self.wildcard.get(rest) {
                return verdict(allow);
            }
        }

        PolicyOutcome::NoMatch
    }

    /// Whether the hostname matches a policy permitting issuance
    pub fn matches(&self, hostname: &str) -> bool {
        self.evaluate(hostname) == PolicyOutcome::Allow
    }

    /// Number of compiled patterns
    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcard.len()
    }

    /// Whether the set contains no patterns
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcard.is_empty()
    }
}

fn verdict(allow: bool) -> PolicyOutcome {
    if allow {
        PolicyOutcome::Allow
    } else {
        PolicyOutcome::Deny
    }
}

/// Shared, atomically reloadable policy store
#[derive(Debug)]
pub struct PolicyStore {
    current: ArcSwap<PolicySet>,
}

impl PolicyStore {
    /// Create a store from an initial set of entries
    pub fn new(entries: &[PolicyEntry]) -> Self {
        let set = PolicySet::from_entries(entries);
        debug!(pattern_count = set.len(), "Compiled initial policy set");
        Self {
            current: ArcSwap::from_pointee(set),
        }
    }

    /// Create an empty store (denies everything until loaded)
    pub fn empty() -> Self {
        Self {
            current: ArcSwap::from_pointee(PolicySet::default()),
        }
    }

    /// Get the live policy set
    pub fn load(&self) -> Arc<PolicySet> {
        self.current.load_full()
    }

    /// Atomically replace the live policy set
    ///
    /// In-flight `decide` calls keep the set they already loaded; new
    /// calls observe the replacement immediately.
    pub fn swap(&self, entries: &[PolicyEntry]) {
        let set = PolicySet::from_entries(entries);
        debug!(pattern_count = set.len(), "Swapping in reloaded policy set");
        self.current.store(Arc::new(set));
    }
}
