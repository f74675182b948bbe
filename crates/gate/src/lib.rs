//! Certgate Library
//!
//! An on-demand TLS certificate admission gate. A reverse proxy calls
//! the gate synchronously on every unrecognized TLS handshake; the gate
//! answers whether a certificate may be minted for that hostname.
//!
//! This library provides the core components:
//!
//! - **Policy Store**: exact and wildcard-suffix hostname patterns,
//!   atomically reloadable
//! - **Abuse Tracker**: sliding-window attempt counters per client and
//!   globally, with bounded memory
//! - **Decision Engine**: normalization, policy lookup, rate charging,
//!   fail-closed verdicts
//! - **Ask Endpoint**: the HTTP surface the proxy's on-demand TLS
//!   feature calls (200 = issue, 403 = reject)
//!
//! # Example
//!
//! ```ignore
//! use certgate::{AbuseTracker, DecisionEngine, GateMetrics, PolicyStore};
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//!
//! let store = Arc::new(PolicyStore::new(&entries));
//! let tracker = Arc::new(AbuseTracker::new(Duration::from_secs(60), 4096));
//! let engine = DecisionEngine::new(store, tracker, Arc::new(GateMetrics::new()), 5, 50);
//!
//! let decision = engine.decide("foo.pds.snek.cc", "203.0.113.5", Instant::now());
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod engine;
pub mod errors;
pub mod hostname;
pub mod metrics;
pub mod policy;
pub mod reload;
pub mod server;
pub mod tracker;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Error handling
pub use errors::GateError;

// Policy store
pub use policy::{HostnamePolicy, PolicyOutcome, PolicySet, PolicyStore};

// Abuse tracking
pub use tracker::{AbuseTracker, Charge};

// Decision engine
pub use engine::{Decision, DecisionEngine, DecisionReason};

// Metrics
pub use metrics::GateMetrics;

// Ask endpoint
pub use server::{GateState, ASK_PATH};

// Reload plumbing
pub use reload::{PolicyReloader, SignalManager, SignalType};
