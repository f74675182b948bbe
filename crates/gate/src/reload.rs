//! Policy reload plumbing.
//!
//! Policy data is loaded at startup and refreshed out-of-band, never on
//! the request path. Two triggers feed the same reload routine: SIGHUP
//! from an operator, and a periodic tick when a policy file is
//! configured. A failed reload keeps the previous policy set live.

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, trace};

use certgate_config::Config;

use crate::errors::GateError;
use crate::metrics::GateMetrics;
use crate::policy::PolicyStore;

/// How often a configured policy file is re-read without a signal
pub const POLICY_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Signal type for cross-thread communication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    /// Reload the policy set (SIGHUP)
    Reload,
    /// Graceful shutdown (SIGTERM/SIGINT)
    Shutdown,
}

/// Bridges thread-based OS signal handlers with the async runtime
pub struct SignalManager {
    tx: mpsc::Sender<SignalType>,
    rx: Arc<Mutex<mpsc::Receiver<SignalType>>>,
}

impl SignalManager {
    /// Create a signal manager and register the OS handlers
    pub fn install() -> anyhow::Result<Self> {
        use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        debug!("Installing signal handlers");
        let (tx, rx) = mpsc::channel();

        let handler_tx = tx.clone();
        let mut signals = Signals::new([SIGHUP, SIGTERM, SIGINT])?;

        std::thread::spawn(move || {
            for sig in signals.forever() {
                let signal = match sig {
                    SIGHUP => SignalType::Reload,
                    _ => SignalType::Shutdown,
                };
                if handler_tx.send(signal).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        })
    }

    /// Sender for injecting signals (used by tests)
    pub fn sender(&self) -> mpsc::Sender<SignalType> {
        self.tx.clone()
    }

    /// Receive the next signal, blocking the current thread.
    ///
    /// Call from `spawn_blocking` in async contexts.
    pub fn recv_blocking(&self) -> Option<SignalType> {
        trace!("Waiting for signal");
        let signal = self.rx.lock().ok()?.recv().ok();
        if let Some(ref s) = signal {
            debug!(signal = ?s, "Received signal");
        }
        signal
    }
}

/// Re-reads policy entries and swaps them into the live store
pub struct PolicyReloader {
    config: Config,
    store: Arc<PolicyStore>,
    metrics: Arc<GateMetrics>,
}

impl PolicyReloader {
    pub fn new(config: Config, store: Arc<PolicyStore>, metrics: Arc<GateMetrics>) -> Self {
        Self {
            config,
            store,
            metrics,
        }
    }

    /// Whether a policy file is configured (periodic refresh only makes
    /// sense when on-disk state can change underneath the process)
    pub fn has_policy_file(&self) -> bool {
        self.config.policy.file.is_some()
    }

    /// Reload the policy set once.
    ///
    /// On failure the previous set stays live and the error is reported
    /// at elevated severity for operator attention.
    pub fn reload(&self) -> Result<(), GateError> {
        let entries = self
            .config
            .load_policy_entries()
            .map_err(|e| GateError::PolicyStoreUnavailable(e.to_string()))?;

        self.store.swap(&entries);
        info!(entry_count = entries.len(), "Policy set reloaded");
        Ok(())
    }

    /// Reload and record the outcome in metrics
    pub fn reload_tracked(&self) {
        match self.reload() {
            Ok(()) => self.metrics.record_reload(true),
            Err(e) => {
                error!(error = %e, "Policy reload failed, keeping previous set");
                self.metrics.record_reload(false);
            }
        }
    }

    /// Run the periodic refresh loop
    pub async fn run_periodic(self: Arc<Self>, every: Duration) {
        info!(
            interval_secs = every.as_secs(),
            "Starting periodic policy refresh"
        );
        let mut interval = tokio::time::interval(every);
        // The immediate first tick would re-read what startup just loaded
        interval.tick().await;

        loop {
            interval.tick().await;
            debug!("Periodic policy refresh");
            self.reload_tracked();
        }
    }
}
