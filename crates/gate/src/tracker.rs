//! Abuse-rate tracker.
//!
//! Sliding-window counters bounding how many certificate issuance
//! attempts a single client, and all clients combined, can trigger per
//! window. This is the gate's one piece of shared mutable state: every
//! `record` is atomic with respect to concurrent callers, so two
//! simultaneous attempts are each charged exactly once with no lost
//! updates.
//!
//! Memory is bounded: tracked client entries are capped, and the entry
//! whose newest attempt is stalest is evicted once the cap is exceeded.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Counts charged by a single `record` call, inclusive of that call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charge {
    /// Attempts by this client inside the window
    pub client_count: u32,
    /// Attempts by all clients inside the window
    pub global_count: u32,
}

/// Per-client attempt window
#[derive(Debug)]
struct ClientWindow {
    attempts: VecDeque<Instant>,
    last_seen: Instant,
}

impl ClientWindow {
    fn new(now: Instant) -> Self {
        Self {
            attempts: VecDeque::new(),
            last_seen: now,
        }
    }
}

/// Sliding-window issuance attempt tracker
#[derive(Debug)]
pub struct AbuseTracker {
    /// Window length; attempts older than `now - window` never count
    window: Duration,
    /// Cap on tracked client entries
    max_clients: usize,
    /// Per-client windows; the DashMap shard lock makes each mutation atomic
    clients: DashMap<String, ClientWindow>,
    /// Global window shared by all clients
    global: Mutex<VecDeque<Instant>>,
}

impl AbuseTracker {
    /// Create a tracker with the given window and client cap
    pub fn new(window: Duration, max_clients: usize) -> Self {
        debug!(
            window_secs = window.as_secs(),
            max_clients, "Creating abuse tracker"
        );
        Self {
            window,
            max_clients,
            clients: DashMap::new(),
            global: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one issuance attempt and return the post-charge counts.
    ///
    /// The attempt is retained even if the caller later gives up on the
    /// handshake; a cancelled attempt still spent its slot, which keeps
    /// retry storms from evading the limit.
    pub fn record(&self, client: &str, now: Instant) -> Charge {
        let global_count = {
            let mut global = self.global.lock();
            prune(&mut global, now, self.window);
            global.push_back(now);
            global.len() as u32
        };

        let client_count = {
            let mut entry = self
                .clients
                .entry(client.to_string())
                .or_insert_with(|| ClientWindow::new(now));
            prune(&mut entry.attempts, now, self.window);
            entry.attempts.push_back(now);
            entry.last_seen = now;
            entry.attempts.len() as u32
        };

        if self.clients.len() > self.max_clients {
            self.evict_stalest(client);
        }

        trace!(
            client = %client,
            client_count,
            global_count,
            "Recorded issuance attempt"
        );

        Charge {
            client_count,
            global_count,
        }
    }

    /// Number of tracked client entries
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Drop client entries whose every attempt has left the window.
    ///
    /// Run from a periodic maintenance task; `record` already prunes
    /// the entries it touches, so this only reclaims idle keys.
    pub fn sweep(&self, now: Instant) {
        let before = self.clients.len();
        let window = self.window;
        self.clients.retain(|_, state| {
            prune(&mut state.attempts, now, window);
            !state.attempts.is_empty()
        });
        let removed = before - self.clients.len();
        if removed > 0 {
            debug!(removed, "Swept expired client windows");
        }
    }

    /// Evict the entry with the stalest last attempt, sparing `keep`.
    fn evict_stalest(&self, keep: &str) {
        let mut victim: Option<(String, Instant)> = None;

        for entry in self.clients.iter() {
            if entry.key() == keep {
                continue;
            }
            match victim {
                Some((_, seen)) if entry.value().last_seen >= seen => {}
                _ => victim = Some((entry.key().clone(), entry.value().last_seen)),
            }
        }

        if let Some((key, _)) = victim {
            self.clients.remove(&key);
            trace!(client = %key, "Evicted stalest client window");
        }
    }
}

/// Drop timestamps older than the window from the front of the deque
fn prune(attempts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = attempts.front() {
        match now.checked_duration_since(*front) {
            Some(age) if age > window => {
                attempts.pop_front();
            }
            _ => break,
        }
    }
}
