//! Certgate configuration
//!
//! Loads and validates the admission gate's configuration: the ask
//! listener, the hostname policy set, and the abuse-rate thresholds.
//!
//! Configuration is a KDL document:
//!
//! ```kdl
//! listener {
//!     address "127.0.0.1:9123"
//!     ask-timeout-ms 250
//!     trust-forwarded-header #false
//! }
//!
//! policy {
//!     allow "pds.example.com"
//!     allow "*.pds.example.com"
//!     deny "internal.pds.example.com"
//!     file "/etc/certgate/domains.kdl"
//! }
//!
//! rate-limit {
//!     window-secs 60
//!     per-client 5
//!     global 50
//!     max-tracked-clients 4096
//! }
//! ```
//!
//! Policy patterns are either exact hostnames or wildcard-suffix
//! patterns (`*.pds.example.com`). `deny` entries carve exclusions out
//! of a broader wildcard and win ties per the specificity rules in the
//! gate crate.
//!
//! `trust-forwarded-header` controls whether the `X-Forwarded-For`
//! header is honored as the per-client rate key. Leave it off (the
//! default) unless the listener is reachable only by a proxy you
//! control: the header is attacker-supplied, and trusting it on an
//! open listener lets a caller mint a fresh rate budget per request by
//! rotating the value.

mod error;
mod kdl;
mod validate;

pub use error::ConfigError;
pub use validate::{ValidationResult, ValidationWarning};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ============================================================================
// Defaults
// ============================================================================

pub fn default_listen_address() -> String {
    "127.0.0.1:9123".to_string()
}

pub fn default_ask_timeout_ms() -> u64 {
    250
}

pub fn default_trust_forwarded_header() -> bool {
    false
}

pub fn default_window_secs() -> u64 {
    60
}

pub fn default_per_client_threshold() -> u32 {
    5
}

pub fn default_global_threshold() -> u32 {
    50
}

pub fn default_max_tracked_clients() -> usize {
    4096
}

// ============================================================================
// Configuration model
// ============================================================================

/// Ask listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Socket address the HTTP ask endpoint binds to
    pub address: String,
    /// Hard deadline for answering a single ask request, in milliseconds.
    /// The caller is blocking a TLS handshake; expiry resolves to deny.
    pub ask_timeout_ms: u64,
    /// Use the first `X-Forwarded-For` hop as the per-client rate key.
    /// Only safe when the listener is reachable solely by a trusted
    /// proxy; otherwise the header lets callers forge client identity.
    pub trust_forwarded_header: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            ask_timeout_ms: default_ask_timeout_ms(),
            trust_forwarded_header: default_trust_forwarded_header(),
        }
    }
}

/// A single hostname policy entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyEntry {
    /// Exact hostname or `*.`-prefixed wildcard-suffix pattern
    pub pattern: String,
    /// Whether matching hostnames may trigger certificate issuance
    pub allow: bool,
}

/// Hostname policy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Inline policy entries
    pub entries: Vec<PolicyEntry>,
    /// Optional standalone policy file (same allow/deny grammar),
    /// merged after the inline entries on every (re)load
    pub file: Option<PathBuf>,
}

/// Abuse-rate tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Sliding window length in seconds
    pub window_secs: u64,
    /// Maximum issuance attempts per client within the window
    pub per_client: u32,
    /// Maximum issuance attempts across all clients within the window
    pub global: u32,
    /// Cap on tracked client entries; stalest entry evicted beyond this
    pub max_tracked_clients: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            per_client: default_per_client_threshold(),
            global: default_global_threshold(),
            max_tracked_clients: default_max_tracked_clients(),
        }
    }
}

/// Top-level certgate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub listener: ListenerConfig,
    pub policy: PolicyConfig,
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Load configuration from a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration file");

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Self::from_str(&contents)?;

        // Resolve a relative policy file against the config file's directory
        if let Some(ref file) = config.policy.file {
            if file.is_relative() {
                if let Some(parent) = path.parent() {
                    config.policy.file = Some(parent.join(file));
                }
            }
        }

        Ok(config)
    }

    /// Parse configuration from a KDL string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let doc = parse_kdl(contents)?;
        kdl::parse_config(&doc)
    }

    /// Collect the effective policy entries: inline entries followed by
    /// the contents of the policy file, if one is configured.
    ///
    /// Re-reads the policy file on every call so the reload path always
    /// observes the on-disk state.
    pub fn load_policy_entries(&self) -> Result<Vec<PolicyEntry>, ConfigError> {
        let mut entries = self.policy.entries.clone();

        if let Some(ref path) = self.policy.file {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let doc = parse_kdl(&contents)?;
            let file_entries = kdl::parse_policy_file(&doc)?;

            info!(
                path = %path.display(),
                entry_count = file_entries.len(),
                "Loaded policy file"
            );
            entries.extend(file_entries);
        }

        Ok(entries)
    }

    /// Validate the configuration, returning all problems found
    pub fn validate(&self) -> Result<ValidationResult, ConfigError> {
        validate::validate_config(self)
    }
}

/// Parse a KDL document, rendering syntax errors through miette so
/// operators get span-annotated diagnostics instead of a bare offset.
fn parse_kdl(contents: &str) -> Result<::kdl::KdlDocument, ConfigError> {
    contents.parse().map_err(|e: ::kdl::KdlError| {
        ConfigError::Parse(format!("{:?}", miette::Report::new(e)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let mut config = Config::default();
        config.policy.entries.push(PolicyEntry {
            pattern: "example.com".to_string(),
            allow: true,
        });
        let result = config.validate().expect("validation runs");
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/certgate.kdl").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_policy_entries_merges_file() {
        let mut policy_file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(policy_file, r#"allow "*.pds.snek.cc""#).expect("write");

        let config = Config {
            policy: PolicyConfig {
                entries: vec![PolicyEntry {
                    pattern: "pds.snek.cc".to_string(),
                    allow: true,
                }],
                file: Some(policy_file.path().to_path_buf()),
            },
            ..Default::default()
        };

        let entries = config.load_policy_entries().expect("load");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].pattern, "*.pds.snek.cc");
    }

    #[test]
    fn test_load_policy_entries_missing_file() {
        let config = Config {
            policy: PolicyConfig {
                entries: Vec::new(),
                file: Some("/nonexistent/domains.kdl".into()),
            },
            ..Default::default()
        };

        assert!(config.load_policy_entries().is_err());
    }
}
