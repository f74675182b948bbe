//! KDL configuration parsing.
//!
//! Translates a parsed KDL document into typed configuration structures.

mod helpers;

use kdl::{KdlDocument, KdlNode};
use tracing::trace;

use crate::error::ConfigError;
use crate::{
    default_ask_timeout_ms, default_global_threshold, default_listen_address,
    default_max_tracked_clients, default_per_client_threshold, default_trust_forwarded_header,
    default_window_secs, Config, ListenerConfig, PolicyConfig, PolicyEntry, RateLimitConfig,
};

use helpers::{get_bool_entry, get_first_arg_string, get_int_entry, get_string_entry};

/// Read a named integer entry, converting into the target width.
///
/// `as` narrowing would silently wrap negatives past the range checks
/// downstream, so out-of-range values are rejected here.
fn int_field<T>(node: &KdlNode, name: &str, default: fn() -> T) -> Result<T, ConfigError>
where
    T: TryFrom<i128>,
{
    match get_int_entry(node, name) {
        None => Ok(default()),
        Some(v) => T::try_from(v).map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            reason: format!("value {v} is out of range"),
        }),
    }
}

/// Parse a full configuration document
pub fn parse_config(doc: &KdlDocument) -> Result<Config, ConfigError> {
    trace!("Parsing configuration document");

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "listener" => config.listener = parse_listener(node)?,
            "policy" => config.policy = parse_policy(node)?,
            "rate-limit" => config.rate_limit = parse_rate_limit(node)?,
            other => {
                return Err(ConfigError::InvalidValue {
                    field: other.to_string(),
                    reason: "unknown top-level block (expected listener, policy, rate-limit)"
                        .to_string(),
                });
            }
        }
    }

    Ok(config)
}

/// Parse the `listener` block
fn parse_listener(node: &KdlNode) -> Result<ListenerConfig, ConfigError> {
    let config = ListenerConfig {
        address: get_string_entry(node, "address").unwrap_or_else(default_listen_address),
        ask_timeout_ms: int_field(node, "ask-timeout-ms", default_ask_timeout_ms)?,
        trust_forwarded_header: get_bool_entry(node, "trust-forwarded-header")
            .unwrap_or_else(default_trust_forwarded_header),
    };

    trace!(
        address = %config.address,
        ask_timeout_ms = config.ask_timeout_ms,
        trust_forwarded_header = config.trust_forwarded_header,
        "Parsed listener configuration"
    );

    Ok(config)
}

/// Parse the `policy` block
///
/// Accepts `allow`/`deny` pattern entries plus an optional `file` entry
/// pointing at a standalone policy document with the same grammar.
fn parse_policy(node: &KdlNode) -> Result<PolicyConfig, ConfigError> {
    let mut config = PolicyConfig {
        entries: Vec::new(),
        file: get_string_entry(node, "file").map(Into::into),
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "allow" | "deny" => {
                    config.entries.push(parse_policy_entry(child)?);
                }
                "file" => {}
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: other.to_string(),
                        reason: "unknown policy entry (expected allow, deny, file)".to_string(),
                    });
                }
            }
        }
    }

    trace!(
        entry_count = config.entries.len(),
        has_file = config.file.is_some(),
        "Parsed policy configuration"
    );

    Ok(config)
}

/// Parse a standalone policy document (the `policy { file "..." }` target)
///
/// Top-level `allow`/`deny` nodes only.
pub fn parse_policy_file(doc: &KdlDocument) -> Result<Vec<PolicyEntry>, ConfigError> {
    let mut entries = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "allow" | "deny" => entries.push(parse_policy_entry(node)?),
            other => {
                return Err(ConfigError::InvalidValue {
                    field: other.to_string(),
                    reason: "unknown policy file entry (expected allow, deny)".to_string(),
                });
            }
        }
    }

    Ok(entries)
}

fn parse_policy_entry(node: &KdlNode) -> Result<PolicyEntry, ConfigError> {
    let pattern = get_first_arg_string(node).ok_or_else(|| ConfigError::MissingField {
        node: node.name().value().to_string(),
        field: "pattern".to_string(),
    })?;

    Ok(PolicyEntry {
        pattern,
        allow: node.name().value() == "allow",
    })
}

/// Parse the `rate-limit` block
fn parse_rate_limit(node: &KdlNode) -> Result<RateLimitConfig, ConfigError> {
    let config = RateLimitConfig {
        window_secs: int_field(node, "window-secs", default_window_secs)?,
        per_client: int_field(node, "per-client", default_per_client_threshold)?,
        global: int_field(node, "global", default_global_threshold)?,
        max_tracked_clients: int_field(node, "max-tracked-clients", default_max_tracked_clients)?,
    };

    trace!(
        window_secs = config.window_secs,
        per_client = config.per_client,
        global = config.global,
        max_tracked_clients = config.max_tracked_clients,
        "Parsed rate-limit configuration"
    );

    Ok(config)
}
