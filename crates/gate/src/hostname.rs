//! Hostname normalization and syntax checking.
//!
//! Incoming SNI values are attacker-controlled: the proxy forwards
//! whatever hostname appeared in the ClientHello. Anything that does not
//! normalize to a well-formed DNS name is a hard deny before any policy
//! or rate-tracker state is touched.

use crate::errors::GateError;

/// Maximum total hostname length (RFC 1035)
const MAX_HOSTNAME_LEN: usize = 253;

/// Maximum length of a single label
const MAX_LABEL_LEN: usize = 63;

/// Normalize a raw SNI hostname.
///
/// Lowercases ASCII, strips one trailing dot, and rejects anything that
/// is not a sequence of valid LDH labels: embedded control or
/// non-ASCII bytes, empty labels, oversized labels, leading or trailing
/// hyphens, and the empty string.
pub fn normalize(raw: &str) -> Result<String, GateError> {
    let malformed = |reason: &str| GateError::MalformedHostname(reason.to_string());

    if raw.is_empty() {
        return Err(malformed("empty hostname"));
    }
    if raw.len() > MAX_HOSTNAME_LEN + 1 {
        return Err(malformed("hostname too long"));
    }
    if raw.bytes().any(|b| b.is_ascii_control()) {
        return Err(malformed("embedded control character"));
    }

    let trimmed = raw.strip_suffix('.').unwrap_or(raw);
    if trimmed.is_empty() {
        return Err(malformed("hostname is a bare dot"));
    }
    if trimmed.len() > MAX_HOSTNAME_LEN {
        return Err(malformed("hostname too long"));
    }

    let normalized = trimmed.to_ascii_lowercase();

    for label in normalized.split('.') {
        if label.is_empty() {
            return Err(malformed("empty label"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(malformed("label too long"));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(malformed("invalid character in label"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(malformed("label starts or ends with hyphen"));
        }
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_lowercases_and_strips_trailing_dot() {
        assert_eq!(
            normalize("Foo.PDS.Snek.CC.").unwrap(),
            "foo.pds.snek.cc"
        );
    }

    #[test]
    fn test_plain_hostname_unchanged() {
        assert_eq!(normalize("foo.pds.snek.cc").unwrap(), "foo.pds.snek.cc");
    }

    #[test]
    fn test_rejects_empty_and_dots() {
        assert!(normalize("").is_err());
        assert!(normalize(".").is_err());
        assert!(normalize("foo..bar").is_err());
        assert!(normalize(".foo.bar").is_err());
    }

    #[test]
    fn test_rejects_control_characters() {
        assert!(normalize("evil\x00.com").is_err());
        assert!(normalize("http://evil\x00.com").is_err());
        assert!(normalize("foo\n.bar").is_err());
    }

    #[test]
    fn test_rejects_url_like_input() {
        // Scheme separators are not valid label characters
        assert!(normalize("http://evil.com").is_err());
        assert!(normalize("evil.com/path").is_err());
    }

    #[test]
    fn test_rejects_hyphen_edges_and_underscores() {
        assert!(normalize("-foo.example.com").is_err());
        assert!(normalize("foo-.example.com").is_err());
        assert!(normalize("foo_bar.example.com").is_err());
    }

    #[test]
    fn test_rejects_oversized() {
        let long_label = "a".repeat(64);
        assert!(normalize(&format!("{long_label}.example.com")).is_err());

        let long_name = format!("{}.com", "a.".repeat(130));
        assert!(normalize(&long_name).is_err());
    }

    proptest! {
        /// Normalization is idempotent on anything it accepts.
        #[test]
        fn prop_normalize_idempotent(raw in "[a-zA-Z0-9.-]{1,80}") {
            if let Ok(once) = normalize(&raw) {
                prop_assert_eq!(normalize(&once).unwrap(), once);
            }
        }

        /// Accepted hostnames never contain uppercase or a trailing dot.
        #[test]
        fn prop_normalized_canonical(raw in "[a-zA-Z0-9.-]{1,80}") {
            if let Ok(out) = normalize(&raw) {
                prop_assert!(!out.ends_with('.'));
                prop_assert!(out.bytes().all(|b| !b.is_ascii_uppercase()));
            }
        }
    }
}
