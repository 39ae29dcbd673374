//! Preference keys whose values must never be persisted in plaintext.

/// Keys encrypted at rest. Membership is exact and case-sensitive.
pub const SENSITIVE_KEYS: [&str; 6] = [
    "user-token",
    "user-id",
    "user-key",
    "encrypt-key",
    "encrypt-keys",
    "syncServerConfig",
];

pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_exact_keys_only() {
        assert!(is_sensitive_key("user-token"));
        assert!(is_sensitive_key("syncServerConfig"));
        assert!(!is_sensitive_key("User-Token"));
        assert!(!is_sensitive_key("syncserverconfig"));
        assert!(!is_sensitive_key("user-token "));
        assert!(!is_sensitive_key("some-other-pref"));
    }
}
