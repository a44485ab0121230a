/// Truncates a credential key to its first 10 characters for logging, per
/// §7: "never log the access key beyond a short prefix (first ≤10 chars)".
pub fn redact_key(key: &str) -> String {
    let prefix: String = key.chars().take(10).collect();
    if key.chars().count() > 10 {
        format!("{prefix}…")
    } else {
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_keys() {
        let key = "ff-0123456789abcdef0123456789abcdef";
        let redacted = redact_key(key);
        assert_eq!(redacted, "ff-0123456…");
    }

    #[test]
    fn leaves_short_keys_untouched() {
        assert_eq!(redact_key("ff-12"), "ff-12");
    }
}
