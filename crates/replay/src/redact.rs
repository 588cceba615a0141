use sessionjar_core::HeaderMap;

/// Header names (lower-cased) whose values are masked in replay dumps.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "apikey",
    "x-auth-token",
    "proxy-authorization",
];

pub const REDACTED: &str = "***REDACTED***";

pub fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Copy of `headers` with sensitive values masked. Names and order are kept.
pub fn redact_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if is_sensitive(name) {
                REDACTED.to_string()
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}
