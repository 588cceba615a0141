use sessionjar_core::{CapturedRequest, Error, HeaderMap, Result};

/// Headers tied to the original connection; never forwarded.
const CONNECTION_HEADERS: &[&str] = &["host", "content-length", "connection"];

/// The most recent record whose URL contains `url_contains` (case-insensitive)
/// and whose method equals `method` (case-insensitive).
pub fn select_capture<'a>(
    records: &'a [CapturedRequest],
    url_contains: Option<&str>,
    method: &str,
) -> Result<&'a CapturedRequest> {
    let fragment = url_contains
        .map(str::to_lowercase)
        .filter(|f| !f.is_empty());

    records
        .iter()
        .rev()
        .filter(|r| match &fragment {
            Some(f) => r.url.to_lowercase().contains(f.as_str()),
            None => true,
        })
        .find(|r| r.method.eq_ignore_ascii_case(method))
        .ok_or_else(|| {
            Error::NoMatch(format!(
                "No captured requests matched the replay filters (method={}, url_contains={})",
                method.to_uppercase(),
                url_contains.unwrap_or("-")
            ))
        })
}

/// Drop `Host`, `Content-Length` and `Connection` in any case; keep the rest verbatim.
pub fn sanitize_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| {
            !CONNECTION_HEADERS
                .iter()
                .any(|blocked| blocked.eq_ignore_ascii_case(name))
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
