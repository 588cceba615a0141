//! Summaries of the session credentials found in captured requests.

use indexmap::IndexMap;
use serde::Serialize;
use sessionjar_core::CapturedRequest;
use std::collections::HashSet;

/// One credential value and where it was sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenDetail {
    /// Lower-cased header name.
    pub header: String,
    pub value: String,
    pub audience_url: String,
    pub audience_domain: String,
    pub method: String,
}

/// `host[:port]` of a URL, or the input itself when it has no authority.
pub fn audience_domain(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => match parsed.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            },
            None => url.to_string(),
        },
        Err(_) => url.to_string(),
    }
}

/// First value seen for each requested header, keyed by lower-cased name.
pub fn extract_tokens(
    records: &[CapturedRequest],
    header_names: &[String],
) -> IndexMap<String, Option<String>> {
    let mut tokens: IndexMap<String, Option<String>> = header_names
        .iter()
        .map(|name| (name.to_lowercase(), None))
        .collect();

    for record in records {
        for (name, value) in &record.headers {
            if let Some(slot) = tokens.get_mut(&name.to_lowercase()) {
                if slot.is_none() {
                    *slot = Some(value.clone());
                }
            }
        }
    }
    tokens
}

/// Every distinct (header, value, audience domain) triple, in capture order.
pub fn extract_token_details(
    records: &[CapturedRequest],
    header_names: &[String],
) -> Vec<TokenDetail> {
    let wanted: HashSet<String> = header_names.iter().map(|h| h.to_lowercase()).collect();
    let mut seen = HashSet::new();
    let mut details = Vec::new();

    for record in records {
        let domain = audience_domain(&record.url);
        for (name, value) in &record.headers {
            let header = name.to_lowercase();
            if !wanted.contains(&header) {
                continue;
            }
            if !seen.insert((header.clone(), value.clone(), domain.clone())) {
                continue;
            }
            details.push(TokenDetail {
                header,
                value: value.clone(),
                audience_url: record.url.clone(),
                audience_domain: domain.clone(),
                method: record.method.clone(),
            });
        }
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionjar_core::HeaderMap;

    fn record(method: &str, url: &str, headers: &[(&str, &str)]) -> CapturedRequest {
        let headers: HeaderMap = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CapturedRequest::new("id", method, url, headers)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_audience_domain() {
        assert_eq!(audience_domain("https://api.github.com/graphql"), "api.github.com");
        assert_eq!(audience_domain("http://localhost:8080/api"), "localhost:8080");
        assert_eq!(audience_domain("not-a-url"), "not-a-url");
        assert_eq!(audience_domain(""), "");
    }

    #[test]
    fn test_extract_tokens_first_value_wins() {
        let records = vec![
            record("GET", "https://a.io/", &[("X-Request-Id", "abc")]),
            record(
                "GET",
                "https://a.io/",
                &[("COOKIE", "session=xyz"), ("authorization", "Bearer t")],
            ),
            record("GET", "https://a.io/", &[("Cookie", "ignored")]),
        ];
        let tokens = extract_tokens(&records, &names(&["Cookie", "Authorization", "x-csrf-token"]));
        assert_eq!(tokens["cookie"].as_deref(), Some("session=xyz"));
        assert_eq!(tokens["authorization"].as_deref(), Some("Bearer t"));
        assert_eq!(tokens["x-csrf-token"], None);

        let empty = extract_tokens(&[], &names(&["cookie"]));
        assert_eq!(empty.len(), 1);
        assert_eq!(empty["cookie"], None);
    }

    #[test]
    fn test_token_details_dedupe_per_domain() {
        let records = vec![
            record("GET", "https://github.com/p1", &[("Cookie", "session=abc")]),
            record("GET", "https://github.com/p2", &[("Cookie", "session=abc")]),
            record(
                "POST",
                "https://api.github.com/graphql",
                &[("Cookie", "session=abc"), ("X-Request-Id", "1")],
            ),
        ];
        let details = extract_token_details(&records, &names(&["cookie"]));
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].audience_domain, "github.com");
        assert_eq!(details[1].audience_domain, "api.github.com");
        assert_eq!(details[1].method, "POST");
    }

    #[test]
    fn test_token_details_distinct_values_same_domain() {
        let records = vec![
            record("GET", "https://api.example.com/a", &[("Authorization", "Bearer A")]),
            record("POST", "https://api.example.com/b", &[("AUTHORIZATION", "Bearer B")]),
        ];
        let details = extract_token_details(&records, &names(&["Authorization"]));
        let values: Vec<_> = details.iter().map(|d| d.value.as_str()).collect();
        assert_eq!(values, vec!["Bearer A", "Bearer B"]);
        assert!(details.iter().all(|d| d.header == "authorization"));
    }
}
