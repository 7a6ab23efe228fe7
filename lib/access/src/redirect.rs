//! Open-redirect-safe handling of post-login targets.
//!
//! Browsers hand us "where to go next" in the `Referer` header or a stored
//! value, and either may name another origin. [`sanitize_redirect_target`]
//! turns any such string into a path on the requesting host.

use url::{Position, Url};

/// Normalizes a `Host` header or URL authority for comparison.
///
/// Lower-cases, strips any port (and IPv6 brackets), and drops a trailing dot.
#[must_use]
pub fn normalize_host(hostport: &str) -> String {
    let lowered = hostport.trim().to_ascii_lowercase();
    let host = strip_port(&lowered).unwrap_or(&lowered);
    host.trim_end_matches('.').to_string()
}

fn strip_port(hostport: &str) -> Option<&str> {
    if let Some(rest) = hostport.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        return (after.is_empty() || after.starts_with(':')).then_some(host);
    }
    let (host, port) = hostport.split_once(':')?;
    (!port.contains(':')).then_some(host)
}

/// Converts `location` into a same-origin path for a request to `request_host`.
///
/// Absolute URLs are kept only when their host matches `request_host`, and
/// then only their path and query survive. Anything else is treated as a
/// relative path. The result always starts with exactly one `/` and is `"/"`
/// when nothing usable remains.
#[must_use]
pub fn sanitize_redirect_target(request_host: &str, location: &str) -> String {
    // Browsers ignore these inside URLs, so "/\t/evil.com" would act as "//evil.com".
    let cleaned: String = location
        .chars()
        .filter(|c| !matches!(c, '\t' | '\r' | '\n'))
        .collect();
    let trimmed = cleaned.trim();

    let candidate = if trimmed.is_empty() {
        String::new()
    } else {
        match Url::parse(trimmed) {
            Ok(url) => same_origin_path(request_host, &url).unwrap_or_default(),
            Err(url::ParseError::RelativeUrlWithoutBase) => trimmed.to_string(),
            Err(_) => String::new(),
        }
    };

    let rest = candidate.trim().trim_start_matches(['/', '\\']);
    if rest.is_empty() {
        return "/".to_string();
    }
    format!("/{rest}")
}

fn same_origin_path(request_host: &str, url: &Url) -> Option<String> {
    let expected = normalize_host(request_host);
    if expected.is_empty() {
        return None;
    }
    let actual = normalize_host(url.host_str()?);
    (actual == expected).then(|| url[Position::BeforePath..Position::AfterQuery].to_string())
}
