//! Domain and date utilities
//!
//! Host extraction works directly on string slices. Domains are compared in
//! their canonical form: trimmed, lowercase, without a leading `www.`.

use chrono::{Local, NaiveDate};

// =============================================================================
// Host Extraction
// =============================================================================

/// Get the position after "://".
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();

    // Find ':'
    let colon_pos = bytes.iter().position(|&b| b == b':')?;

    // Check for "://"
    if bytes.len() > colon_pos + 2 && bytes[colon_pos + 1] == b'/' && bytes[colon_pos + 2] == b'/' {
        return Some(colon_pos + 3);
    }

    None
}

/// Get the start and end positions of the hostname in a URL.
#[inline]
pub fn get_host_position(url: &str) -> Option<(usize, usize)> {
    let scheme_end = get_scheme_end(url)?;
    let bytes = url.as_bytes();

    // Authority ends at the first '/', '?' or '#'
    let authority_end = bytes[scheme_end..]
        .iter()
        .position(|&b| b == b'/' || b == b'?' || b == b'#')
        .map_or(bytes.len(), |i| scheme_end + i);

    // Skip userinfo
    let host_start = bytes[scheme_end..authority_end]
        .iter()
        .rposition(|&b| b == b'@')
        .map_or(scheme_end, |i| scheme_end + i + 1);

    // Strip port
    let host_end = bytes[host_start..authority_end]
        .iter()
        .position(|&b| b == b':')
        .map_or(authority_end, |i| host_start + i);

    Some((host_start, host_end))
}

/// Host extraction without allocations.
/// Returns a slice into the original URL.
#[inline]
pub fn extract_host(url: &str) -> Option<&str> {
    let (host_start, host_end) = get_host_position(url)?;
    Some(&url[host_start..host_end])
}

/// Extract the path portion of a URL.
pub fn extract_path(url: &str) -> &str {
    let Some(scheme_end) = get_scheme_end(url) else {
        return "/";
    };
    let bytes = url.as_bytes();

    let path_start = match bytes[scheme_end..].iter().position(|&b| b == b'/' || b == b'?' || b == b'#') {
        Some(i) if bytes[scheme_end + i] == b'/' => scheme_end + i,
        _ => return "/",
    };

    let path_end = bytes[path_start..]
        .iter()
        .position(|&b| b == b'?' || b == b'#')
        .map_or(bytes.len(), |i| path_start + i);

    &url[path_start..path_end]
}

/// Value of a query parameter, undecoded.
pub fn query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
    let q_pos = url.find('?')?;
    let query = &url[q_pos + 1..];
    let query = query.split('#').next().unwrap_or(query);

    query.split('&').find_map(|pair| match pair.split_once('=') {
        Some((key, value)) if key == name => Some(value),
        None if pair == name => Some(""),
        _ => None,
    })
}

// =============================================================================
// Domain Normalization
// =============================================================================

/// Canonical form of a domain: trimmed, lowercase, no leading `www.`.
pub fn normalize_domain(domain: &str) -> String {
    let lower = domain.trim().to_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}

/// Whether a visited hostname falls under a configured domain.
///
/// ```
/// use aqt_core::domain::matches_domain;
///
/// assert!(matches_domain("sub.example.com", "example.com"));
/// assert!(!matches_domain("notexample.com", "example.com"));
/// ```
pub fn matches_domain(visited: &str, limit: &str) -> bool {
    let visited = normalize_domain(visited);
    let limit = normalize_domain(limit);

    if limit.is_empty() {
        return false;
    }

    visited == limit
        || (visited.len() > limit.len()
            && visited.ends_with(&limit)
            && visited.as_bytes()[visited.len() - limit.len() - 1] == b'.')
}

/// Canonical domain of a URL's host, or `None` if the URL has no host.
pub fn get_domain_from_url(url: &str) -> Option<String> {
    let host = extract_host(url.trim())?;
    let domain = normalize_domain(host.trim_end_matches('.'));
    if domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}

// =============================================================================
// Dates
// =============================================================================

/// Calendar date string used for the daily usage reset.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Today's local calendar date string.
pub fn today_date_string() -> String {
    format_date(Local::now().date_naive())
}
