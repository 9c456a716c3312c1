//! Time-limit list editing
//!
//! Operations behind the settings screen and the `limits` CLI command.
//! Stored domains are always canonical, so the tracker can compare them
//! directly against usage keys.

use crate::domain::{extract_host, matches_domain, normalize_domain};
use crate::types::TimeLimit;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    #[error("Domain is empty")]
    EmptyDomain,
    #[error("Invalid minutes '{0}': expected a positive whole number")]
    InvalidMinutes(String),
    #[error("No time limit with id '{0}'")]
    NotFound(String),
}

/// Canonical domain from user input. A pasted URL is reduced to its host.
pub fn parse_limit_domain(input: &str) -> Result<String, LimitError> {
    let input = input.trim();
    let host = if input.contains("://") {
        extract_host(input).unwrap_or_default()
    } else {
        input
    };
    let domain = normalize_domain(host);
    if domain.is_empty() {
        Err(LimitError::EmptyDomain)
    } else {
        Ok(domain)
    }
}

pub fn parse_minutes(input: &str) -> Result<u32, LimitError> {
    match input.trim().parse::<u32>() {
        Ok(minutes) if minutes > 0 => Ok(minutes),
        _ => Err(LimitError::InvalidMinutes(input.to_string())),
    }
}

/// Append a limit. The id is the creation timestamp in epoch milliseconds.
pub fn add_limit<'a>(
    limits: &'a mut Vec<TimeLimit>,
    domain: &str,
    minutes: &str,
    now_ms: i64,
) -> Result<&'a TimeLimit, LimitError> {
    let domain = parse_limit_domain(domain)?;
    let minutes = parse_minutes(minutes)?;

    limits.push(TimeLimit {
        id: now_ms.to_string(),
        domain,
        minutes,
    });
    Ok(&limits[limits.len() - 1])
}

pub fn remove_limit(limits: &mut Vec<TimeLimit>, id: &str) -> Result<TimeLimit, LimitError> {
    let pos = limits
        .iter()
        .position(|l| l.id == id)
        .ok_or_else(|| LimitError::NotFound(id.to_string()))?;
    Ok(limits.remove(pos))
}

/// First configured limit covering `domain`, in list order.
pub fn find_limit<'a>(limits: &'a [TimeLimit], domain: &str) -> Option<&'a TimeLimit> {
    limits.iter().find(|l| matches_domain(domain, &l.domain))
}

/// Share of the budget used, capped at 100.
pub fn usage_percent(used_minutes: f64, limit: &TimeLimit) -> f64 {
    if limit.minutes == 0 {
        return 100.0;
    }
    (used_minutes / f64::from(limit.minutes) * 100.0).clamp(0.0, 100.0)
}

pub fn is_exceeded(used_minutes: f64, limit: &TimeLimit) -> bool {
    used_minutes >= f64::from(limit.minutes)
}
