//! Shared helpers: time formatting, env parsing, input validation.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Timestamp layout accepted on poll creation, e.g. "2026-06-30 18:00:00".
pub const EXPIRY_INPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a timestamp the way the store keeps them: RFC 3339 UTC with
/// whole seconds. The uniform width keeps SQL string comparison
/// chronological.
pub fn store_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now_timestamp() -> String {
    store_timestamp(Utc::now())
}

/// Parse a creation-request expiry. The input carries no zone and is read
/// as UTC.
pub fn parse_expiry(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw.trim(), EXPIRY_INPUT_FORMAT).map(|naive| naive.and_utc())
}

/// Scope tags are class codes ("10B") or year tags ("year-7"): short
/// alphanumeric with optional dashes.
pub fn valid_scope(scope: &str) -> bool {
    !scope.is_empty()
        && scope.len() <= 32
        && scope
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Derive a display name from a directory email: local-part segments
/// split on dots, title-cased. "jane.doe@school.org" becomes "Jane Doe".
pub fn display_name_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or("");
    local
        .split('.')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(part: &str) -> String {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Read an env var and parse it, falling back to `default` when unset or
/// unparseable.
pub fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
