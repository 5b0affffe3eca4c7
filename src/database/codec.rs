//! Comma-joined voter ledger encoding used by the archive tables.
//!
//! An archived option freezes its final ledger as two positionally aligned
//! strings: voter ids ("5,19,7") and anonymity flags ("0,1,0"). Encoding is
//! strict; decoding is tolerant. A flag that cannot be paired with its voter
//! is treated as anonymous, so a lost or garbled flag can never expose an
//! identity.

use tracing::debug;

pub fn encode_voters(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn encode_flags(flags: &[bool]) -> String {
    flags
        .iter()
        .map(|f| if *f { "1" } else { "0" })
        .collect::<Vec<_>>()
        .join(",")
}

/// Decode a stored ledger pair back into `(user_id, anonymous)` entries.
///
/// Segments are trimmed, empty segments are dropped, and unparseable ids
/// are skipped. Flags pair with voters by raw segment position, so a bad
/// segment on one side does not shift the rest of the other.
pub fn decode_ledger(voters: &str, anonymity: &str) -> Vec<(i64, bool)> {
    let flags: Vec<&str> = anonymity.split(',').collect();
    let flag_at = |i: usize| -> bool {
        flags
            .get(i)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s != "0")
            .unwrap_or(true)
    };

    voters
        .split(',')
        .enumerate()
        .filter_map(|(i, segment)| {
            let segment = segment.trim();
            if segment.is_empty() {
                return None;
            }
            match segment.parse::<i64>() {
                Ok(id) => Some((id, flag_at(i))),
                Err(_) => {
                    debug!("Skipping unparseable voter id segment {:?}", segment);
                    None
                }
            }
        })
        .collect()
}
