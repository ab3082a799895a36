//! Semantic column resolution for human-edited ledgers.
//!
//! Columns are located by keyword rather than position. The timestamp
//! column is resolved first; the identity column is then chosen among the
//! remaining headers. For each role an exact match on the normalised header
//! (lowercase, alphanumerics only) beats a substring match, and earlier
//! keywords beat later ones.

use super::LedgerError;

pub const TIMESTAMP_KEYWORDS: [&str; 5] = ["timestamp", "datetime", "date", "time", "stamp"];
pub const IDENTITY_KEYWORDS: [&str; 5] = ["folder", "identity", "student", "name", "id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedColumns {
    pub identity: usize,
    pub timestamp: usize,
}

pub fn resolve_columns(headers: &[String]) -> Result<ResolvedColumns, LedgerError> {
    let normalised: Vec<String> = headers.iter().map(|h| normalise(h)).collect();

    let timestamp = find_column(&normalised, &TIMESTAMP_KEYWORDS, None);
    let identity = find_column(&normalised, &IDENTITY_KEYWORDS, timestamp);

    match (identity, timestamp) {
        (Some(identity), Some(timestamp)) => Ok(ResolvedColumns { identity, timestamp }),
        _ => Err(LedgerError::SchemaNotDetected {
            columns: headers.to_vec(),
        }),
    }
}

pub(crate) fn normalise(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

pub(crate) fn find_column(headers: &[String], keywords: &[&str], skip: Option<usize>) -> Option<usize> {
    let candidates = || {
        headers
            .iter()
            .enumerate()
            .filter(move |(i, h)| Some(*i) != skip && !h.is_empty())
    };

    for kw in keywords {
        if let Some((i, _)) = candidates().find(|(_, h)| h == kw) {
            return Some(i);
        }
    }
    for kw in keywords {
        if let Some((i, _)) = candidates().find(|(_, h)| h.contains(kw)) {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(h: &[&str]) -> Vec<String> {
        h.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_columns() {
        let r = resolve_columns(&headers(&["Identity", "Timestamp"])).unwrap();
        assert_eq!(r, ResolvedColumns { identity: 0, timestamp: 1 });
    }

    #[test]
    fn test_reordered_and_extra_columns() {
        let r = resolve_columns(&headers(&["Notes", "Check-in Time", "Room", "Student Name"])).unwrap();
        assert_eq!(r, ResolvedColumns { identity: 3, timestamp: 1 });
    }

    #[test]
    fn test_exact_beats_substring() {
        // "Student ID" contains "student" but "Name" is an exact hit for a
        // later keyword, and exact matches win across the whole list.
        let r = resolve_columns(&headers(&["Student ID", "Name", "Date"])).unwrap();
        assert_eq!(r.identity, 1);
        assert_eq!(r.timestamp, 2);
    }

    #[test]
    fn test_timestamp_never_reused_as_identity() {
        // "Date ID" would match "id" by substring, but it is the timestamp.
        let r = resolve_columns(&headers(&["Date ID", "Who"]));
        assert!(matches!(r, Err(LedgerError::SchemaNotDetected { .. })));
    }

    #[test]
    fn test_schema_not_detected_carries_headers() {
        let raw = headers(&["Foo", "Bar"]);
        match resolve_columns(&raw) {
            Err(LedgerError::SchemaNotDetected { columns }) => assert_eq!(columns, raw),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
