//! Durable, de-duplicated attendance ledger.
//!
//! The whole ledger is one file, rewritten atomically on every new mark.
//! The structured JSON table format is preferred; if it cannot be written,
//! the ledger switches to CSV for the rest of its lifetime and removes the
//! stale JSON file once the CSV has been committed. Reads resolve the
//! identity and timestamp columns by name, so hand-edited files with
//! reordered or extra columns keep working.
//!
//! Concurrent `mark` calls on one instance are serialised by an internal
//! lock. Multiple processes writing the same directory are not supported.

pub mod codec;
pub mod columns;
pub(crate) mod persist;

pub use codec::{CsvTableCodec, JsonTableCodec, LedgerTable, TableCodec, DEFAULT_COLUMNS};
pub use columns::{resolve_columns, ResolvedColumns};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Values listed in a not-found history lookup.
const SAMPLE_LIMIT: usize = 10;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger io error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
    #[error("no identity/timestamp columns detected in {columns:?}")]
    SchemaNotDetected { columns: Vec<String> },
    #[error("ledger could not be persisted as {format}: {source}")]
    Persist {
        format: LedgerFormat,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerFormat {
    /// JSON table document.
    Table,
    /// CSV.
    Delimited,
}

impl LedgerFormat {
    pub fn file_name(self) -> &'static str {
        match self {
            LedgerFormat::Table => "attendance.json",
            LedgerFormat::Delimited => "attendance.csv",
        }
    }
}

impl std::fmt::Display for LedgerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerFormat::Table => f.write_str("table"),
            LedgerFormat::Delimited => f.write_str("delimited"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub identity: String,
    pub timestamp: String,
    /// `None` when a hand-edited timestamp cannot be parsed.
    pub day: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    Created(AttendanceRecord),
    /// The identity already has a record for that day; nothing was written.
    Duplicate(AttendanceRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityHistory {
    pub query: String,
    /// Distinct identity values that matched the query.
    pub identities: Vec<String>,
    pub total: usize,
    /// Records per day (ISO date, or the raw timestamp when unparseable).
    pub date_counts: BTreeMap<String, usize>,
    pub identity_column: String,
    pub timestamp_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum HistoryLookup {
    Found(IdentityHistory),
    NotFound {
        column: String,
        sample_values: Vec<String>,
    },
    /// The ledger has no records at all.
    Empty,
}

struct LedgerState {
    format: LedgerFormat,
}

pub struct AttendanceLedger {
    dir: PathBuf,
    structured: Box<dyn TableCodec>,
    delimited: CsvTableCodec,
    state: Mutex<LedgerState>,
}

impl AttendanceLedger {
    /// Open (or create) the ledger with the JSON table codec.
    ///
    /// A missing ledger file is written out empty straight away, so an
    /// unwritable directory fails here rather than on the first check-in.
    /// An existing file must decode.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, LedgerError> {
        Self::with_structured_codec(dir, Box::new(JsonTableCodec))
    }

    /// Open with a custom structured codec. The delimited fallback is
    /// always CSV.
    pub fn with_structured_codec(
        dir: impl AsRef<Path>,
        structured: Box<dyn TableCodec>,
    ) -> Result<Self, LedgerError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let format = detect_format(&dir);
        let ledger = Self {
            dir,
            structured,
            delimited: CsvTableCodec,
            state: Mutex::new(LedgerState { format }),
        };
        ledger.initialise()?;
        tracing::info!(path = %ledger.path().display(), format = %ledger.format(), "attendance ledger opened");
        Ok(ledger)
    }

    fn initialise(&self) -> Result<(), LedgerError> {
        let mut state = self.lock();
        let path = self.dir.join(state.format.file_name());
        match std::fs::symlink_metadata(&path) {
            Ok(_) => self.load(state.format).map(|_| ()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.persist(&mut state, &LedgerTable::default())?;
                tracing::debug!(format = %state.format, "created empty attendance ledger");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn format(&self) -> LedgerFormat {
        self.lock().format
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(self.format().file_name())
    }

    /// Record `identity` as present at `at`, unless it already has a record
    /// on the same calendar day.
    pub fn mark(&self, identity: &str, at: NaiveDateTime) -> Result<MarkOutcome, LedgerError> {
        let mut state = self.lock();
        let mut table = self.load(state.format)?;
        let cols = resolve_columns(&table.columns)?;
        let today = at.date();

        let existing = (0..table.rows.len()).find_map(|i| {
            let record = record_at(&table, i, cols)?;
            (record.identity == identity && record.day == Some(today)).then_some(record)
        });
        if let Some(record) = existing {
            tracing::debug!(identity, day = %today, "already marked today");
            return Ok(MarkOutcome::Duplicate(record));
        }

        let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
        let mut row = vec![String::new(); table.columns.len()];
        row[cols.identity] = identity.to_string();
        row[cols.timestamp] = timestamp.clone();
        table.rows.push(row);

        self.persist(&mut state, &table)?;
        tracing::info!(identity, %timestamp, format = %state.format, "attendance marked");
        Ok(MarkOutcome::Created(AttendanceRecord {
            identity: identity.to_string(),
            timestamp,
            day: Some(today),
        }))
    }

    /// [`mark`](Self::mark) with the local wall clock.
    pub fn mark_now(&self, identity: &str) -> Result<MarkOutcome, LedgerError> {
        self.mark(identity, Local::now().naive_local())
    }

    /// Raw snapshot in its stored column order.
    pub fn table(&self) -> Result<LedgerTable, LedgerError> {
        let state = self.lock();
        self.load(state.format)
    }

    pub fn records(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let table = self.table()?;
        let cols = resolve_columns(&table.columns)?;
        Ok((0..table.rows.len())
            .filter_map(|i| record_at(&table, i, cols))
            .collect())
    }

    /// Attendance history for identities matching `query`, case-insensitive:
    /// exact matches if there are any, otherwise substring matches.
    pub fn history(&self, query: &str) -> Result<HistoryLookup, LedgerError> {
        let table = self.table()?;
        let cols = resolve_columns(&table.columns)?;
        let records: Vec<AttendanceRecord> = (0..table.rows.len())
            .filter_map(|i| record_at(&table, i, cols))
            .collect();
        if records.is_empty() {
            return Ok(HistoryLookup::Empty);
        }

        let needle = query.trim().to_lowercase();
        let mut hits: Vec<&AttendanceRecord> = records
            .iter()
            .filter(|r| r.identity.to_lowercase() == needle)
            .collect();
        if hits.is_empty() && !needle.is_empty() {
            hits = records
                .iter()
                .filter(|r| r.identity.to_lowercase().contains(&needle))
                .collect();
        }

        if hits.is_empty() {
            let mut seen = BTreeSet::new();
            let sample_values = records
                .iter()
                .filter(|r| seen.insert(r.identity.as_str()))
                .take(SAMPLE_LIMIT)
                .map(|r| r.identity.clone())
                .collect();
            return Ok(HistoryLookup::NotFound {
                column: table.columns[cols.identity].clone(),
                sample_values,
            });
        }

        let mut date_counts = BTreeMap::new();
        let mut identities = Vec::new();
        for r in &hits {
            let day = r.day.map(|d| d.to_string()).unwrap_or_else(|| r.timestamp.clone());
            *date_counts.entry(day).or_insert(0) += 1;
            if !identities.contains(&r.identity) {
                identities.push(r.identity.clone());
            }
        }

        Ok(HistoryLookup::Found(IdentityHistory {
            query: query.to_string(),
            identities,
            total: hits.len(),
            date_counts,
            identity_column: table.columns[cols.identity].clone(),
            timestamp_column: table.columns[cols.timestamp].clone(),
        }))
    }

    fn codec(&self, format: LedgerFormat) -> &dyn TableCodec {
        match format {
            LedgerFormat::Table => self.structured.as_ref(),
            LedgerFormat::Delimited => &self.delimited,
        }
    }

    fn load(&self, format: LedgerFormat) -> Result<LedgerTable, LedgerError> {
        let path = self.dir.join(format.file_name());
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LedgerTable::default()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(LedgerTable::default());
        }
        self.codec(format)
            .decode(&bytes)
            .map_err(|reason| LedgerError::Decode { path, reason })
    }

    /// Write the snapshot in the current format, falling back to CSV once.
    fn persist(&self, state: &mut LedgerState, table: &LedgerTable) -> Result<(), LedgerError> {
        let primary = state.format;
        let err = match self.write(primary, table) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if primary == LedgerFormat::Delimited {
            return Err(LedgerError::Persist {
                format: primary,
                source: err,
            });
        }

        tracing::warn!(error = %err, "structured ledger write failed, falling back to delimited");
        self.write(LedgerFormat::Delimited, table)
            .map_err(|source| LedgerError::Persist {
                format: LedgerFormat::Delimited,
                source,
            })?;
        state.format = LedgerFormat::Delimited;

        let stale = self.dir.join(LedgerFormat::Table.file_name());
        match std::fs::remove_file(&stale) {
            Ok(()) => tracing::info!(path = %stale.display(), "removed stale structured ledger"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %stale.display(), error = %e, "could not remove stale structured ledger"),
        }
        Ok(())
    }

    fn write(&self, format: LedgerFormat, table: &LedgerTable) -> io::Result<()> {
        let codec = self.codec(format);
        persist::write_atomic_retrying(&self.dir.join(format.file_name()), |out| {
            codec.encode(table, out)
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pick the format of whatever ledger file already exists. With both present
/// (an interrupted fallback) the newer one wins; with neither, the
/// structured format.
fn detect_format(dir: &Path) -> LedgerFormat {
    let modified = |f: LedgerFormat| {
        std::fs::metadata(dir.join(f.file_name()))
            .and_then(|m| m.modified())
            .ok()
    };
    match (modified(LedgerFormat::Table), modified(LedgerFormat::Delimited)) {
        (Some(t), Some(d)) if d > t => LedgerFormat::Delimited,
        (None, Some(_)) => LedgerFormat::Delimited,
        _ => LedgerFormat::Table,
    }
}

fn record_at(table: &LedgerTable, row: usize, cols: ResolvedColumns) -> Option<AttendanceRecord> {
    let identity = table.cell(row, cols.identity)?.trim();
    if identity.is_empty() {
        return None;
    }
    let timestamp = table.cell(row, cols.timestamp).unwrap_or("").trim();
    Some(AttendanceRecord {
        identity: identity.to_string(),
        timestamp: timestamp.to_string(),
        day: parse_day(timestamp),
    })
}

/// Calendar day of a stored timestamp. Accepts the written format, ISO 8601
/// with or without offset, and a bare date.
pub fn parse_day(timestamp: &str) -> Option<NaiveDate> {
    let s = timestamp.trim();
    for fmt in [TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
    }

    /// Structured codec whose writes always fail.
    struct BrokenWriter;

    impl TableCodec for BrokenWriter {
        fn format(&self) -> LedgerFormat {
            LedgerFormat::Table
        }
        fn decode(&self, bytes: &[u8]) -> Result<LedgerTable, String> {
            JsonTableCodec.decode(bytes)
        }
        fn encode(&self, _: &LedgerTable, _: &mut dyn io::Write) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "writer unavailable"))
        }
    }

    /// JSON codec that writes half of its output and panics once `fuse`
    /// successful encodes have happened.
    struct PanicMidWrite {
        fuse: usize,
        writes: Arc<AtomicUsize>,
    }

    impl TableCodec for PanicMidWrite {
        fn format(&self) -> LedgerFormat {
            LedgerFormat::Table
        }
        fn decode(&self, bytes: &[u8]) -> Result<LedgerTable, String> {
            JsonTableCodec.decode(bytes)
        }
        fn encode(&self, table: &LedgerTable, out: &mut dyn io::Write) -> io::Result<()> {
            let mut full = Vec::new();
            JsonTableCodec.encode(table, &mut full)?;
            if self.writes.fetch_add(1, Ordering::SeqCst) >= self.fuse {
                out.write_all(&full[..full.len() / 2])?;
                out.flush()?;
                panic!("killed mid-write");
            }
            out.write_all(&full)
        }
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_same_day_is_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();

        let first = ledger.mark("alice_1", at("2024-05-02 08:01:00")).unwrap();
        assert!(matches!(first, MarkOutcome::Created(_)));
        let second = ledger.mark("alice_1", at("2024-05-02 17:45:10")).unwrap();
        match second {
            MarkOutcome::Duplicate(r) => assert_eq!(r.timestamp, "2024-05-02 08:01:00"),
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!(ledger.records().unwrap().len(), 1);
    }

    #[test]
    fn test_different_days_create_two_records() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        ledger.mark("alice_1", at("2024-05-02 23:59:59")).unwrap();
        ledger.mark("alice_1", at("2024-05-03 00:00:00")).unwrap();
        ledger.mark("bob_2", at("2024-05-03 00:00:01")).unwrap();

        let records = ledger.records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].day, NaiveDate::from_ymd_opt(2024, 5, 3));
    }

    #[test]
    fn test_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = AttendanceLedger::open(dir.path()).unwrap();
            ledger.mark("alice_1", at("2024-05-02 08:00:00")).unwrap();
            assert_eq!(ledger.format(), LedgerFormat::Table);
        }
        let reopened = AttendanceLedger::open(dir.path()).unwrap();
        assert_eq!(reopened.records().unwrap().len(), 1);
        assert!(matches!(
            reopened.mark("alice_1", at("2024-05-02 12:00:00")).unwrap(),
            MarkOutcome::Duplicate(_)
        ));
    }

    #[test]
    fn test_concurrent_marks_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(AttendanceLedger::open(dir.path()).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.mark("alice_1", at("2024-05-02 09:00:00")).unwrap())
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, MarkOutcome::Created(_)))
            .count();
        assert_eq!(created, 1);
        assert_eq!(ledger.records().unwrap().len(), 1);
    }

    #[test]
    fn test_falls_back_to_delimited_and_stays() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::with_structured_codec(dir.path(), Box::new(BrokenWriter)).unwrap();
        // The empty ledger written at open already took the fallback.
        assert_eq!(ledger.format(), LedgerFormat::Delimited);
        assert_eq!(dir_entries(dir.path()), vec!["attendance.csv"]);

        ledger.mark("alice_1", at("2024-05-02 08:00:00")).unwrap();
        assert_eq!(ledger.format(), LedgerFormat::Delimited);
        assert_eq!(dir_entries(dir.path()), vec!["attendance.csv"]);

        ledger.mark("bob_2", at("2024-05-02 08:05:00")).unwrap();
        assert!(matches!(
            ledger.mark("alice_1", at("2024-05-02 09:00:00")).unwrap(),
            MarkOutcome::Duplicate(_)
        ));
        assert_eq!(ledger.records().unwrap().len(), 2);

        let csv = std::fs::read_to_string(dir.path().join("attendance.csv")).unwrap();
        assert!(csv.starts_with("Identity,Timestamp\n"));

        // A later process picks the delimited file up on its own.
        let reopened = AttendanceLedger::open(dir.path()).unwrap();
        assert_eq!(reopened.format(), LedgerFormat::Delimited);
        assert_eq!(reopened.records().unwrap().len(), 2);
    }

    #[test]
    fn test_fallback_removes_stale_structured_file() {
        let dir = tempfile::tempdir().unwrap();
        AttendanceLedger::open(dir.path())
            .unwrap()
            .mark("alice_1", at("2024-05-01 08:00:00"))
            .unwrap();

        let ledger = AttendanceLedger::with_structured_codec(dir.path(), Box::new(BrokenWriter)).unwrap();
        ledger.mark("bob_2", at("2024-05-02 08:00:00")).unwrap();

        assert_eq!(dir_entries(dir.path()), vec!["attendance.csv"]);
        let ids: Vec<_> = ledger.records().unwrap().into_iter().map(|r| r.identity).collect();
        assert_eq!(ids, vec!["alice_1", "bob_2"]);
    }

    #[test]
    fn test_killed_write_leaves_prior_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let writes = Arc::new(AtomicUsize::new(0));
        let path = dir.path().to_path_buf();
        {
            let writes = Arc::clone(&writes);
            let path = path.clone();
            let worker = std::thread::spawn(move || {
                // Open writes the empty ledger, the first mark commits, the
                // second is killed.
                let codec = PanicMidWrite { fuse: 2, writes };
                let ledger = AttendanceLedger::with_structured_codec(&path, Box::new(codec)).unwrap();
                ledger.mark("alice_1", at("2024-05-02 08:00:00")).unwrap();
                ledger.mark("bob_2", at("2024-05-02 08:01:00")).unwrap();
            });
            assert!(worker.join().is_err(), "second write should have been killed");
        }
        assert_eq!(writes.load(Ordering::SeqCst), 3);

        // Only the committed file remains; no temp file, no truncated JSON.
        assert_eq!(dir_entries(dir.path()), vec!["attendance.json"]);
        let reopened = AttendanceLedger::open(dir.path()).unwrap();
        let records = reopened.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, "alice_1");
    }

    #[test]
    fn test_hand_edited_columns_are_resolved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("attendance.csv"),
            "When,Room,Student Name\n2024-05-02T08:00:00,B12,carol_3\n",
        )
        .unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        assert_eq!(ledger.format(), LedgerFormat::Delimited);

        // "When" matches no keyword, so the schema is rejected with the raw headers.
        match ledger.records() {
            Err(LedgerError::SchemaNotDetected { columns }) => {
                assert_eq!(columns, vec!["When", "Room", "Student Name"])
            }
            other => panic!("expected schema error, got {other:?}"),
        }

        std::fs::write(
            dir.path().join("attendance.csv"),
            "Check-in Date,Room,Student Name\n2024-05-02T08:00:00,B12,carol_3\n",
        )
        .unwrap();
        assert!(matches!(
            ledger.mark("carol_3", at("2024-05-02 10:00:00")).unwrap(),
            MarkOutcome::Duplicate(_)
        ));
        ledger.mark("dave_4", at("2024-05-02 10:00:00")).unwrap();

        let table = ledger.table().unwrap();
        assert_eq!(table.columns, vec!["Check-in Date", "Room", "Student Name"]);
        assert_eq!(table.rows[1], vec!["2024-05-02 10:00:00", "", "dave_4"]);
    }

    #[test]
    fn test_empty_file_reads_as_new_ledger() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("attendance.json"), "").unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        assert!(ledger.records().unwrap().is_empty());
        ledger.mark("alice_1", at("2024-05-02 08:00:00")).unwrap();
        assert_eq!(ledger.records().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_structured_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("attendance.json"), "{\"columns\": [").unwrap();
        assert!(matches!(
            AttendanceLedger::open(dir.path()),
            Err(LedgerError::Decode { .. })
        ));
    }

    #[test]
    fn test_open_creates_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        assert_eq!(dir_entries(dir.path()), vec!["attendance.json"]);
        assert_eq!(ledger.table().unwrap().columns, vec!["Identity", "Timestamp"]);
        assert!(ledger.records().unwrap().is_empty());
    }

    #[test]
    fn test_open_refuses_unwritable_ledger() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("attendance.json")).unwrap();
        std::fs::create_dir(dir.path().join("attendance.csv")).unwrap();
        assert!(AttendanceLedger::open(dir.path()).is_err());

        // A path under a regular file cannot become a ledger directory.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        assert!(matches!(
            AttendanceLedger::open(blocker.join("ledger")),
            Err(LedgerError::Io(_))
        ));
    }

    #[test]
    fn test_history_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path()).unwrap();
        assert_eq!(ledger.history("alice").unwrap(), HistoryLookup::Empty);

        ledger.mark("Alice_1", at("2024-05-01 08:00:00")).unwrap();
        ledger.mark("Alice_1", at("2024-05-02 08:00:00")).unwrap();
        ledger.mark("alice_10", at("2024-05-02 08:00:00")).unwrap();
        ledger.mark("bob_2", at("2024-05-02 08:00:00")).unwrap();

        match ledger.history("alice_1").unwrap() {
            HistoryLookup::Found(h) => {
                assert_eq!(h.identities, vec!["Alice_1"]);
                assert_eq!(h.total, 2);
                assert_eq!(h.date_counts.get("2024-05-02"), Some(&1));
                assert_eq!(h.identity_column, "Identity");
            }
            other => panic!("expected found, got {other:?}"),
        }

        match ledger.history("ALICE").unwrap() {
            HistoryLookup::Found(h) => assert_eq!(h.total, 3),
            other => panic!("expected substring match, got {other:?}"),
        }

        match ledger.history("zoe").unwrap() {
            HistoryLookup::NotFound { column, sample_values } => {
                assert_eq!(column, "Identity");
                assert_eq!(sample_values, vec!["Alice_1", "alice_10", "bob_2"]);
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_day_formats() {
        let d = NaiveDate::from_ymd_opt(2024, 5, 2);
        assert_eq!(parse_day("2024-05-02 08:00:00"), d);
        assert_eq!(parse_day("2024-05-02T08:00:00.123"), d);
        assert_eq!(parse_day("2024-05-02T08:00:00+02:00"), d);
        assert_eq!(parse_day("2024-05-02"), d);
        assert_eq!(parse_day("yesterday"), None);
    }
}
