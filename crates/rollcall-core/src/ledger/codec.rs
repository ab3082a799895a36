//! Ledger file codecs.

use super::LedgerFormat;
use crate::delimited;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

pub const DEFAULT_COLUMNS: [&str; 2] = ["Identity", "Timestamp"];

/// Whole-ledger snapshot: a header row plus data rows, format independent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTable {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

impl Default for LedgerTable {
    fn default() -> Self {
        Self {
            columns: DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }
}

impl LedgerTable {
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column).map(String::as_str)
    }
}

/// Encodes and decodes one on-disk ledger format.
pub trait TableCodec: Send + Sync {
    fn format(&self) -> LedgerFormat;

    fn decode(&self, bytes: &[u8]) -> Result<LedgerTable, String>;

    /// Stream the table into `out`. Errors of kind `InvalidData`,
    /// `InvalidInput` or `Unsupported` are not retried.
    fn encode(&self, table: &LedgerTable, out: &mut dyn Write) -> io::Result<()>;
}

/// JSON table document: `{"columns": [...], "rows": [[...], ...]}`.
pub struct JsonTableCodec;

impl TableCodec for JsonTableCodec {
    fn format(&self) -> LedgerFormat {
        LedgerFormat::Table
    }

    fn decode(&self, bytes: &[u8]) -> Result<LedgerTable, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }

    fn encode(&self, table: &LedgerTable, out: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *out, table)?;
        out.write_all(b"\n")
    }
}

/// CSV with a header row.
pub struct CsvTableCodec;

impl TableCodec for CsvTableCodec {
    fn format(&self) -> LedgerFormat {
        LedgerFormat::Delimited
    }

    fn decode(&self, bytes: &[u8]) -> Result<LedgerTable, String> {
        let text = std::str::from_utf8(bytes).map_err(|e| format!("not UTF-8: {e}"))?;
        let mut records = delimited::parse_records(text)
            .map_err(|e| e.to_string())?
            .into_iter();
        let Some(columns) = records.next() else {
            return Ok(LedgerTable::default());
        };
        Ok(LedgerTable {
            columns,
            rows: records.collect(),
        })
    }

    fn encode(&self, table: &LedgerTable, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(delimited::format_document(&table.columns, &table.rows).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LedgerTable {
        LedgerTable {
            columns: vec!["Timestamp".into(), "Student".into()],
            rows: vec![vec!["2024-03-01 08:00:00".into(), "Lee, Ann_7".into()]],
        }
    }

    #[test]
    fn test_json_codec() {
        let mut buf = Vec::new();
        JsonTableCodec.encode(&sample(), &mut buf).unwrap();
        assert!(String::from_utf8_lossy(&buf).contains("\"columns\""));
        assert_eq!(JsonTableCodec.decode(&buf).unwrap(), sample());
    }

    #[test]
    fn test_json_rows_optional() {
        let table = JsonTableCodec.decode(br#"{"columns": ["A", "B"]}"#).unwrap();
        assert!(table.rows.is_empty());
        assert!(JsonTableCodec.decode(b"[1, 2]").is_err());
    }

    #[test]
    fn test_csv_codec_keeps_column_order() {
        let mut buf = Vec::new();
        CsvTableCodec.encode(&sample(), &mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("Timestamp,Student\n"));
        assert_eq!(CsvTableCodec.decode(&buf).unwrap(), sample());
    }

    #[test]
    fn test_csv_empty_document_is_default() {
        assert_eq!(CsvTableCodec.decode(b"").unwrap(), LedgerTable::default());
    }
}
