//! Minimal RFC 4180 reader/writer shared by the ledger and the roster.
//!
//! Fields containing the separator, a quote, or a line break are quoted;
//! embedded quotes are doubled. The reader accepts LF or CRLF line endings
//! and ignores a leading UTF-8 byte-order mark.

/// Quote a single field if needed.
pub fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// One CSV line, without the trailing newline.
pub fn format_record<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Render a header row plus data rows, each terminated by `\n`.
pub fn format_document<S: AsRef<str>>(header: &[S], rows: &[Vec<String>]) -> String {
    let mut out = format_record(header);
    out.push('\n');
    for row in rows {
        out.push_str(&format_record(row));
        out.push('\n');
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub reason: &'static str,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

/// Parse a whole document into records. Blank lines are skipped.
pub fn parse_records(input: &str) -> Result<Vec<Vec<String>>, ParseError> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);

    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    // Set once a field has content or quotes, so `""` survives as an empty field.
    let mut field_started = false;
    let mut line = 1usize;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() && !field_started => {
                in_quotes = true;
                field_started = true;
            }
            '"' => {
                return Err(ParseError {
                    line,
                    reason: "unexpected quote in unquoted field",
                })
            }
            ',' => {
                record.push(std::mem::take(&mut field));
                field_started = false;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                end_record(&mut records, &mut record, &mut field, field_started);
                field_started = false;
                line += 1;
            }
            _ => {
                field.push(c);
                field_started = true;
            }
        }
    }

    if in_quotes {
        return Err(ParseError {
            line,
            reason: "unterminated quoted field",
        });
    }
    end_record(&mut records, &mut record, &mut field, field_started);
    Ok(records)
}

fn end_record(
    records: &mut Vec<Vec<String>>,
    record: &mut Vec<String>,
    field: &mut String,
    field_started: bool,
) {
    if record.is_empty() && field.is_empty() && !field_started {
        return;
    }
    record.push(std::mem::take(field));
    records.push(std::mem::take(record));
}
