//! Student roster: the list of (student id, display name) pairs that
//! identity keys are derived from.

use crate::delimited;
use crate::ledger::columns::{find_column, normalise};
use crate::ledger::persist;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

const HEADER: [&str; 2] = ["Student ID", "Name"];

/// Header keywords, normalised the same way as ledger columns.
const ID_KEYWORDS: [&str; 6] = ["studentid", "id", "studentnumber", "number", "rollno", "roll"];
const NAME_KEYWORDS: [&str; 3] = ["name", "studentname", "fullname"];

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("roster io error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot parse roster {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("student id and name must not be empty")]
    EmptyField,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    pub student_id: String,
    pub name: String,
}

impl Student {
    /// Registry key for this student: `"{name}_{student_id}"`.
    pub fn identity_key(&self) -> String {
        format!("{}_{}", self.name, self.student_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added(Student),
    /// The id was already on the roster; the existing entry is returned.
    AlreadyPresent(Student),
}

pub struct Roster {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Roster {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RosterError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> Result<Vec<Student>, RosterError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let records = delimited::parse_records(&text).map_err(|e| RosterError::Parse {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let mut rows = records.into_iter();
        let Some(header) = rows.next() else {
            return Ok(Vec::new());
        };
        let (id_col, name_col) = header_positions(&header).ok_or_else(|| RosterError::Parse {
            path: self.path.clone(),
            reason: format!("no student id and name columns in header {header:?}"),
        })?;

        Ok(rows
            .filter_map(|row| {
                let student_id = row.get(id_col)?.trim().to_string();
                let name = row.get(name_col)?.trim().to_string();
                (!student_id.is_empty() && !name.is_empty()).then_some(Student { student_id, name })
            })
            .collect())
    }

    pub fn find(&self, student_id: &str) -> Result<Option<Student>, RosterError> {
        let id = student_id.trim();
        Ok(self.list()?.into_iter().find(|s| s.student_id == id))
    }

    /// Whether some roster entry produces `key`.
    pub fn contains_identity(&self, key: &str) -> Result<bool, RosterError> {
        Ok(self.list()?.iter().any(|s| s.identity_key() == key))
    }

    /// Append a student. An id already on the roster is left unchanged.
    pub fn add(&self, student_id: &str, name: &str) -> Result<AddOutcome, RosterError> {
        let student = Student {
            student_id: student_id.trim().to_string(),
            name: name.trim().to_string(),
        };
        if student.student_id.is_empty() || student.name.is_empty() {
            return Err(RosterError::EmptyField);
        }

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut students = self.list()?;
        if let Some(existing) = students.iter().find(|s| s.student_id == student.student_id) {
            return Ok(AddOutcome::AlreadyPresent(existing.clone()));
        }
        students.push(student.clone());

        let rows: Vec<Vec<String>> = students
            .iter()
            .map(|s| vec![s.student_id.clone(), s.name.clone()])
            .collect();
        persist::write_atomic_retrying(&self.path, |out| {
            out.write_all(delimited::format_document(&HEADER, &rows).as_bytes())
        })?;

        tracing::info!(student_id = %student.student_id, name = %student.name, "student added to roster");
        Ok(AddOutcome::Added(student))
    }
}

/// Locate the id and name columns by keyword. The id column is resolved
/// first and is never reused for the name.
fn header_positions(header: &[String]) -> Option<(usize, usize)> {
    let normalised: Vec<String> = header.iter().map(|h| normalise(h)).collect();
    let id = find_column(&normalised, &ID_KEYWORDS, None)?;
    let name = find_column(&normalised, &NAME_KEYWORDS, Some(id))?;
    Some((id, name))
}
