//! JSONL storage: one tagged record per line.
//!
//! ```text
//! {"kind":"index", ...}
//! {"kind":"claim", ...}
//! {"kind":"entry", ...}
//! ```
//!
//! Blank lines and `#` comments are skipped on read. Writes go to a sibling
//! temp file which is synced and renamed over the target.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::claim::Claim;
use crate::entry::Entry;
use crate::index::Index;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredRecord {
    Index(Index),
    Claim(Claim),
    Entry(Entry),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum JsonlError {
    #[error("{path}: {message}")]
    Io { path: String, message: String },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("record did not serialize: {0}")]
    Serialize(String),

    /// The file holds bytes no JSONL writer of ours produces.
    #[error("{path} is corrupt: {reason}")]
    Corrupt { path: String, reason: &'static str },
}

impl JsonlError {
    fn io(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

pub fn read_records(reader: impl BufRead) -> Result<Vec<StoredRecord>, JsonlError> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|err| JsonlError::Parse {
            line: line_no,
            message: err.to_string(),
        })?;
        let body = line.trim();
        if body.is_empty() || body.starts_with('#') {
            continue;
        }
        let record = serde_json::from_str(body).map_err(|err| JsonlError::Parse {
            line: line_no,
            message: err.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

pub fn write_records(writer: &mut impl Write, records: &[StoredRecord]) -> Result<(), JsonlError> {
    let mut buffer = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buffer, record)
            .map_err(|err| JsonlError::Serialize(err.to_string()))?;
        buffer.push(b'\n');
    }
    writer
        .write_all(&buffer)
        .map_err(|err| JsonlError::Serialize(err.to_string()))
}

/// A missing file reads as an empty store.
pub fn read_records_from_path(path: impl AsRef<Path>) -> Result<Vec<StoredRecord>, JsonlError> {
    let path = path.as_ref();
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(JsonlError::io(path, err)),
    };
    check_text(path, &bytes)?;
    read_records(bytes.as_slice())
}

pub fn write_records_to_path(
    path: impl AsRef<Path>,
    records: &[StoredRecord],
) -> Result<(), JsonlError> {
    let path = path.as_ref();
    let mut contents = Vec::new();
    write_records(&mut contents, records)?;
    replace_file(path, &contents)
}

fn replace_file(path: &Path, contents: &[u8]) -> Result<(), JsonlError> {
    let parent = path.parent().filter(|parent| !parent.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs::create_dir_all(parent).map_err(|err| JsonlError::io(parent, err))?;
    }

    let staged = staging_path(path);
    let written = File::create(&staged).and_then(|mut file| {
        file.write_all(contents)?;
        file.sync_all()
    });
    if let Err(err) = written {
        let _ = fs::remove_file(&staged);
        return Err(JsonlError::io(&staged, err));
    }
    if let Err(err) = fs::rename(&staged, path) {
        let _ = fs::remove_file(&staged);
        return Err(JsonlError::io(path, format!("rename from {}: {err}", staged.display())));
    }

    // Persist the rename itself.
    if let Some(parent) = parent {
        File::open(parent)
            .and_then(|dir| dir.sync_all())
            .map_err(|err| JsonlError::io(parent, err))?;
    }
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let mut staged: OsString = path.as_os_str().to_owned();
    staged.push(format!(".{}-{nanos}.tmp", std::process::id()));
    PathBuf::from(staged)
}

fn check_text(path: &Path, bytes: &[u8]) -> Result<(), JsonlError> {
    let reason = if bytes.contains(&0) {
        "NUL byte in file"
    } else if std::str::from_utf8(bytes).is_err() {
        "invalid UTF-8"
    } else {
        return Ok(());
    };
    Err(JsonlError::Corrupt {
        path: path.display().to_string(),
        reason,
    })
}
