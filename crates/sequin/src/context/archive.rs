//! Long-term archive for evicted messages.
//!
//! When the context window evicts a message it hands a copy to the archive,
//! if one is configured. The context window never reads the archive back;
//! the `query_archive` function searches it on the backend's behalf. Archive
//! failures are logged by the caller and never block eviction.

use crate::Message;
use crate::error::ArchiveError;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Destination for evicted messages.
pub trait Archive: Send {
    fn archive(&mut self, message: &Message) -> Result<(), ArchiveError>;
}

/// One line of a [`JsonlArchive`] file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub session: String,
    /// RFC 3339 timestamp of the eviction.
    pub archived_at: String,
    pub message: Message,
}

/// Append-only JSON-lines file, one [`ArchiveRecord`] per evicted message.
#[derive(Debug, Clone)]
pub struct JsonlArchive {
    path: PathBuf,
    session: String,
}

impl JsonlArchive {
    pub fn new(path: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session: session.into(),
        }
    }

    /// `<dir>/<session>_archive.jsonl`.
    pub fn for_session(dir: &Path, session: &str) -> Self {
        Self::new(dir.join(format!("{session}_archive.jsonl")), session)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back, oldest first.
    pub fn records(&self) -> Result<Vec<ArchiveRecord>, ArchiveError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(ArchiveError::from))
            .collect()
    }
}

impl Archive for JsonlArchive {
    fn archive(&mut self, message: &Message) -> Result<(), ArchiveError> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }
        let record = ArchiveRecord {
            session: self.session.clone(),
            archived_at: chrono::Utc::now().to_rfc3339(),
            message: message.clone(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        trace!("Archived {} bytes to {}", line.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = JsonlArchive::for_session(dir.path(), "chat");
        archive.archive(&Message::user("first")).unwrap();
        archive
            .archive(&Message::assistant("second"))
            .unwrap();

        assert!(archive.path().ends_with("chat_archive.jsonl"));
        let records = archive.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].session, "chat");
        assert_eq!(records[0].message, Message::user("first"));
        assert_eq!(records[1].message, Message::assistant("second"));
        assert!(chrono::DateTime::parse_from_rfc3339(&records[0].archived_at).is_ok());
    }

    #[test]
    fn records_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let archive = JsonlArchive::for_session(dir.path(), "none");
        assert!(archive.records().unwrap().is_empty());
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be.
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).unwrap();
        let mut archive = JsonlArchive::new(&path, "s");
        assert!(archive.archive(&Message::user("x")).is_err());
    }
}
