//! Durable ordered message list backed by one JSON array file.
//!
//! The store knows nothing about tokens or eviction; it only holds messages
//! in order and moves them to and from disk. Index access is bounds-checked
//! and reports misses through `None`/`false` rather than panicking.

use crate::Message;
use crate::error::StoreError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An ordered list of messages persisted as a pretty-printed JSON array.
#[derive(Debug, Clone)]
pub struct SequenceStore {
    path: PathBuf,
    messages: Vec<Message>,
}

impl SequenceStore {
    /// An empty store addressed at `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            messages: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory list with the file's contents.
    ///
    /// Returns `false` and leaves memory untouched when the file is missing,
    /// unreadable, or not a JSON array of valid messages.
    pub fn load(&mut self) -> bool {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No sequence file at {}", self.path.display());
                return false;
            }
            Err(e) => {
                warn!("Unreadable sequence file at {}: {e}", self.path.display());
                return false;
            }
        };
        match serde_json::from_str::<Vec<Message>>(&json) {
            Ok(messages) => {
                debug!(
                    "Loaded {} messages from {}",
                    messages.len(),
                    self.path.display()
                );
                self.messages = messages;
                true
            }
            Err(e) => {
                warn!("Malformed sequence file at {}: {e}", self.path.display());
                false
            }
        }
    }

    /// Atomic write: serialize to a hidden temp file, then rename into place.
    pub fn save(&self) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sequence.json".into());
        let tmp_path = dir.join(format!(".{file_name}.tmp"));

        let json = serde_json::to_string_pretty(&self.messages)?;
        std::fs::write(&tmp_path, json).map_err(|source| StoreError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|source| StoreError::Rename {
            from: tmp_path.clone(),
            source,
        })?;
        Ok(())
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Insert at `index`, shifting later messages. Returns `false` if
    /// `index > len`.
    pub fn insert(&mut self, index: usize, message: Message) -> bool {
        if index > self.messages.len() {
            return false;
        }
        self.messages.insert(index, message);
        true
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    /// Replace the message at `index`. Returns `false` if out of range.
    pub fn update(&mut self, index: usize, message: Message) -> bool {
        match self.messages.get_mut(index) {
            Some(slot) => {
                *slot = message;
                true
            }
            None => false,
        }
    }

    /// Remove the message at `index`. Returns `false` if out of range.
    pub fn remove(&mut self, index: usize) -> bool {
        self.pop(index).is_some()
    }

    /// Remove and return the message at `index`.
    pub fn pop(&mut self, index: usize) -> Option<Message> {
        if index < self.messages.len() {
            Some(self.messages.remove(index))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl<'a> IntoIterator for &'a SequenceStore {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
