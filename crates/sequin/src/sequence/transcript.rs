//! Unbounded record of every message a session produced.

use crate::Message;
use crate::context::oracle::TokenOracle;
use crate::error::StoreError;
use crate::sequence::store::SequenceStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Append-only mirror of the conversation. Never evicts.
pub struct Transcript {
    store: SequenceStore,
    oracle: Arc<dyn TokenOracle>,
}

impl Transcript {
    pub fn new(path: impl Into<PathBuf>, oracle: Arc<dyn TokenOracle>) -> Self {
        Self {
            store: SequenceStore::new(path),
            oracle,
        }
    }

    pub fn enqueue(&mut self, message: Message) {
        self.store.append(message);
    }

    /// Tokens across the whole transcript. Informational only.
    pub fn token_count(&self) -> usize {
        self.oracle.count_messages(self.store.messages())
    }

    pub fn system_message(&self) -> Option<&Message> {
        self.store.get(0).filter(|m| m.is_system())
    }

    /// Replace the system message, or put one in front if there is none.
    pub fn set_system_message(&mut self, message: Message) {
        if self.system_message().is_some() {
            self.store.update(0, message);
        } else {
            self.store.insert(0, message);
        }
    }

    /// Discard everything and start over from `system`.
    pub fn reset(&mut self, system: Message) {
        self.store.clear();
        self.store.append(system);
    }

    pub fn load(&mut self) -> bool {
        self.store.load()
    }

    pub fn save(&self) -> Result<(), StoreError> {
        self.store.save()
    }

    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn store(&self) -> &SequenceStore {
        &self.store
    }
}
