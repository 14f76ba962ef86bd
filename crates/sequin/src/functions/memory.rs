//! Session memory functions.
//!
//! | Function | Name | Description |
//! |----------|------|-------------|
//! | [`GetAllKeys`] | `get_all_keys` | List every memory key |
//! | [`QueryMemory`] | `query_memory` | Read the memory stored under a key |
//! | [`UpdateMemory`] | `update_memory` | Create or overwrite a memory |
//! | [`DeleteMemory`] | `delete_memory` | Remove a memory |
//! | [`QueryArchive`] | `query_archive` | Search evicted messages |
//!
//! Memories live in a per-session JSON object (`<session>_memory.json`)
//! written atomically. The archive is only ever read here.

use crate::context::archive::JsonlArchive;
use crate::error::FunctionError;
use crate::functions::core::{Arguments, Function, FunctionDef, FunctionFuture, FunctionRegistry};
use crate::json_schema_for;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const DEFAULT_ARCHIVE_RESULTS: usize = 5;

// ── Store ──────────────────────────────────────────────────────────

/// One remembered value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MemoryEntry {
    pub content: String,
    /// RFC 3339 timestamp of the last update.
    pub updated_at: String,
}

/// Key-value file shared by the memory functions.
#[derive(Debug)]
pub struct MemoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every entry, keyed and sorted. A missing file is an empty store.
    pub async fn entries(&self) -> Result<BTreeMap<String, MemoryEntry>, FunctionError> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    pub async fn get(&self, key: &str) -> Result<Option<MemoryEntry>, FunctionError> {
        Ok(self.entries().await?.remove(key))
    }

    /// Insert or replace `key`.
    pub async fn put(&self, key: &str, content: &str) -> Result<(), FunctionError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read().await?;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                content: content.to_string(),
                updated_at: chrono::Utc::now().to_rfc3339(),
            },
        );
        self.write(&entries).await
    }

    /// Returns `false` if there was no such key.
    pub async fn remove(&self, key: &str) -> Result<bool, FunctionError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read().await?;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.write(&entries).await?;
        Ok(true)
    }

    async fn read(&self) -> Result<BTreeMap<String, MemoryEntry>, FunctionError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(FunctionError::Failed(format!(
                    "reading {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&raw).map_err(|e| {
            FunctionError::Failed(format!("malformed memory file {}: {e}", self.path.display()))
        })
    }

    async fn write(&self, entries: &BTreeMap<String, MemoryEntry>) -> Result<(), FunctionError> {
        let failed = |e: std::io::Error| FunctionError::Failed(format!("writing memory: {e}"));
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await.map_err(failed)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "memory.json".into());
        let tmp_path = dir.join(format!(".{file_name}.tmp"));
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| FunctionError::Failed(e.to_string()))?;
        tokio::fs::write(&tmp_path, json).await.map_err(failed)?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(failed)?;
        debug!("Saved {} memories to {}", entries.len(), self.path.display());
        Ok(())
    }
}

// ── Typed argument structs ──────────────────────────────────────────

/// Typed arguments for `get_all_keys`.
#[derive(Deserialize, JsonSchema)]
pub struct GetAllKeysArgs {}

/// Typed arguments for `query_memory` and `delete_memory`.
#[derive(Deserialize, JsonSchema)]
pub struct MemoryKeyArgs {
    /// Key of the memory record.
    pub key: String,
}

/// Typed arguments for `update_memory`.
#[derive(Deserialize, JsonSchema)]
pub struct UpdateMemoryArgs {
    /// Key of the memory record.
    pub key: String,
    /// Text to remember under the key.
    pub content: String,
}

/// Typed arguments for `query_archive`.
#[derive(Deserialize, JsonSchema)]
pub struct QueryArchiveArgs {
    /// Text to look for, case-insensitively.
    pub query: String,
    /// Most matches to return, newest first (default 5).
    #[serde(default)]
    pub limit: Option<usize>,
}

fn parse<A: DeserializeOwned>(arguments: Arguments) -> Result<A, FunctionError> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|e| FunctionError::InvalidArguments(e.to_string()))
}

// ── Memory functions ───────────────────────────────────────────────

pub struct GetAllKeys(Arc<MemoryStore>);

impl Function for GetAllKeys {
    fn definition(&self) -> FunctionDef {
        FunctionDef::new(
            "get_all_keys",
            "Retrieve all the keys of the stored memory records.",
            json_schema_for::<GetAllKeysArgs>(),
        )
    }

    fn call(&self, arguments: Arguments) -> FunctionFuture<'_> {
        Box::pin(async move {
            let _: GetAllKeysArgs = parse(arguments)?;
            let entries = self.0.entries().await?;
            if entries.is_empty() {
                return Ok("No memories stored.".into());
            }
            let keys: Vec<&str> = entries.keys().map(String::as_str).collect();
            Ok(format!("Available memory keys:\n{}", keys.join("\n")))
        })
    }
}

pub struct QueryMemory(Arc<MemoryStore>);

impl Function for QueryMemory {
    fn definition(&self) -> FunctionDef {
        FunctionDef::new(
            "query_memory",
            "Query the memory record stored under a given key.",
            json_schema_for::<MemoryKeyArgs>(),
        )
    }

    fn call(&self, arguments: Arguments) -> FunctionFuture<'_> {
        Box::pin(async move {
            let args: MemoryKeyArgs = parse(arguments)?;
            Ok(match self.0.get(&args.key).await? {
                Some(entry) => format!("---\n{}:\n---\n{}", entry.updated_at, entry.content),
                None => format!("No memory found for key: {}", args.key),
            })
        })
    }
}

pub struct UpdateMemory(Arc<MemoryStore>);

impl Function for UpdateMemory {
    fn definition(&self) -> FunctionDef {
        FunctionDef::new(
            "update_memory",
            "Update or create the memory record with a given key and content.",
            json_schema_for::<UpdateMemoryArgs>(),
        )
    }

    fn call(&self, arguments: Arguments) -> FunctionFuture<'_> {
        Box::pin(async move {
            let args: UpdateMemoryArgs = parse(arguments)?;
            if args.key.trim().is_empty() {
                return Err(FunctionError::InvalidArguments("key must not be empty".into()));
            }
            self.0.put(&args.key, &args.content).await?;
            Ok(format!("Memory updated for key: {}", args.key))
        })
    }
}

pub struct DeleteMemory(Arc<MemoryStore>);

impl Function for DeleteMemory {
    fn definition(&self) -> FunctionDef {
        FunctionDef::new(
            "delete_memory",
            "Delete the memory record with a given key.",
            json_schema_for::<MemoryKeyArgs>(),
        )
    }

    fn call(&self, arguments: Arguments) -> FunctionFuture<'_> {
        Box::pin(async move {
            let args: MemoryKeyArgs = parse(arguments)?;
            Ok(if self.0.remove(&args.key).await? {
                format!("Memory deleted for key: {}", args.key)
            } else {
                format!("No memory found for key: {}", args.key)
            })
        })
    }
}

// ── query_archive ──────────────────────────────────────────────────

/// Case-insensitive substring search over a session's evicted messages.
pub struct QueryArchive {
    archive: JsonlArchive,
}

impl QueryArchive {
    pub fn new(archive: JsonlArchive) -> Self {
        Self { archive }
    }
}

impl Function for QueryArchive {
    fn definition(&self) -> FunctionDef {
        FunctionDef::new(
            "query_archive",
            "Search earlier messages that no longer fit in the conversation.",
            json_schema_for::<QueryArchiveArgs>(),
        )
    }

    fn call(&self, arguments: Arguments) -> FunctionFuture<'_> {
        Box::pin(async move {
            let args: QueryArchiveArgs = parse(arguments)?;
            let needle = args.query.to_lowercase();
            if needle.trim().is_empty() {
                return Err(FunctionError::InvalidArguments("query must not be empty".into()));
            }
            let limit = args.limit.unwrap_or(DEFAULT_ARCHIVE_RESULTS).max(1);

            let records = self
                .archive
                .records()
                .map_err(|e| FunctionError::Failed(e.to_string()))?;
            let hits: Vec<String> = records
                .iter()
                .rev()
                .filter_map(|r| {
                    let content = r.message.content()?;
                    content.to_lowercase().contains(&needle).then(|| {
                        format!("[{}] {}: {content}", r.archived_at, r.message.role())
                    })
                })
                .take(limit)
                .collect();

            if hits.is_empty() {
                return Ok(format!("No archived messages match: {}", args.query));
            }
            Ok(hits.join("\n"))
        })
    }
}

impl FunctionRegistry {
    /// Register the memory functions over `memory_path`, plus `query_archive`
    /// when an archive is given.
    pub fn with_memory_functions(
        self,
        memory_path: impl Into<PathBuf>,
        archive: Option<JsonlArchive>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new(memory_path));
        let registry = self
            .with(GetAllKeys(store.clone()))
            .with(QueryMemory(store.clone()))
            .with(UpdateMemory(store.clone()))
            .with(DeleteMemory(store));
        match archive {
            Some(archive) => registry.with(QueryArchive::new(archive)),
            None => registry,
        }
    }
}
