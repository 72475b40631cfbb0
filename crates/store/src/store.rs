//! sled-backed conversation store.
//!
//! Two trees live in one database: `conversations` maps a primary key to the
//! JSON-encoded [`StoredConversation`], and `fingerprints` maps a conversation
//! fingerprint to the primary key it was stored under. Every write and delete
//! touches both trees inside a single sled transaction, so a reader never
//! sees a record whose index entry points somewhere else.
//!
//! Reads never fail outward: a storage or decoding fault is logged and
//! reported as "not found", which lets a request fall back to a fresh remote
//! session. Writes return [`StoreError`] so the caller can decide.

use chrono::Utc;
use gemrelay_core::{Message, StoreError, StoredConversation};
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use sled::{IVec, Transactional};
use std::borrow::Borrow;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::fingerprint::{Fingerprint, fingerprint};
use crate::sanitize::sanitize;

const RECORDS_TREE: &str = "conversations";
const INDEX_TREE: &str = "fingerprints";

/// Where the store lives and how large it may grow.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub path: PathBuf,
    pub max_size: u64,
}

/// Entry counts and size metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub records: usize,
    pub fingerprints: usize,
    pub size_on_disk: u64,
    pub max_size: u64,
}

/// Content-addressed store of remote conversations.
pub struct ConversationStore {
    path: PathBuf,
    db: sled::Db,
    pub(crate) records: sled::Tree,
    pub(crate) index: sled::Tree,
    member_ids: Vec<String>,
    max_size: u64,
}

pub(crate) fn storage_error(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

pub(crate) fn flatten<T>(result: TransactionResult<T, StoreError>) -> Result<T, StoreError> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => storage_error(e),
    })
}

pub(crate) fn decode(bytes: &[u8]) -> Result<StoredConversation, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn abort(e: StoreError) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(e)
}

impl ConversationStore {
    /// Open (or create) the store used by a running pool.
    ///
    /// `member_ids` fixes the order in which [`find`](Self::find) tries pool
    /// members; the first member whose fingerprint resolves wins.
    pub fn open(options: StoreOptions, member_ids: Vec<String>) -> Result<Self, StoreError> {
        if let Some(parent) = options.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(storage_error)?;
            }
        }

        let db = sled::open(&options.path).map_err(storage_error)?;
        let records = db.open_tree(RECORDS_TREE).map_err(storage_error)?;
        let index = db.open_tree(INDEX_TREE).map_err(storage_error)?;

        info!(
            path = %options.path.display(),
            records = records.len(),
            members = member_ids.len(),
            "Conversation store opened"
        );

        Ok(Self {
            path: options.path,
            db,
            records,
            index,
            member_ids,
            max_size: options.max_size,
        })
    }

    /// Open an existing database for maintenance, without pool members or a
    /// size limit.
    pub fn open_path(path: &Path) -> Result<Self, StoreError> {
        Self::open(
            StoreOptions {
                path: path.to_path_buf(),
                max_size: u64::MAX,
            },
            Vec::new(),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn member_ids(&self) -> &[String] {
        &self.member_ids
    }

    /// Store a conversation and return its primary key.
    ///
    /// The key defaults to the conversation's fingerprint. An existing record
    /// under the same key is replaced, keeping its `created_at`.
    pub fn put(
        &self,
        mut conversation: StoredConversation,
        key: Option<&str>,
    ) -> Result<String, StoreError> {
        if conversation.messages.is_empty() {
            return Err(StoreError::EmptyConversation);
        }

        let size_on_disk = self.db.size_on_disk().map_err(storage_error)?;
        if size_on_disk > self.max_size {
            return Err(StoreError::Full {
                size_on_disk,
                max_size: self.max_size,
            });
        }

        let fp = fingerprint(
            &conversation.client_id,
            &conversation.model,
            &conversation.messages,
        );
        let storage_key = key.map_or_else(|| fp.to_string(), str::to_string);

        let now = Utc::now();
        conversation.updated_at = Some(now);

        let result: TransactionResult<(), StoreError> =
            (&self.records, &self.index).transaction(|(records, index)| {
                let mut record = conversation.clone();

                if let Some(previous) = records.get(storage_key.as_bytes())? {
                    // Unreadable previous records are simply overwritten.
                    if let Ok(previous) = decode(&previous) {
                        if record.created_at.is_none() {
                            record.created_at = previous.created_at;
                        }
                        let stale = fingerprint(
                            &previous.client_id,
                            &previous.model,
                            &previous.messages,
                        );
                        if stale != fp
                            && index.get(stale.as_str())?.as_deref() == Some(storage_key.as_bytes())
                        {
                            index.remove(stale.as_str())?;
                        }
                    }
                }
                record.created_at.get_or_insert(now);

                let bytes = serde_json::to_vec(&record)
                    .map_err(|e| abort(StoreError::Serialization(e.to_string())))?;
                records.insert(storage_key.as_bytes(), bytes)?;
                index.insert(fp.as_str(), storage_key.as_bytes())?;
                Ok(())
            });

        if let Err(e) = flatten(result) {
            error!(key = %storage_key, error = %e, "Failed to store conversation");
            return Err(e);
        }

        debug!(
            key = %storage_key,
            messages = conversation.messages.len(),
            "Stored conversation"
        );
        Ok(storage_key)
    }

    /// Fetch a conversation by primary key.
    pub fn get(&self, key: &str) -> Option<StoredConversation> {
        match self.try_get(key) {
            Ok(found) => found,
            Err(e) => {
                error!(key, error = %e, "Failed to retrieve conversation");
                None
            }
        }
    }

    fn try_get(&self, key: &str) -> Result<Option<StoredConversation>, StoreError> {
        let Some(bytes) = self.records.get(key).map_err(storage_error)? else {
            return Ok(None);
        };
        let conversation = decode(&bytes)?;
        debug!(key, messages = conversation.messages.len(), "Retrieved conversation");
        Ok(Some(conversation))
    }

    /// Find the stored conversation whose history is exactly `messages`.
    ///
    /// Pool members are tried in configured order. When the raw history has
    /// no match, the search is repeated with sanitized assistant messages.
    pub fn find<M: Borrow<Message>>(
        &self,
        model: &str,
        messages: &[M],
    ) -> Option<StoredConversation> {
        if messages.is_empty() {
            return None;
        }

        if let Some(conversation) = self.find_by_messages(model, messages) {
            debug!(model, "Found conversation with raw message history");
            return Some(conversation);
        }

        let cleaned = sanitize(messages);
        if let Some(conversation) = self.find_by_messages(model, &cleaned) {
            debug!(model, "Found conversation with cleaned message history");
            return Some(conversation);
        }

        debug!(model, messages = messages.len(), "No stored conversation matches");
        None
    }

    fn find_by_messages<M: Borrow<Message>>(
        &self,
        model: &str,
        messages: &[M],
    ) -> Option<StoredConversation> {
        for member_id in &self.member_ids {
            let fp = fingerprint(member_id, model, messages);

            match self.lookup_indexed(&fp) {
                Ok(Some(conversation)) => return Some(conversation),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        fingerprint = %fp,
                        client = %member_id,
                        error = %e,
                        "Failed to resolve fingerprint"
                    );
                    continue;
                }
            }

            if let Some(conversation) = self.get(fp.as_str()) {
                return Some(conversation);
            }
        }
        None
    }

    /// Resolve a fingerprint through the reverse index in one consistent read.
    fn lookup_indexed(&self, fp: &Fingerprint) -> Result<Option<StoredConversation>, StoreError> {
        let result: TransactionResult<Option<IVec>, StoreError> =
            (&self.records, &self.index).transaction(|(records, index)| {
                match index.get(fp.as_str())? {
                    Some(key) => Ok(records.get(key)?),
                    None => Ok(None),
                }
            });

        flatten(result)?.map(|bytes| decode(&bytes)).transpose()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.records.contains_key(key).unwrap_or_else(|e| {
            error!(key, error = %e, "Failed to check conversation existence");
            false
        })
    }

    /// Delete a conversation and its reverse-index entry.
    ///
    /// The index entry is only removed while it still points at `key`.
    pub fn delete(&self, key: &str) -> Option<StoredConversation> {
        match self.remove_entry(key) {
            Ok(removed) => {
                if removed.is_some() {
                    debug!(key, "Deleted conversation");
                }
                removed
            }
            Err(e) => {
                error!(key, error = %e, "Failed to delete conversation");
                None
            }
        }
    }

    pub(crate) fn remove_entry(&self, key: &str) -> Result<Option<StoredConversation>, StoreError> {
        let result: TransactionResult<Option<StoredConversation>, StoreError> =
            (&self.records, &self.index).transaction(|(records, index)| {
                let Some(bytes) = records.get(key.as_bytes())? else {
                    return Ok(None);
                };
                let conversation = decode(&bytes).map_err(abort)?;
                let fp = fingerprint(
                    &conversation.client_id,
                    &conversation.model,
                    &conversation.messages,
                );

                records.remove(key.as_bytes())?;
                if index.get(fp.as_str())?.as_deref() == Some(key.as_bytes()) {
                    index.remove(fp.as_str())?;
                }
                Ok(Some(conversation))
            });

        flatten(result)
    }

    /// Primary keys in byte order, optionally filtered by prefix.
    ///
    /// Reverse-index entries are never listed.
    pub fn keys(&self, prefix: Option<&str>, limit: Option<usize>) -> Vec<String> {
        let limit = limit.unwrap_or(usize::MAX);
        let mut keys = Vec::new();

        for entry in self.records.scan_prefix(prefix.unwrap_or("")) {
            if keys.len() >= limit {
                break;
            }
            match entry {
                Ok((key, _)) => keys.push(String::from_utf8_lossy(&key).into_owned()),
                Err(e) => {
                    error!(error = %e, "Failed to list conversation keys");
                    break;
                }
            }
        }
        keys
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats {
            records: self.records.len(),
            fingerprints: self.index.len(),
            size_on_disk: self.db.size_on_disk().map_err(storage_error)?,
            max_size: self.max_size,
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(storage_error)?;
        Ok(())
    }

    /// Flush pending writes before shutdown.
    pub fn close(&self) {
        match self.flush() {
            Ok(()) => info!(path = %self.path.display(), "Conversation store closed"),
            Err(e) => error!(error = %e, "Failed to flush conversation store"),
        }
    }
}
