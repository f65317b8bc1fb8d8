//! Durable storage behind the version store.
//!
//! A backend sees every ordinal change before it becomes visible in memory
//! and hands the full table back when the server restarts. Without one, a
//! restart resets every client to 0 and replayed mutations would be applied
//! twice.

use crate::error::{ServerError, ServerResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// user_id -> client_id -> last applied mutation id.
pub type ClientOrdinals = HashMap<String, HashMap<String, u64>>;

/// Persists client ordinals across restarts.
pub trait VersionBackend: Send + Sync + fmt::Debug {
    /// Loads every recorded ordinal.
    fn load(&self) -> ServerResult<ClientOrdinals>;

    /// Persists one client's ordinal.
    ///
    /// Called with the version store's write lock held; the new value only
    /// becomes visible once this returns `Ok`.
    fn record(&self, user_id: &str, client_id: &str, last_mutation_id: u64) -> ServerResult<()>;
}

/// Backend that lives as long as its clones; useful for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    records: Arc<Mutex<ClientOrdinals>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionBackend for MemoryBackend {
    fn load(&self) -> ServerResult<ClientOrdinals> {
        Ok(self.records.lock().clone())
    }

    fn record(&self, user_id: &str, client_id: &str, last_mutation_id: u64) -> ServerResult<()> {
        self.records
            .lock()
            .entry(user_id.to_string())
            .or_default()
            .insert(client_id.to_string(), last_mutation_id);
        Ok(())
    }
}

/// Backend writing the whole table as JSON to one file.
///
/// Each record rewrites a sibling temp file and renames it over the target,
/// so a crash leaves either the old or the new table on disk.
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    records: Mutex<ClientOrdinals>,
}

impl JsonFileBackend {
    /// Opens `path`, reading any table already stored there.
    ///
    /// A missing or empty file is an empty table.
    pub fn open(path: impl Into<PathBuf>) -> ServerResult<Self> {
        let path = path.into();
        let records = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => ClientOrdinals::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ServerError::Internal(format!("corrupt version file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => ClientOrdinals::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), users = records.len(), "opened version file");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Returns the file this backend writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, records: &ClientOrdinals) -> ServerResult<()> {
        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|e| ServerError::Internal(format!("encode version file: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl VersionBackend for JsonFileBackend {
    fn load(&self) -> ServerResult<ClientOrdinals> {
        Ok(self.records.lock().clone())
    }

    fn record(&self, user_id: &str, client_id: &str, last_mutation_id: u64) -> ServerResult<()> {
        let mut records = self.records.lock();
        let mut next = records.clone();
        next.entry(user_id.to_string())
            .or_default()
            .insert(client_id.to_string(), last_mutation_id);
        self.flush(&next)?;
        *records = next;
        Ok(())
    }
}
