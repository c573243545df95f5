//! In-memory face index with immutable, versioned snapshots.
//!
//! Readers take the current snapshot as an `Arc` clone and scan it without
//! holding any lock; writers build a complete replacement snapshot and
//! publish it with a pointer swap. `add` and `rebuild` serialize on a single
//! writer lock, so a snapshot is only ever replaced by one writer at a time
//! and readers never observe a partially-built index.

use crate::gallery::StoreError;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use veriface_core::{EmbedError, Embedding, IndexEntry};

#[derive(Error, Debug)]
pub enum IndexError {
    /// Embedding scheme mismatch within one snapshot — a configuration
    /// error, fatal for the enclosing add/rebuild.
    #[error("embedding scheme mismatch: snapshot holds '{existing}', got '{offered}' for {owner}")]
    SchemeMismatch {
        existing: String,
        offered: String,
        owner: String,
    },
    /// Embedding dimension mismatch within one snapshot.
    #[error("embedding dimension mismatch: snapshot holds {existing}, got {offered} for {owner}")]
    DimMismatch {
        existing: usize,
        offered: usize,
        owner: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("embedding {id}: {source}")]
    Embed { id: String, source: EmbedError },
}

/// All embeddings of one gallery record, ready for indexing.
#[derive(Debug)]
pub struct EmbeddedRecord {
    pub owner_id: String,
    pub scheme: String,
    pub embeddings: Vec<Embedding>,
}

/// An immutable view of the index at one point in time.
///
/// `scheme`/`dim` are `None` only while the snapshot is empty; the first
/// entry pins them and every further entry must agree.
#[derive(Debug)]
pub struct FaceIndexSnapshot {
    version: u64,
    scheme: Option<String>,
    dim: Option<usize>,
    entries: Vec<IndexEntry>,
}

impl FaceIndexSnapshot {
    fn empty() -> Self {
        Self {
            version: 0,
            scheme: None,
            dim: None,
            entries: Vec::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accumulates entries for a snapshot under construction, enforcing the
/// one-scheme/one-dimension invariant as entries arrive.
struct SnapshotBuilder {
    scheme: Option<String>,
    dim: Option<usize>,
    entries: Vec<IndexEntry>,
}

impl SnapshotBuilder {
    fn new(scheme: Option<String>, dim: Option<usize>, entries: Vec<IndexEntry>) -> Self {
        Self {
            scheme,
            dim,
            entries,
        }
    }

    fn push_record(
        &mut self,
        owner_id: &str,
        scheme: &str,
        embeddings: &[Embedding],
    ) -> Result<(), IndexError> {
        for embedding in embeddings {
            match &self.scheme {
                None => self.scheme = Some(scheme.to_string()),
                Some(existing) if existing != scheme => {
                    return Err(IndexError::SchemeMismatch {
                        existing: existing.clone(),
                        offered: scheme.to_string(),
                        owner: owner_id.to_string(),
                    })
                }
                Some(_) => {}
            }
            match self.dim {
                None => self.dim = Some(embedding.dim()),
                Some(existing) if existing != embedding.dim() => {
                    return Err(IndexError::DimMismatch {
                        existing,
                        offered: embedding.dim(),
                        owner: owner_id.to_string(),
                    })
                }
                Some(_) => {}
            }
            self.entries.push(IndexEntry {
                owner_id: owner_id.to_string(),
                embedding: embedding.clone(),
            });
        }
        Ok(())
    }

    fn build(self, version: u64) -> FaceIndexSnapshot {
        FaceIndexSnapshot {
            version,
            scheme: self.scheme,
            dim: self.dim,
            entries: self.entries,
        }
    }
}

pub struct FaceIndex {
    current: RwLock<Arc<FaceIndexSnapshot>>,
    /// Serializes `add` and `rebuild` against each other. Held while a new
    /// snapshot is built, which for a rebuild includes the gallery scan.
    writer: Mutex<()>,
}

impl Default for FaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceIndex {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(FaceIndexSnapshot::empty())),
            writer: Mutex::new(()),
        }
    }

    /// The latest published snapshot. Never waits on a rebuild in progress;
    /// the read lock is held only for the duration of an `Arc` clone.
    pub fn current_snapshot(&self) -> Arc<FaceIndexSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn publish(&self, snapshot: FaceIndexSnapshot) -> Arc<FaceIndexSnapshot> {
        let snapshot = Arc::new(snapshot);
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = snapshot.clone();
        snapshot
    }

    /// Publish a snapshot equal to the current one plus this record's
    /// embeddings. Existing entries of the same owner are replaced, so
    /// re-adding an overwritten image never leaves stale vectors behind.
    /// When nothing would change (unknown owner, zero embeddings) the
    /// current snapshot is returned unchanged and no version is spent.
    pub fn add(
        &self,
        owner_id: &str,
        scheme: &str,
        embeddings: &[Embedding],
    ) -> Result<Arc<FaceIndexSnapshot>, IndexError> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let current = self.current_snapshot();
        let retained: Vec<IndexEntry> = current
            .entries
            .iter()
            .filter(|entry| entry.owner_id != owner_id)
            .cloned()
            .collect();
        if embeddings.is_empty() && retained.len() == current.entries.len() {
            return Ok(current);
        }

        let mut builder = SnapshotBuilder::new(current.scheme.clone(), current.dim, retained);
        builder.push_record(owner_id, scheme, embeddings)?;

        let snapshot = self.publish(builder.build(current.version + 1));
        tracing::debug!(
            owner = owner_id,
            version = snapshot.version,
            entries = snapshot.len(),
            "index entry added"
        );
        Ok(snapshot)
    }

    /// Replace the published snapshot with one built from a complete set of
    /// embedded records.
    ///
    /// All-or-nothing: the new snapshot is fully assembled before anything
    /// is published, and any record error aborts the rebuild leaving the
    /// previous snapshot in place. An empty record set publishes a valid
    /// empty snapshot (an empty gallery is a legitimate state).
    pub fn rebuild<I>(&self, records: I) -> Result<Arc<FaceIndexSnapshot>, IndexError>
    where
        I: IntoIterator<Item = Result<EmbeddedRecord, IndexError>>,
    {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let mut builder = SnapshotBuilder::new(None, None, Vec::new());
        for record in records {
            let record = record?;
            builder.push_record(&record.owner_id, &record.scheme, &record.embeddings)?;
        }

        let version = self.current_snapshot().version + 1;
        let snapshot = self.publish(builder.build(version));
        tracing::info!(
            version = snapshot.version,
            entries = snapshot.len(),
            "index rebuilt"
        );
        Ok(snapshot)
    }
}
