//! Durable, filename-keyed image gallery with a SQLite embedding cache.
//!
//! Image bytes live as plain files under the gallery directory; embeddings
//! computed for them are cached in SQLite, keyed by image id and validated
//! against the file's content hash so a changed file is re-embedded instead
//! of served from a stale cache entry.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use veriface_core::Embedding;

/// File extensions accepted as gallery entries.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS image_meta (
    image_id    TEXT PRIMARY KEY,
    content_sha TEXT NOT NULL,
    scheme      TEXT NOT NULL,
    dim         INTEGER NOT NULL,
    face_count  INTEGER NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS face_embeddings (
    image_id TEXT NOT NULL,
    face_idx INTEGER NOT NULL,
    vector   BLOB NOT NULL,
    PRIMARY KEY (image_id, face_idx)
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("gallery entry already exists: {0}")]
    DuplicateId(String),
    #[error("gallery entry not found: {0}")]
    NotFound(String),
    #[error("invalid gallery id: {0}")]
    InvalidId(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata acknowledged back to an uploader.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// One row of a gallery listing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ImageInfo {
    pub id: String,
    /// Cached face count; `None` until the entry has been embedded.
    pub faces: Option<usize>,
}

/// One record yielded by a full gallery scan.
#[derive(Debug)]
pub struct ScanRecord {
    pub id: String,
    pub bytes: Vec<u8>,
}

/// Cached embeddings for one image, valid for a specific content hash.
#[derive(Debug)]
pub struct CachedFaces {
    pub scheme: String,
    pub embeddings: Vec<Embedding>,
}

pub struct GalleryStore {
    images_dir: PathBuf,
    conn: Mutex<Connection>,
}

impl GalleryStore {
    /// Open (creating if needed) a gallery at `images_dir` with its embedding
    /// cache at `db_path`.
    pub fn open(images_dir: &Path, db_path: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(images_dir)?;
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!(
            images_dir = %images_dir.display(),
            db = %db_path.display(),
            "gallery store opened"
        );

        Ok(Self {
            images_dir: images_dir.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn image_path(&self, id: &str) -> PathBuf {
        self.images_dir.join(id)
    }

    /// Persist image bytes under `id`.
    ///
    /// Fails with [`StoreError::DuplicateId`] when the id exists and
    /// `overwrite` was not requested. The bytes are durable before the call
    /// returns: written to a temp file, synced, then atomically renamed into
    /// place.
    pub fn put(&self, id: &str, bytes: &[u8], overwrite: bool) -> Result<ImageRecord, StoreError> {
        validate_id(id)?;

        let path = self.image_path(id);
        if path.exists() && !overwrite {
            return Err(StoreError::DuplicateId(id.to_string()));
        }

        let tmp = self.images_dir.join(format!(".{id}.tmp"));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        // An overwrite invalidates whatever was cached for the old bytes.
        if overwrite {
            self.drop_cache_rows(id)?;
        }

        tracing::info!(id, size = bytes.len(), overwrite, "gallery entry stored");

        Ok(ImageRecord {
            id: id.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Raw bytes of a gallery entry.
    pub fn get(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        validate_id(id)?;
        match fs::read(self.image_path(id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a gallery entry and its cache rows. Operator surface only; the
    /// HTTP boundary does not expose removal.
    pub fn remove(&self, id: &str) -> Result<(), StoreError> {
        validate_id(id)?;
        match fs::remove_file(self.image_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        self.drop_cache_rows(id)?;
        tracing::info!(id, "gallery entry removed");
        Ok(())
    }

    /// List gallery entries with their cached face counts, sorted by id.
    /// The order is stable for an unchanged gallery.
    pub fn list(&self) -> Result<Vec<ImageInfo>, StoreError> {
        let ids = self.image_ids()?;
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT face_count FROM image_meta WHERE image_id = ?1")?;

        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            let faces: Option<i64> = stmt
                .query_row(params![id], |row| row.get(0))
                .optional()?;
            infos.push(ImageInfo {
                id,
                faces: faces.map(|n| n.max(0) as usize),
            });
        }
        Ok(infos)
    }

    /// Lazily yield every gallery entry with its bytes, in id order.
    ///
    /// Each call re-reads the directory, so the scan is restartable and
    /// always reflects durable storage at the time it runs. Used by index
    /// rebuilds.
    pub fn scan_all(
        &self,
    ) -> Result<impl Iterator<Item = Result<ScanRecord, StoreError>> + '_, StoreError> {
        let ids = self.image_ids()?;
        Ok(ids.into_iter().map(move |id| {
            let bytes = fs::read(self.image_path(&id))?;
            Ok(ScanRecord { id, bytes })
        }))
    }

    /// Hex SHA-256 of image content, the key that validates cache entries.
    pub fn content_hash(bytes: &[u8]) -> String {
        let digest = Sha256::digest(bytes);
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    /// Cached embeddings for `id`, or `None` when nothing is cached or the
    /// cache entry was computed for different content.
    pub fn cached_embeddings(
        &self,
        id: &str,
        content_sha: &str,
    ) -> Result<Option<CachedFaces>, StoreError> {
        let conn = self.conn();

        let meta: Option<(String, String, i64)> = conn
            .query_row(
                "SELECT content_sha, scheme, face_count FROM image_meta WHERE image_id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((cached_sha, scheme, face_count)) = meta else {
            return Ok(None);
        };
        if cached_sha != content_sha {
            return Ok(None);
        }

        let mut stmt = conn.prepare(
            "SELECT vector FROM face_embeddings WHERE image_id = ?1 ORDER BY face_idx",
        )?;
        let blobs = stmt
            .query_map(params![id], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        if blobs.len() != face_count.max(0) as usize {
            // Torn cache entry; treat as a miss rather than trusting it.
            return Ok(None);
        }

        let mut embeddings = Vec::with_capacity(blobs.len());
        for blob in blobs {
            embeddings.push(decode_vector(&blob)?);
        }

        Ok(Some(CachedFaces { scheme, embeddings }))
    }

    /// Replace the cached embeddings for `id`. The face count is recorded
    /// even when it is zero, so "no face in this image" is itself cached.
    pub fn store_embeddings(
        &self,
        id: &str,
        content_sha: &str,
        scheme: &str,
        embeddings: &[Embedding],
    ) -> Result<(), StoreError> {
        let dim = embeddings.first().map(Embedding::dim).unwrap_or(0);
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM face_embeddings WHERE image_id = ?1",
            params![id],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO image_meta
                 (image_id, content_sha, scheme, dim, face_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                content_sha,
                scheme,
                dim as i64,
                embeddings.len() as i64,
                Utc::now().to_rfc3339()
            ],
        )?;
        for (idx, embedding) in embeddings.iter().enumerate() {
            tx.execute(
                "INSERT INTO face_embeddings (image_id, face_idx, vector) VALUES (?1, ?2, ?3)",
                params![id, idx as i64, encode_vector(embedding)],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn drop_cache_rows(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute("DELETE FROM image_meta WHERE image_id = ?1", params![id])?;
        conn.execute(
            "DELETE FROM face_embeddings WHERE image_id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Sorted ids of every image file in the gallery directory.
    fn image_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.images_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if validate_id(&name).is_ok() {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Reject ids that could escape the gallery directory or that carry an
/// extension we do not serve.
fn validate_id(id: &str) -> Result<(), StoreError> {
    let bad = id.is_empty()
        || id.starts_with('.')
        || id.contains('/')
        || id.contains('\\')
        || id.contains("..");
    if bad {
        return Err(StoreError::InvalidId(id.to_string()));
    }

    let ext = id.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(StoreError::InvalidId(id.to_string())),
    }
}

fn encode_vector(embedding: &Embedding) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.dim() * 4);
    for value in embedding.as_slice() {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn decode_vector(blob: &[u8]) -> Result<Embedding, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::Storage(format!(
            "corrupt embedding blob of {} bytes",
            blob.len()
        )));
    }
    let values = blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    // Stored vectors are already unit length; re-normalizing is a no-op.
    Ok(Embedding::from_raw(values))
}
