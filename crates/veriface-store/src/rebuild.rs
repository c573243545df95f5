//! Full index rebuild from durable storage.

use crate::gallery::GalleryStore;
use crate::index::{EmbeddedRecord, FaceIndex, IndexError};
use veriface_core::Embedder;

/// What a rebuild did, for the reload acknowledgement and the logs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RebuildStats {
    /// Gallery images scanned.
    pub images: usize,
    /// Face entries in the published snapshot.
    pub faces: usize,
    /// Images whose cached embeddings were reused.
    pub reused: usize,
    /// Images that had to be (re-)embedded.
    pub embedded: usize,
    /// Version of the snapshot that was published.
    pub version: u64,
}

/// Rebuild the face index from a complete gallery scan.
///
/// For every image the content hash decides whether the cached embeddings
/// are still valid; cache misses (new files, changed bytes, or a different
/// embedding scheme) go through the embedder and refill the cache. The new
/// snapshot is published atomically only after every record succeeded — any
/// failure aborts the rebuild and the previous snapshot stays live.
pub fn rebuild_from_store(
    store: &GalleryStore,
    index: &FaceIndex,
    embedder: &mut dyn Embedder,
) -> Result<RebuildStats, IndexError> {
    let mut images = 0usize;
    let mut faces = 0usize;
    let mut reused = 0usize;
    let mut embedded = 0usize;

    let scan = store.scan_all().map_err(IndexError::Store)?;
    let records = scan.map(|item| -> Result<EmbeddedRecord, IndexError> {
        let record = item.map_err(IndexError::Store)?;
        images += 1;

        let sha = GalleryStore::content_hash(&record.bytes);
        if let Some(cached) = store
            .cached_embeddings(&record.id, &sha)
            .map_err(IndexError::Store)?
        {
            // A cache entry from a different scheme is a miss, not an error:
            // re-embedding keeps the snapshot uniform.
            if cached.scheme == embedder.scheme() {
                reused += 1;
                faces += cached.embeddings.len();
                return Ok(EmbeddedRecord {
                    owner_id: record.id,
                    scheme: cached.scheme,
                    embeddings: cached.embeddings,
                });
            }
        }

        let outcome = embedder
            .embed(&record.bytes)
            .map_err(|source| IndexError::Embed {
                id: record.id.clone(),
                source,
            })?;
        store
            .store_embeddings(&record.id, &sha, embedder.scheme(), &outcome.embeddings)
            .map_err(IndexError::Store)?;
        embedded += 1;
        faces += outcome.embeddings.len();

        Ok(EmbeddedRecord {
            owner_id: record.id,
            scheme: embedder.scheme().to_string(),
            embeddings: outcome.embeddings,
        })
    });

    let snapshot = index.rebuild(records)?;

    let stats = RebuildStats {
        images,
        faces,
        reused,
        embedded,
        version: snapshot.version(),
    };
    tracing::info!(
        images = stats.images,
        faces = stats.faces,
        reused = stats.reused,
        embedded = stats.embedded,
        version = stats.version,
        "gallery rebuild finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use veriface_core::{
        EmbedError, EmbedOutcome, Embedding, FaceBox, Matcher, ScanMatcher,
        DEFAULT_MATCH_THRESHOLD,
    };

    /// Deterministic embedder: the first four bytes of the input become the
    /// embedding. Inputs starting with "noface" detect nothing; inputs
    /// starting with "bad" fail like a corrupt image.
    struct StubEmbedder {
        calls: usize,
    }

    impl StubEmbedder {
        fn new() -> Self {
            Self { calls: 0 }
        }

        fn embedding_for(bytes: &[u8]) -> Embedding {
            let mut values = [0.0f32; 4];
            for (i, b) in bytes.iter().take(4).enumerate() {
                values[i] = *b as f32 + 1.0;
            }
            Embedding::from_raw(values.to_vec())
        }
    }

    impl Embedder for StubEmbedder {
        fn scheme(&self) -> &str {
            "stub"
        }

        fn dim(&self) -> usize {
            4
        }

        fn embed(&mut self, bytes: &[u8]) -> Result<EmbedOutcome, EmbedError> {
            self.calls += 1;
            if bytes.starts_with(b"bad") {
                return Err(EmbedError::InvalidImage("stub decode failure".to_string()));
            }
            if bytes.starts_with(b"noface") {
                return Ok(EmbedOutcome {
                    faces: Vec::new(),
                    embeddings: Vec::new(),
                });
            }
            Ok(EmbedOutcome {
                faces: vec![FaceBox {
                    x: 0.0,
                    y: 0.0,
                    width: 32.0,
                    height: 32.0,
                    confidence: 0.9,
                }],
                embeddings: vec![Self::embedding_for(bytes)],
            })
        }
    }

    fn setup() -> (TempDir, GalleryStore, FaceIndex) {
        let dir = TempDir::new().unwrap();
        let store =
            GalleryStore::open(&dir.path().join("images"), &dir.path().join("faces.db")).unwrap();
        (dir, store, FaceIndex::new())
    }

    #[test]
    fn test_rebuild_embeds_every_image() {
        let (_dir, store, index) = setup();
        store.put("alice.jpg", b"alice", false).unwrap();
        store.put("bob.jpg", b"bobby", false).unwrap();

        let mut embedder = StubEmbedder::new();
        let stats = rebuild_from_store(&store, &index, &mut embedder).unwrap();

        assert_eq!(stats.images, 2);
        assert_eq!(stats.faces, 2);
        assert_eq!(stats.embedded, 2);
        assert_eq!(stats.reused, 0);
        assert_eq!(index.current_snapshot().len(), 2);
    }

    #[test]
    fn test_second_rebuild_reuses_cache_and_matches_content() {
        let (_dir, store, index) = setup();
        store.put("alice.jpg", b"alice", false).unwrap();
        store.put("bob.jpg", b"bobby", false).unwrap();

        let mut embedder = StubEmbedder::new();
        rebuild_from_store(&store, &index, &mut embedder).unwrap();
        let first = index.current_snapshot();
        let calls_after_first = embedder.calls;

        let stats = rebuild_from_store(&store, &index, &mut embedder).unwrap();
        let second = index.current_snapshot();

        // Reload idempotence: same entry set, nothing re-embedded.
        assert_eq!(embedder.calls, calls_after_first);
        assert_eq!(stats.reused, 2);
        assert_eq!(stats.embedded, 0);

        let ids = |s: &crate::index::FaceIndexSnapshot| {
            let mut v: Vec<String> = s.entries().iter().map(|e| e.owner_id.clone()).collect();
            v.sort();
            v
        };
        assert_eq!(ids(&first), ids(&second));
        assert!(second.version() > first.version());
    }

    #[test]
    fn test_zero_face_images_are_scanned_but_not_indexed() {
        let (_dir, store, index) = setup();
        store.put("landscape.jpg", b"noface hills", false).unwrap();
        store.put("alice.jpg", b"alice", false).unwrap();

        let mut embedder = StubEmbedder::new();
        let stats = rebuild_from_store(&store, &index, &mut embedder).unwrap();

        assert_eq!(stats.images, 2);
        assert_eq!(stats.faces, 1);
        assert_eq!(index.current_snapshot().len(), 1);

        // The zero-face result is itself cached.
        let infos = store.list().unwrap();
        let landscape = infos.iter().find(|i| i.id == "landscape.jpg").unwrap();
        assert_eq!(landscape.faces, Some(0));
    }

    #[test]
    fn test_failed_embed_aborts_and_keeps_previous_snapshot() {
        let (_dir, store, index) = setup();
        store.put("alice.jpg", b"alice", false).unwrap();

        let mut embedder = StubEmbedder::new();
        rebuild_from_store(&store, &index, &mut embedder).unwrap();
        let before = index.current_snapshot();

        store.put("broken.jpg", b"bad bytes", false).unwrap();
        let err = rebuild_from_store(&store, &index, &mut embedder).unwrap_err();
        assert!(matches!(err, IndexError::Embed { ref id, .. } if id == "broken.jpg"));

        let after = index.current_snapshot();
        assert_eq!(after.version(), before.version());
        assert_eq!(after.len(), before.len());
    }

    #[test]
    fn test_changed_bytes_invalidate_cache() {
        let (_dir, store, index) = setup();
        store.put("alice.jpg", b"alice", false).unwrap();

        let mut embedder = StubEmbedder::new();
        rebuild_from_store(&store, &index, &mut embedder).unwrap();

        store.put("alice.jpg", b"other", true).unwrap();
        let stats = rebuild_from_store(&store, &index, &mut embedder).unwrap();
        assert_eq!(stats.embedded, 1);
        assert_eq!(stats.reused, 0);
    }

    #[test]
    fn test_upload_then_match_roundtrip() {
        let (_dir, store, index) = setup();
        let mut embedder = StubEmbedder::new();

        // Upload flow: embed, persist, cache, incremental add.
        let bytes = b"alice portrait";
        let outcome = embedder.embed(bytes).unwrap();
        store.put("alice.jpg", bytes, false).unwrap();
        store
            .store_embeddings(
                "alice.jpg",
                &GalleryStore::content_hash(bytes),
                embedder.scheme(),
                &outcome.embeddings,
            )
            .unwrap();
        index
            .add("alice.jpg", embedder.scheme(), &outcome.embeddings)
            .unwrap();

        // Recognizing the exact same bytes self-matches at distance ~0.
        let probe = embedder.embed(bytes).unwrap().embeddings.remove(0);
        let snapshot = index.current_snapshot();
        let result = ScanMatcher.best_match(&probe, snapshot.entries(), DEFAULT_MATCH_THRESHOLD);
        assert!(result.matched);
        assert_eq!(result.owner_id.as_deref(), Some("alice.jpg"));
        assert!(result.distance.abs() < 1e-6);

        // And a full rebuild reproduces the same snapshot content from disk.
        let stats = rebuild_from_store(&store, &index, &mut embedder).unwrap();
        assert_eq!(stats.reused, 1);
        let rebuilt = index.current_snapshot();
        let again = ScanMatcher.best_match(&probe, rebuilt.entries(), DEFAULT_MATCH_THRESHOLD);
        assert!(again.matched);
        assert_eq!(again.owner_id.as_deref(), Some("alice.jpg"));
    }
}
