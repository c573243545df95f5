//! veriface-store — durable gallery storage and the in-memory face index.
//!
//! [`GalleryStore`] owns the filename-keyed image files and the SQLite
//! embedding cache; [`FaceIndex`] owns the published snapshot the matchers
//! read. [`rebuild_from_store`] connects the two: a full scan, cache-aware
//! re-embedding, and an atomic snapshot swap.

pub mod gallery;
pub mod index;
pub mod rebuild;

pub use gallery::{
    CachedFaces, GalleryStore, ImageInfo, ImageRecord, ScanRecord, StoreError, ALLOWED_EXTENSIONS,
};
pub use index::{EmbeddedRecord, FaceIndex, FaceIndexSnapshot, IndexError};
pub use rebuild::{rebuild_from_store, RebuildStats};
