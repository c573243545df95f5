use serde::{Deserialize, Serialize};

/// Dimension of every embedding produced by the active scheme.
pub const EMBEDDING_DIM: usize = 512;

/// Identifier of the embedding scheme (the ArcFace model that produced the
/// vectors). All embeddings within one index snapshot must carry the same
/// scheme; mixing schemes is a configuration error.
pub const EMBEDDING_SCHEME: &str = "w600k_r50";

/// Default maximum cosine distance for two faces to count as the same person.
///
/// The matching metric is cosine distance, `1 - a·b` over L2-normalized
/// vectors, so this cutoff of 0.6 admits pairs with cosine similarity of at
/// least 0.4. Callers may override it per request.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Region of a detected face within an image, in source pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// An L2-normalized face embedding vector.
///
/// The only way to build one is [`Embedding::from_raw`], which normalizes,
/// so every stored or compared vector satisfies `‖v‖ = 1` (a zero input
/// stays zero and compares as maximally distant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Build an embedding from a raw model output, L2-normalizing it.
    pub fn from_raw(mut values: Vec<f32>) -> Self {
        let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut values {
                *x /= norm;
            }
        }
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Cosine distance to another embedding: `1 - a·b`.
    ///
    /// Both vectors are unit-length by construction, so the dot product is
    /// the cosine similarity and the result lies in `[0, 2]` (0 = identical
    /// direction, 2 = opposite). Mismatched dimensions compare as maximally
    /// distant rather than panicking; the index never stores mixed
    /// dimensions, so that path only guards against caller error.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return 2.0;
        }
        let dot: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum();
        1.0 - dot
    }
}

/// One gallery entry as held by an index snapshot.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub owner_id: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Gallery id of the best match, present only when `matched`.
    pub owner_id: Option<String>,
    /// Cosine distance of the closest entry; `+∞` for an empty snapshot.
    /// Reported even on a non-match, for diagnostics.
    pub distance: f32,
    /// The threshold the decision was made against.
    pub threshold: f32,
}
