use serde::{Deserialize, Serialize};
use veriface_core::{FaceBox, MatchResult};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub indexed_faces: usize,
    pub snapshot_version: u64,
}

#[derive(Serialize)]
pub struct ImageItem {
    pub filename: String,
    /// Cached face count; null until the entry has been embedded.
    pub faces: Option<usize>,
}

#[derive(Serialize)]
pub struct ImagesResponse {
    pub images: Vec<ImageItem>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub faces: usize,
}

/// Per-face recognition outcome: where the face is and what it matched.
#[derive(Serialize)]
pub struct FaceMatch {
    pub matched: bool,
    /// Gallery filename of the best match, present only on a match.
    pub filename: Option<String>,
    /// Closest cosine distance found. Serializes as null for an empty
    /// gallery (the distance is infinite).
    pub distance: f32,
    pub threshold: f32,
    #[serde(rename = "box")]
    pub face_box: FaceBox,
}

impl FaceMatch {
    pub fn new(result: MatchResult, face_box: FaceBox) -> Self {
        Self {
            matched: result.matched,
            filename: result.owner_id,
            distance: result.distance,
            threshold: result.threshold,
            face_box,
        }
    }
}

#[derive(Serialize)]
pub struct RecognizeResponse {
    pub faces_detected: usize,
    pub results: Vec<FaceMatch>,
}

#[derive(Deserialize)]
pub struct CompareRequest {
    pub a: String,
    pub b: String,
    pub threshold: Option<f32>,
}

#[derive(Serialize)]
pub struct CompareResponse {
    pub a: String,
    pub b: String,
    pub matched: bool,
    pub distance: f32,
    pub threshold: f32,
}
