//! ArcFace embedding extraction via ONNX Runtime.
//!
//! Produces 512-dimensional L2-normalized embeddings from face crops using
//! the w600k_r50 ArcFace model. Crops are taken straight from the detection
//! box, expanded by a margin, and resized to the model input.

use crate::types::{Embedding, FaceBox, EMBEDDING_DIM};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMB_INPUT_SIZE: u32 = 112;
const EMB_MEAN: f32 = 127.5;
const EMB_STD: f32 = 127.5; // symmetric normalization, unlike the detector
/// Fraction of the box size added on every side before cropping, so the
/// model sees some context around the detected face.
const CROP_MARGIN: f32 = 0.2;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — download w600k_r50.onnx from insightface and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based embedding extractor.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded face embedding model");

        Ok(Self { session })
    }

    /// Extract an embedding for one detected face.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: &FaceBox,
    ) -> Result<Embedding, RecognizerError> {
        let crop = crop_face(image, face);
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::from_raw(raw.to_vec()))
    }
}

/// Cut the face region out of the source image, expanded by [`CROP_MARGIN`]
/// and clamped to the image bounds.
fn crop_face(image: &RgbImage, face: &FaceBox) -> RgbImage {
    let margin_x = face.width * CROP_MARGIN;
    let margin_y = face.height * CROP_MARGIN;

    let x0 = (face.x - margin_x).max(0.0).floor() as u32;
    let y0 = (face.y - margin_y).max(0.0).floor() as u32;
    let x1 = ((face.x + face.width + margin_x).ceil() as u32).min(image.width());
    let y1 = ((face.y + face.height + margin_y).ceil() as u32).min(image.height());

    let w = x1.saturating_sub(x0).max(1);
    let h = y1.saturating_sub(y0).max(1);

    image::imageops::crop_imm(image, x0, y0, w, h).to_image()
}

/// Resize a crop to the model input and lay it out as an NCHW float tensor.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(crop, EMB_INPUT_SIZE, EMB_INPUT_SIZE, FilterType::Triangle);

    let size = EMB_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        tensor[[0, 0, y as usize, x as usize]] = (r as f32 - EMB_MEAN) / EMB_STD;
        tensor[[0, 1, y as usize, x as usize]] = (g as f32 - EMB_MEAN) / EMB_STD;
        tensor[[0, 2, y as usize, x as usize]] = (b as f32 - EMB_MEAN) / EMB_STD;
    }
    tensor
}
