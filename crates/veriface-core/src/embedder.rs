//! The embedder contract: raw image bytes in, face embeddings out.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Embedding, FaceBox, EMBEDDING_DIM, EMBEDDING_SCHEME};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// File name of the detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the embedding model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EmbedError {
    /// The input could not be decoded as an image. A client error, never
    /// produced for a valid image that merely contains no face.
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Everything one embed call found: a box and an embedding per face, both
/// ordered by detection confidence descending. Zero faces is a valid
/// outcome, not an error.
#[derive(Debug, Clone)]
pub struct EmbedOutcome {
    pub faces: Vec<FaceBox>,
    pub embeddings: Vec<Embedding>,
}

impl EmbedOutcome {
    pub fn faces_detected(&self) -> usize {
        self.faces.len()
    }
}

/// Converts raw image bytes into face embeddings.
///
/// A pure transformation over its input: implementations hold model state
/// but no request state, so one embedder can serve any sequence of calls.
/// `scheme` and `dim` identify the embedding space so index code can refuse
/// to mix incompatible vectors.
pub trait Embedder: Send {
    fn scheme(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed(&mut self, image_bytes: &[u8]) -> Result<EmbedOutcome, EmbedError>;
}

/// Decode uploaded bytes into an RGB image, mapping any decode failure to
/// [`EmbedError::InvalidImage`].
pub(crate) fn decode_image(bytes: &[u8]) -> Result<RgbImage, EmbedError> {
    image::load_from_memory(bytes)
        .map(|decoded| decoded.to_rgb8())
        .map_err(|e| EmbedError::InvalidImage(e.to_string()))
}

/// ONNX-backed embedder: SCRFD detection followed by ArcFace extraction for
/// every detected face.
pub struct OnnxEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEmbedder {
    /// Load both models from `model_dir`, failing fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, EmbedError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl Embedder for OnnxEmbedder {
    fn scheme(&self) -> &str {
        EMBEDDING_SCHEME
    }

    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }

    fn embed(&mut self, image_bytes: &[u8]) -> Result<EmbedOutcome, EmbedError> {
        let image = decode_image(image_bytes)?;
        let faces = self.detector.detect(&image)?;

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in &faces {
            embeddings.push(self.recognizer.extract(&image, face)?);
        }

        tracing::debug!(
            faces = faces.len(),
            width = image.width(),
            height = image.height(),
            "embedded probe image"
        );

        Ok(EmbedOutcome { faces, embeddings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([90, 120, 150]));
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .expect("png encode");
        buf.into_inner()
    }

    #[test]
    fn test_decode_valid_png() {
        let image = decode_image(&png_bytes(16, 9)).expect("should decode");
        assert_eq!((image.width(), image.height()), (16, 9));
    }

    #[test]
    fn test_decode_garbage_is_invalid_image() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, EmbedError::InvalidImage(_)));
    }

    #[test]
    fn test_decode_truncated_png_is_invalid_image() {
        let mut bytes = png_bytes(32, 32);
        bytes.truncate(bytes.len() / 4);
        let err = decode_image(&bytes).unwrap_err();
        assert!(matches!(err, EmbedError::InvalidImage(_)));
    }

    #[test]
    fn test_decode_empty_input_is_invalid_image() {
        let err = decode_image(&[]).unwrap_err();
        assert!(matches!(err, EmbedError::InvalidImage(_)));
    }
}
