//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the SCRFD anchor-free detector over decoded photos: letterbox resize
//! to the model input, per-stride score/box decoding, then NMS. Landmarks are
//! not decoded; the recognizer works from the detection box alone.

use crate::types::FaceBox;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DET_INPUT_SIZE: u32 = 640;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DET_NMS_IOU: f32 = 0.4;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;
/// Detections smaller than this many pixels on either side are discarded.
const DET_MIN_FACE_PX: f32 = 8.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Per-stride output tensor indices: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Score/box output indices for strides [8, 16, 32], discovered by name
    /// at load time with a positional fallback.
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded face detection model"
        );

        // Score and box tensors for three strides; landmark outputs, when the
        // export carries them, are simply ignored.
        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "detection model needs at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "detection output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect faces in a decoded image, returning boxes in source pixel
    /// coordinates, sorted by confidence descending.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>, DetectorError> {
        let (input, scale) = preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (pos, &stride) in DET_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("boxes stride {stride}: {e}")))?;

            decode_stride(
                scores,
                boxes,
                stride,
                scale,
                image.width() as f32,
                image.height() as f32,
                DET_CONFIDENCE_THRESHOLD,
                &mut detections,
            );
        }

        let mut kept = nms(detections, DET_NMS_IOU);
        kept.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(kept)
    }
}

/// Letterbox an image into the square model input.
///
/// The image is scaled to fit and anchored at the top-left; the remainder is
/// padding at the normalized mean, i.e. zero in tensor space. Channels are
/// fed in BGR order, which is what the InsightFace exports expect. Returns
/// the tensor and the scale factor for mapping detections back to source
/// coordinates.
fn preprocess(image: &RgbImage) -> (Array4<f32>, f32) {
    let side = DET_INPUT_SIZE as f32;
    let scale = side / image.width().max(image.height()).max(1) as f32;
    let new_w = ((image.width() as f32 * scale).round() as u32).clamp(1, DET_INPUT_SIZE);
    let new_h = ((image.height() as f32 * scale).round() as u32).clamp(1, DET_INPUT_SIZE);

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = DET_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        tensor[[0, 0, y as usize, x as usize]] = (b as f32 - DET_MEAN) / DET_STD;
        tensor[[0, 1, y as usize, x as usize]] = (g as f32 - DET_MEAN) / DET_STD;
        tensor[[0, 2, y as usize, x as usize]] = (r as f32 - DET_MEAN) / DET_STD;
    }

    (tensor, scale)
}

/// Discover score/box output ordering by tensor name.
///
/// Exports name the tensors either as "score_8"/"bbox_8" etc. or generically
/// ("443", "444", ...). When names are not recognized, fall back to the
/// standard positional layout: scores for strides 8/16/32 first, then boxes.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named = DET_STRIDES
        .iter()
        .all(|&stride| find("score", stride).is_some() && find("bbox", stride).is_some());

    if named {
        std::array::from_fn(|i| {
            let stride = DET_STRIDES[i];
            // Both lookups succeeded above for every stride.
            (
                find("score", stride).unwrap(),
                find("bbox", stride).unwrap(),
            )
        })
    } else {
        tracing::info!(
            ?names,
            "detection output names not recognized, using positional mapping [0-2]=scores, [3-5]=boxes"
        );
        [(0, 3), (1, 4), (2, 5)]
    }
}

/// Decode detections for one stride level into `out`.
///
/// SCRFD predicts, per anchor, a face score and box offsets
/// [left, top, right, bottom] in stride units from the anchor center.
#[allow(clippy::too_many_arguments)]
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    scale: f32,
    img_w: f32,
    img_h: f32,
    threshold: f32,
    out: &mut Vec<FaceBox>,
) {
    let grid = DET_INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * DET_ANCHORS_PER_CELL;

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let cell = idx / DET_ANCHORS_PER_CELL;
        let anchor_cx = (cell % grid) as f32 * stride as f32;
        let anchor_cy = (cell / grid) as f32 * stride as f32;

        let off = idx * 4;
        if off + 3 >= boxes.len() {
            continue;
        }
        let x1 = anchor_cx - boxes[off] * stride as f32;
        let y1 = anchor_cy - boxes[off + 1] * stride as f32;
        let x2 = anchor_cx + boxes[off + 2] * stride as f32;
        let y2 = anchor_cy + boxes[off + 3] * stride as f32;

        // Map from letterboxed space back to source pixels and clamp.
        let x1 = (x1 / scale).clamp(0.0, img_w);
        let y1 = (y1 / scale).clamp(0.0, img_h);
        let x2 = (x2 / scale).clamp(0.0, img_w);
        let y2 = (y2 / scale).clamp(0.0, img_h);

        let width = x2 - x1;
        let height = y2 - y1;
        if width < DET_MIN_FACE_PX || height < DET_MIN_FACE_PX {
            continue;
        }

        out.push(FaceBox {
            x: x1,
            y: y1,
            width,
            height,
            confidence: score,
        });
    }
}

/// Non-Maximum Suppression: drop detections overlapping a stronger one.
fn nms(mut detections: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union of two face boxes.
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(x: f32, y: f32, w: f32, h: f32, conf: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_box(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = make_box(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_box(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = make_box(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_box(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap 5x10 = 50, union 150.
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_box(0.0, 0.0, 100.0, 100.0, 0.9),
            make_box(5.0, 5.0, 100.0, 100.0, 0.8),
            make_box(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let kept = nms(detections, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_disjoint() {
        let detections = vec![
            make_box(0.0, 0.0, 10.0, 10.0, 0.9),
            make_box(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        assert_eq!(nms(detections, 0.4).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_preprocess_scale_and_shape() {
        let image = RgbImage::from_pixel(320, 240, image::Rgb([128, 128, 128]));
        let (tensor, scale) = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((scale - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        // 100x50 scales to 640x320; everything below row 320 is padding.
        let image = RgbImage::from_pixel(100, 50, image::Rgb([200, 200, 200]));
        let (tensor, _) = preprocess(&image);
        assert_eq!(tensor[[0, 0, 400, 0]], 0.0);
        assert_eq!(tensor[[0, 2, 639, 639]], 0.0);
        // The image area itself is not zero.
        assert!(tensor[[0, 0, 10, 10]].abs() > 0.1);
    }

    #[test]
    fn test_preprocess_bgr_channel_order() {
        let image = RgbImage::from_pixel(64, 64, image::Rgb([255, 0, 0]));
        let (tensor, _) = preprocess(&image);
        // Channel 0 is blue (0), channel 2 is red (255).
        assert!(tensor[[0, 0, 0, 0]] < 0.0);
        assert!(tensor[[0, 2, 0, 0]] > 0.0);
    }

    #[test]
    fn test_decode_stride_box_math() {
        // One anchor above threshold at cell (1, 1) of the stride-32 grid.
        let grid = 640 / 32;
        let num_anchors = grid * grid * DET_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; num_anchors];
        let mut boxes = vec![0.0f32; num_anchors * 4];

        let cell = grid + 1; // row 1, col 1
        let idx = cell * DET_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        // Offsets of one stride unit on every side → a 64x64 box centered on
        // the anchor at (32, 32).
        boxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let mut out = Vec::new();
        decode_stride(&scores, &boxes, 32, 1.0, 640.0, 640.0, 0.5, &mut out);

        assert_eq!(out.len(), 1);
        let face = &out[0];
        assert!((face.x - 0.0).abs() < 1e-4);
        assert!((face.y - 0.0).abs() < 1e-4);
        assert!((face.width - 64.0).abs() < 1e-4);
        assert!((face.height - 64.0).abs() < 1e-4);
        assert!((face.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_respects_scale() {
        let grid = 640 / 32;
        let num_anchors = grid * grid * DET_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; num_anchors];
        let mut boxes = vec![0.0f32; num_anchors * 4];
        let idx = (grid + 1) * DET_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        boxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        // A source image letterboxed at 2x: coordinates halve on the way back.
        let mut out = Vec::new();
        decode_stride(&scores, &boxes, 32, 2.0, 320.0, 320.0, 0.5, &mut out);
        assert_eq!(out.len(), 1);
        assert!((out[0].width - 32.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_drops_tiny_boxes() {
        let grid = 640 / 8;
        let num_anchors = grid * grid * DET_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; num_anchors];
        let mut boxes = vec![0.0f32; num_anchors * 4];
        scores[0] = 0.9;
        // 0.2 stride units on each side → a ~3px box, below the minimum.
        boxes[0..4].copy_from_slice(&[0.2, 0.2, 0.2, 0.2]);

        let mut out = Vec::new();
        decode_stride(&scores, &boxes, 8, 1.0, 640.0, 640.0, 0.5, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        let names: Vec<String> = [
            "bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(1, 0), (3, 2), (5, 4)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        // Generic numeric names, as in the 9-output export with landmarks.
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(0, 3), (1, 4), (2, 5)]);
    }
}
