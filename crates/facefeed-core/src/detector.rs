//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the RGB frame into the 640x640 model input, decodes the three
//! anchor-free stride heads (with the five-point keypoint head when the model
//! has one) and merges them with NMS.

use crate::types::{FaceBox, Landmarks};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Where the source image landed inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let size = SCRFD_INPUT_SIZE as f32;
        let scale = (size / width as f32).min(size / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((size - new_w) / 2.0).floor(),
            pad_y: ((size - new_h) / 2.0).floor(),
        }
    }

    /// Map a point from model-input space back to source-image space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output slots of the score, bbox and optional keypoint tensors for one stride.
type StrideOutputs = (usize, usize, Option<usize>);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    stride_outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let stride_outputs = map_stride_outputs(&output_names);
        let landmarks = stride_outputs.iter().all(|(_, _, kps)| kps.is_some());
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?stride_outputs,
            landmarks,
            "loaded SCRFD model"
        );
        if !landmarks {
            tracing::warn!("SCRFD model has no keypoint head, faces will be embedded unaligned");
        }

        Ok(Self { session, stride_outputs })
    }

    /// Detect faces in an RGB image, most confident first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let letterbox = Letterbox::fit(image.width(), image.height());
        let input = preprocess(image, &letterbox);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_outputs[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let kps = match kps_idx {
                Some(idx) => Some(
                    outputs[idx]
                        .try_extract_tensor::<f32>()
                        .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?
                        .1,
                ),
                None => None,
            };

            candidates.extend(decode_stride(
                StrideHeads { scores, bboxes, kps },
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let width = image.width() as f32;
        let height = image.height() as f32;
        Ok(nms(candidates, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .map(|b| FaceBox {
                x1: b.x1.clamp(0.0, width),
                y1: b.y1.clamp(0.0, height),
                x2: b.x2.clamp(0.0, width),
                y2: b.y2.clamp(0.0, height),
                ..b
            })
            .filter(FaceBox::is_valid)
            .collect())
    }
}

/// Resize into the letterbox and normalize into a NCHW RGB tensor.
fn preprocess(image: &RgbImage, letterbox: &Letterbox) -> Array4<f32> {
    let size = SCRFD_INPUT_SIZE;
    let new_w = ((image.width() as f32 * letterbox.scale).round() as u32).clamp(1, size);
    let new_h = ((image.height() as f32 * letterbox.scale).round() as u32).clamp(1, size);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    // Padding with the mean normalizes to 0.0.
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([SCRFD_MEAN as u8; 3]));
    imageops::replace(&mut canvas, &resized, letterbox.pad_x as i64, letterbox.pad_y as i64);

    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }
    tensor
}

/// Resolve which output tensors carry scores and boxes for each stride.
///
/// Exports either name them `score_8`, `bbox_16`, `kps_32`, ... or use
/// opaque numeric names in the standard order
/// `[scores 8/16/32, bboxes 8/16/32, kps 8/16/32]`. Models without the
/// keypoint head have six outputs and yield no landmarks.
fn map_stride_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let mut named = [(0, 0, None); 3];
    for (i, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride)) {
            (Some(score), Some(bbox)) => named[i] = (score, bbox, find("kps", stride)),
            _ => {
                let has_kps = names.len() >= 9;
                return [0, 1, 2].map(|i| (i, i + 3, has_kps.then_some(i + 6)));
            }
        }
    }
    named
}

/// Raw head outputs of one stride.
struct StrideHeads<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: Option<&'a [f32]>,
}

/// Decode the anchors of one stride whose score clears `threshold`.
fn decode_stride(
    heads: StrideHeads<'_>,
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<FaceBox> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *heads.scores.get(idx)?;
            if score <= threshold {
                return None;
            }
            let offsets = heads.bboxes.get(idx * 4..idx * 4 + 4)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * step;
            let cy = (cell / grid) as f32 * step;

            let (x1, y1) = letterbox.unmap(cx - offsets[0] * step, cy - offsets[1] * step);
            let (x2, y2) = letterbox.unmap(cx + offsets[2] * step, cy + offsets[3] * step);
            let face = FaceBox::new(x1, y1, x2, y2).with_confidence(score);

            let landmarks = heads
                .kps
                .and_then(|kps| kps.get(idx * 10..idx * 10 + 10))
                .map(|points| {
                    let mut out: Landmarks = [(0.0, 0.0); 5];
                    for (i, point) in out.iter_mut().enumerate() {
                        *point = letterbox.unmap(cx + points[i * 2] * step, cy + points[i * 2 + 1] * step);
                    }
                    out
                });
            Some(match landmarks {
                Some(points) => face.with_landmarks(points),
                None => face,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression, highest confidence first.
fn nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| {
        b.confidence
            .unwrap_or(0.0)
            .partial_cmp(&a.confidence.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union of two boxes.
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width() * a.height() + b.width() * b.height() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
