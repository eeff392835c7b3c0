//! ArcFace face recognizer via ONNX Runtime.
//!
//! Aligns the detected face to the 112x112 ArcFace template using its five
//! landmarks and returns the L2-normalized 512-dimensional embedding. Faces
//! without landmarks are cropped and resized instead.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{Embedding, FaceBox};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = ALIGNED_SIZE;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD
const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box {0:?} lies outside the image")]
    EmptyCrop(FaceBox),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Extract the embedding of `face` within `image`.
    pub fn extract(&mut self, image: &RgbImage, face: &FaceBox) -> Result<Embedding, RecognizerError> {
        let input = preprocess(&face_input(image, face)?);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// The 112x112 model input for `face`: landmark-aligned when possible,
/// otherwise the box crop stretched to size.
fn face_input(image: &RgbImage, face: &FaceBox) -> Result<RgbImage, RecognizerError> {
    if let Some(aligned) = face.landmarks.and_then(|points| alignment::align_face(image, &points)) {
        return Ok(aligned);
    }
    tracing::debug!(?face, "embedding face without alignment");

    let (x, y, w, h) = face
        .padded_region(0, image.width(), image.height())
        .ok_or(RecognizerError::EmptyCrop(*face))?;
    let crop = imageops::crop_imm(image, x, y, w, h).to_image();
    Ok(imageops::resize(&crop, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle))
}

/// Normalize a 112x112 face into a NCHW RGB tensor.
fn preprocess(face: &RgbImage) -> Array4<f32> {
    let side = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in face.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x >= side || y >= side {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, y, x]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}
