//! Face detection / embedding capability boundary.
//!
//! The pipeline and the catalog only see [`FaceGateway`]; the ONNX-backed
//! [`OnnxGateway`] is the production implementation.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Embedding, FaceBox};
use image::RgbImage;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("no face found in image")]
    NoFace,
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Image → face boxes, face crop → embedding.
///
/// Both calls are synchronous and may be expensive. Implementations must be
/// callable from several worker threads at once.
pub trait FaceGateway: Send + Sync {
    /// Boxes of every face in `image`, most confident first. No face is an
    /// empty vector, not an error.
    fn detect_boxes(&self, image: &RgbImage) -> Result<Vec<FaceBox>, GatewayError>;

    /// Embedding of the single face in `crop`; [`GatewayError::NoFace`] when
    /// the crop holds none.
    fn embed(&self, crop: &RgbImage) -> Result<Embedding, GatewayError>;
}

/// Fixed set of interchangeable model instances.
///
/// ONNX sessions need `&mut` to run, so each instance sits behind its own
/// lock and callers take whichever is free.
struct InstancePool<T> {
    slots: Vec<Mutex<T>>,
    next: AtomicUsize,
}

impl<T> InstancePool<T> {
    fn new(slots: Vec<T>) -> Self {
        Self {
            slots: slots.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        for slot in &self.slots {
            if let Some(mut guard) = slot.try_lock() {
                return f(&mut *guard);
            }
        }
        // All busy: queue on the next slot in rotation.
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut guard = self.slots[idx].lock();
        f(&mut *guard)
    }
}

/// SCRFD detection + ArcFace embedding via ONNX Runtime.
pub struct OnnxGateway {
    detectors: InstancePool<FaceDetector>,
    recognizers: InstancePool<FaceRecognizer>,
}

impl OnnxGateway {
    /// Load `sessions` copies of each model (at least one).
    pub fn load(scrfd_path: &Path, arcface_path: &Path, sessions: usize) -> Result<Self, GatewayError> {
        let sessions = sessions.max(1);
        let detectors = (0..sessions)
            .map(|_| FaceDetector::load(scrfd_path))
            .collect::<Result<Vec<_>, _>>()?;
        let recognizers = (0..sessions)
            .map(|_| FaceRecognizer::load(arcface_path))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(sessions, "ONNX face gateway ready");

        Ok(Self {
            detectors: InstancePool::new(detectors),
            recognizers: InstancePool::new(recognizers),
        })
    }
}

impl FaceGateway for OnnxGateway {
    fn detect_boxes(&self, image: &RgbImage) -> Result<Vec<FaceBox>, GatewayError> {
        Ok(self.detectors.with(|d| d.detect(image))?)
    }

    /// Re-detects inside `crop` and embeds the most confident face, aligned
    /// on its landmarks when the detector provides them.
    fn embed(&self, crop: &RgbImage) -> Result<Embedding, GatewayError> {
        let faces = self.detect_boxes(crop)?;
        let face = faces.first().ok_or(GatewayError::NoFace)?;
        Ok(self.recognizers.with(|r| r.extract(crop, face))?)
    }
}
