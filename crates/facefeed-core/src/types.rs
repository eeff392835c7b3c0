use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned face rectangle in frame pixel coordinates.
///
/// `(x1, y1)` is the top-left corner and `(x2, y2)` the bottom-right one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Detector score, when the box came from a detector.
    pub confidence: Option<f32>,
    /// Five-point landmarks: left eye, right eye, nose, left and right mouth
    /// corner. Present when the detector model has a keypoint head.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Landmarks>,
}

/// Five `(x, y)` facial keypoints in the same coordinates as their box.
pub type Landmarks = [(f32, f32); 5];

impl FaceBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence: None,
            landmarks: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_landmarks(mut self, landmarks: Landmarks) -> Self {
        self.landmarks = Some(landmarks);
        self
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// A box is usable when every coordinate is finite and it has positive extent.
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2].iter().all(|c| c.is_finite())
            && self.x2 > self.x1
            && self.y2 > self.y1
    }

    /// Multiply every coordinate by `factor` (used to map detection-space boxes
    /// back to full resolution).
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x1: self.x1 * factor,
            y1: self.y1 * factor,
            x2: self.x2 * factor,
            y2: self.y2 * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|points| points.map(|(x, y)| (x * factor, y * factor))),
        }
    }

    /// Grow the box by `padding` pixels on every side and clamp it to a
    /// `width` × `height` frame, snapping to whole pixels.
    ///
    /// Returns `(x, y, w, h)` of the pixel region, or `None` when nothing of
    /// the box survives the clamp.
    pub fn padded_region(&self, padding: u32, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let pad = padding as i64;
        let x1 = (self.x1 as i64 - pad).clamp(0, width as i64);
        let y1 = (self.y1 as i64 - pad).clamp(0, height as i64);
        let x2 = (self.x2 as i64 + pad).clamp(0, width as i64);
        let y2 = (self.y2 as i64 + pad).clamp(0, height as i64);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Only meaningful for embeddings of equal length; callers check the
    /// lengths first. A zero vector on either side yields 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            (dot / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Outcome of matching one face: a catalog identity or the sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Known(String),
    Unrecognized,
}

impl Label {
    pub fn is_known(&self) -> bool {
        matches!(self, Label::Known(_))
    }

    /// Identity name, `None` for the sentinel.
    pub fn name(&self) -> Option<&str> {
        match self {
            Label::Known(name) => Some(name),
            Label::Unrecognized => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Known(name) => f.write_str(name),
            Label::Unrecognized => f.write_str("Unknown"),
        }
    }
}

/// A face box paired with its label, in full-resolution frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub face: FaceBox,
    pub label: Label,
}
