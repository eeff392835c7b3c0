//! Five-point face alignment for ArcFace.
//!
//! Fits a similarity transform (uniform scale, rotation, translation) that
//! carries the detected landmarks onto the canonical ArcFace template, then
//! warps the RGB image into the 112x112 model input.

use crate::types::Landmarks;
use image::{Rgb, RgbImage};

/// Canonical landmark positions inside a 112x112 ArcFace crop.
const ARCFACE_TEMPLATE: Landmarks = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub const ALIGNED_SIZE: u32 = 112;

/// `dst = [a -b; b a] * src + (tx, ty)`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit from `src` onto `dst`. `None` when the source points
    /// all coincide.
    fn estimate(src: &Landmarks, dst: &Landmarks) -> Option<Self> {
        let centroid = |pts: &Landmarks| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
            (sx / pts.len() as f32, sy / pts.len() as f32)
        };
        let (msx, msy) = centroid(src);
        let (mdx, mdy) = centroid(dst);

        let (mut norm, mut dot, mut cross) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            norm += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }
        if !norm.is_finite() || norm < 1e-6 {
            return None;
        }

        let a = dot / norm;
        let b = cross / norm;
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    #[cfg(test)]
    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    /// Map a destination pixel back into the source image.
    fn invert(&self, (x, y): (f32, f32)) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some(((self.a * dx + self.b * dy) / det, (self.a * dy - self.b * dx) / det))
    }
}

/// Bilinear sample of `image` at `(x, y)`; pixels outside read as black.
fn sample(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let at = |px: i64, py: i64| -> [f32; 3] {
        if px < 0 || py < 0 || px >= image.width() as i64 || py >= image.height() as i64 {
            return [0.0; 3];
        }
        image.get_pixel(px as u32, py as u32).0.map(f32::from)
    };

    let corners = [
        (at(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (at(x0 + 1, y0), fx * (1.0 - fy)),
        (at(x0, y0 + 1), (1.0 - fx) * fy),
        (at(x0 + 1, y0 + 1), fx * fy),
    ];
    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let v: f32 = corners.iter().map(|(px, w)| px[c] * w).sum();
        *value = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Warp the face described by `landmarks` into a 112x112 ArcFace crop.
///
/// Returns `None` for degenerate landmarks.
pub fn align_face(image: &RgbImage, landmarks: &Landmarks) -> Option<RgbImage> {
    let transform = Similarity::estimate(landmarks, &ARCFACE_TEMPLATE)?;

    let mut aligned = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    for (ox, oy, pixel) in aligned.enumerate_pixels_mut() {
        let (sx, sy) = transform.invert((ox as f32, oy as f32))?;
        *pixel = sample(image, sx, sy);
    }
    Some(aligned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_template_onto_itself_is_identity() {
        let t = Similarity::estimate(&ARCFACE_TEMPLATE, &ARCFACE_TEMPLATE).unwrap();
        assert!(close(t.a, 1.0, 1e-4), "a = {}", t.a);
        assert!(close(t.b, 0.0, 1e-4), "b = {}", t.b);
        assert!(close(t.tx, 0.0, 1e-3) && close(t.ty, 0.0, 1e-3));
    }

    #[test]
    fn test_double_size_face_halves_scale() {
        let src = ARCFACE_TEMPLATE.map(|(x, y)| (x * 2.0 + 30.0, y * 2.0 + 10.0));
        let t = Similarity::estimate(&src, &ARCFACE_TEMPLATE).unwrap();
        assert!(close(t.a, 0.5, 1e-4), "a = {}", t.a);
        for (s, d) in src.iter().zip(&ARCFACE_TEMPLATE) {
            let (x, y) = t.apply(*s);
            assert!(close(x, d.0, 1e-2) && close(y, d.1, 1e-2));
        }
    }

    #[test]
    fn test_rotated_face_is_turned_upright() {
        // Template rotated 90 degrees about the origin: (x, y) -> (-y, x).
        let src = ARCFACE_TEMPLATE.map(|(x, y)| (-y, x));
        let t = Similarity::estimate(&src, &ARCFACE_TEMPLATE).unwrap();
        assert!(close(t.a, 0.0, 1e-4));
        assert!(close(t.b, -1.0, 1e-4));
        let back = t.invert(ARCFACE_TEMPLATE[0]).unwrap();
        assert!(close(back.0, src[0].0, 1e-2) && close(back.1, src[0].1, 1e-2));
    }

    #[test]
    fn test_coincident_landmarks_are_rejected() {
        let image = RgbImage::new(50, 50);
        assert!(align_face(&image, &[(10.0, 10.0); 5]).is_none());
    }

    #[test]
    fn test_left_eye_lands_on_template() {
        let mut image = RgbImage::new(200, 200);
        let src: Landmarks = [(80.0, 60.0), (120.0, 60.0), (100.0, 85.0), (85.0, 110.0), (115.0, 110.0)];
        for y in 58..63 {
            for x in 78..83 {
                image.put_pixel(x, y, Rgb([0, 255, 0]));
            }
        }

        let aligned = align_face(&image, &src).unwrap();
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));

        let (ex, ey) = (ARCFACE_TEMPLATE[0].0.round() as u32, ARCFACE_TEMPLATE[0].1.round() as u32);
        let brightest = (ey - 1..=ey + 1)
            .flat_map(|y| (ex - 1..=ex + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y)[1])
            .max()
            .unwrap();
        assert!(brightest > 100, "green patch missing near ({ex}, {ey}): {brightest}");
        assert_eq!(aligned.get_pixel(ex, ey)[0], 0);
    }

    #[test]
    fn test_outside_source_is_black() {
        let image = RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]));
        assert_eq!(sample(&image, -5.0, 1.0), Rgb([0, 0, 0]));
        assert_eq!(sample(&image, 1.0, 1.0), Rgb([255, 255, 255]));
        assert_eq!(sample(&image, 1.5, 1.0), Rgb([255, 255, 255]));
    }
}
