//! Draw recognition results onto a frame.
//!
//! Boxes and label plates are painted on a copy of the frame which is then
//! alpha-blended over the original, so overlapping annotations stay legible.

use crate::types::{Label, RecognitionResult};
use font8x8::UnicodeFonts;
use image::{Rgb, RgbImage};

pub const SUCCESS_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const WARNING_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const PLATE_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Weight of the annotated copy in the final blend.
pub const OVERLAY_ALPHA: f32 = 0.4;
const LINE_THICKNESS: i64 = 2;
const LABEL_OFFSET: i64 = 15;
const PLATE_PADDING: i64 = 5;
const GLYPH_BITS: i64 = 8;
/// Glyph height in pixels at font scale 1.0.
const BASE_GLYPH_PX: f32 = 16.0;

/// Font scale for a box of the given height, clamped to [0.7, 1.2].
pub fn font_scale(box_height: f32) -> f32 {
    (box_height / 150.0).clamp(0.7, 1.2)
}

/// Return `frame` with every result drawn on it.
pub fn annotate(frame: &RgbImage, results: &[RecognitionResult]) -> RgbImage {
    let mut overlay = frame.clone();
    for result in results {
        draw_result(&mut overlay, result);
    }
    blend(frame, &overlay, OVERLAY_ALPHA)
}

fn draw_result(canvas: &mut RgbImage, result: &RecognitionResult) {
    let color = match result.label {
        Label::Unrecognized => WARNING_COLOR,
        Label::Known(_) => SUCCESS_COLOR,
    };
    let face = &result.face;
    let (x1, y1, x2, y2) = (face.x1 as i64, face.y1 as i64, face.x2 as i64, face.y2 as i64);

    stroke_rect(canvas, x1, y1, x2, y2, color);

    let text = result.label.to_string();
    let cell = ((BASE_GLYPH_PX * font_scale(face.height())).round() as i64).max(GLYPH_BITS);
    let text_w = cell * text.chars().count() as i64;
    let text_h = cell;

    // Baseline above the box when it fits, otherwise below.
    let text_x = x1;
    let text_y = if y1 > text_h + LABEL_OFFSET {
        y1 - LABEL_OFFSET
    } else {
        y2 + text_h + LABEL_OFFSET
    };

    fill_rect(
        canvas,
        text_x - PLATE_PADDING,
        text_y - text_h - PLATE_PADDING,
        text_x + text_w + PLATE_PADDING,
        text_y + PLATE_PADDING,
        PLATE_COLOR,
    );
    draw_text(canvas, &text, text_x, text_y - text_h, cell);
}

/// Outline of `[x1, x2) × [y1, y2)`, drawn inward.
fn stroke_rect(canvas: &mut RgbImage, x1: i64, y1: i64, x2: i64, y2: i64, color: Rgb<u8>) {
    let t = LINE_THICKNESS;
    fill_rect(canvas, x1, y1, x2, y1 + t, color);
    fill_rect(canvas, x1, y2 - t, x2, y2, color);
    fill_rect(canvas, x1, y1, x1 + t, y2, color);
    fill_rect(canvas, x2 - t, y1, x2, y2, color);
}

/// Fill `[x1, x2) × [y1, y2)`, clipped to the canvas.
fn fill_rect(canvas: &mut RgbImage, x1: i64, y1: i64, x2: i64, y2: i64, color: Rgb<u8>) {
    let (w, h) = (canvas.width() as i64, canvas.height() as i64);
    for y in y1.max(0)..y2.min(h) {
        for x in x1.max(0)..x2.min(w) {
            canvas.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// Render `text` with the 8x8 bitmap font scaled to `cell` pixels, top-left at `(x, y)`.
fn draw_text(canvas: &mut RgbImage, text: &str, x: i64, y: i64, cell: i64) {
    let (w, h) = (canvas.width() as i64, canvas.height() as i64);
    for (i, ch) in text.chars().enumerate() {
        let glyph = font8x8::BASIC_FONTS
            .get(ch)
            .or_else(|| font8x8::BASIC_FONTS.get('?'))
            .unwrap_or([0; 8]);
        let origin_x = x + i as i64 * cell;

        for py in 0..cell {
            let row = glyph[(py * GLYPH_BITS / cell) as usize];
            for px in 0..cell {
                let bit = px * GLYPH_BITS / cell;
                if row & (1 << bit) == 0 {
                    continue;
                }
                let (cx, cy) = (origin_x + px, y + py);
                if (0..w).contains(&cx) && (0..h).contains(&cy) {
                    canvas.put_pixel(cx as u32, cy as u32, TEXT_COLOR);
                }
            }
        }
    }
}

/// `alpha * overlay + (1 - alpha) * base`, per channel.
fn blend(base: &RgbImage, overlay: &RgbImage, alpha: f32) -> RgbImage {
    let mut out = base.clone();
    for (dst, src) in out.pixels_mut().zip(overlay.pixels()) {
        for c in 0..3 {
            let mixed = src[c] as f32 * alpha + dst[c] as f32 * (1.0 - alpha);
            dst[c] = mixed.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FaceBox;

    fn black(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([0, 0, 0]))
    }

    fn result(label: Label, x1: f32, y1: f32, x2: f32, y2: f32) -> RecognitionResult {
        RecognitionResult { face: FaceBox::new(x1, y1, x2, y2), label }
    }

    #[test]
    fn test_font_scale_is_clamped() {
        assert_eq!(font_scale(10.0), 0.7);
        assert_eq!(font_scale(150.0), 1.0);
        assert_eq!(font_scale(1000.0), 1.2);
    }

    #[test]
    fn test_known_face_gets_translucent_success_box() {
        let frame = black(200, 200);
        let out = annotate(&frame, &[result(Label::Known("Alice".into()), 50.0, 80.0, 150.0, 180.0)]);

        // Left edge of the box: 0.4 * 255 green over black.
        let edge = out.get_pixel(50, 130);
        assert_eq!(edge.0, [0, 102, 0]);
        // Inside the box nothing was drawn.
        assert_eq!(out.get_pixel(100, 130).0, [0, 0, 0]);
    }

    #[test]
    fn test_unrecognized_face_gets_warning_box() {
        let frame = black(200, 200);
        let out = annotate(&frame, &[result(Label::Unrecognized, 50.0, 80.0, 150.0, 180.0)]);
        assert_eq!(out.get_pixel(50, 130).0, [102, 0, 0]);
    }

    #[test]
    fn test_label_text_is_drawn_above_box() {
        let frame = RgbImage::from_pixel(200, 200, Rgb([100, 100, 100]));
        let out = annotate(&frame, &[result(Label::Known("AB".into()), 50.0, 80.0, 150.0, 180.0)]);

        // The plate darkens the strip just above the box, the glyphs brighten it.
        let strip = (50..90).flat_map(|x| (40..65).map(move |y| (x, y)));
        let (mut darker, mut brighter) = (false, false);
        for (x, y) in strip {
            let v = out.get_pixel(x, y)[0];
            darker |= v < 100;
            brighter |= v > 100;
        }
        assert!(darker && brighter);
    }

    #[test]
    fn test_untouched_pixels_survive_blend() {
        let mut frame = black(64, 64);
        frame.put_pixel(3, 3, Rgb([10, 20, 30]));
        let out = annotate(&frame, &[]);
        assert_eq!(out, frame);
    }

    #[test]
    fn test_boxes_outside_frame_are_clipped() {
        let frame = black(32, 32);
        let out = annotate(&frame, &[result(Label::Unrecognized, -50.0, -50.0, 500.0, 500.0)]);
        assert_eq!(out.dimensions(), (32, 32));
    }
}
