//! Box and label overlays.
//!
//! `annotate` is the report annotator used by `/predict`: it copies the
//! source image and draws per-class coloured boxes with a filled label bar.
//! `draw_detections` with `AnnotationStyle::live()` is the in-place overlay the
//! live feed applies to each camera frame.

mod font;

use image::{Rgb, RgbImage};

use crate::detect::{BoxPrediction, DetectionResult};

pub use font::{text_height, text_width};

const PALETTE: [[u8; 3]; 8] = [
    [0xFF, 0x38, 0x38],
    [0xFF, 0x9D, 0x97],
    [0xFF, 0x70, 0x1F],
    [0xFF, 0xB2, 0x1D],
    [0xCF, 0xD2, 0x31],
    [0x48, 0xF9, 0x0A],
    [0x1A, 0x93, 0x34],
    [0x00, 0xD4, 0xBB],
];

pub const LIVE_BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const LIVE_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const REPORT_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelStyle {
    /// `fire 0.90` on a bar filled with the class colour.
    Report,
    /// `fire 90.0%` in yellow, 10 px above a red box.
    Live,
}

#[derive(Clone, Copy, Debug)]
pub struct AnnotationStyle {
    pub thickness: u32,
    pub text_scale: u32,
    pub label: LabelStyle,
}

impl AnnotationStyle {
    pub fn report() -> Self {
        Self {
            thickness: 2,
            text_scale: 2,
            label: LabelStyle::Report,
        }
    }

    pub fn live() -> Self {
        Self {
            thickness: 2,
            text_scale: 2,
            label: LabelStyle::Live,
        }
    }
}

pub fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

/// Draw boxes and labels onto a copy of `image`.
pub fn annotate(image: &RgbImage, result: &DetectionResult) -> RgbImage {
    let mut out = image.clone();
    draw_detections(&mut out, result, &AnnotationStyle::report());
    out
}

/// Draw boxes and labels onto `image` in place. Degenerate boxes are skipped.
pub fn draw_detections(image: &mut RgbImage, result: &DetectionResult, style: &AnnotationStyle) {
    for b in &result.boxes {
        if b.width() < 1.0 || b.height() < 1.0 {
            continue;
        }
        let rect = b.pixel_box();
        let label = label_text(result, b, style.label);
        match style.label {
            LabelStyle::Report => {
                let color = class_color(b.class_id);
                draw_rect(image, rect, color, style.thickness);
                draw_label_bar(image, rect, &label, color, style.text_scale);
            }
            LabelStyle::Live => {
                draw_rect(image, rect, LIVE_BOX_COLOR, style.thickness);
                let top = rect[1] - 10 - text_height(style.text_scale) as i32;
                draw_text(image, rect[0], top, &label, LIVE_TEXT_COLOR, style.text_scale);
            }
        }
    }
}

fn label_text(result: &DetectionResult, b: &BoxPrediction, style: LabelStyle) -> String {
    let name = result.label(b.class_id);
    match style {
        LabelStyle::Report => format!("{} {:.2}", name, b.confidence),
        LabelStyle::Live => format!("{} {:.1}%", name, b.confidence * 100.0),
    }
}

fn draw_label_bar(image: &mut RgbImage, rect: [i32; 4], label: &str, color: Rgb<u8>, scale: u32) {
    let pad = scale as i32;
    let bar_w = text_width(label, scale) as i32 + 2 * pad;
    let bar_h = text_height(scale) as i32 + 2 * pad;
    // Inside the box when there is no room above it.
    let bar_top = if rect[1] - bar_h >= 0 {
        rect[1] - bar_h
    } else {
        rect[1]
    };
    fill_rect(image, [rect[0], bar_top, rect[0] + bar_w, bar_top + bar_h], color);
    draw_text(image, rect[0] + pad, bar_top + pad, label, REPORT_TEXT_COLOR, scale);
}

fn put(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x < 0 || y < 0 {
        return;
    }
    let (x, y) = (x as u32, y as u32);
    if x < image.width() && y < image.height() {
        image.put_pixel(x, y, color);
    }
}

/// Fill `[x1, y1, x2, y2)`, clipped to the image.
pub fn fill_rect(image: &mut RgbImage, rect: [i32; 4], color: Rgb<u8>) {
    let x1 = rect[0].max(0);
    let y1 = rect[1].max(0);
    let x2 = rect[2].min(image.width() as i32);
    let y2 = rect[3].min(image.height() as i32);
    for y in y1..y2 {
        for x in x1..x2 {
            put(image, x, y, color);
        }
    }
}

/// Outline `[x1, y1, x2, y2]` with lines growing inward, clipped to the image.
pub fn draw_rect(image: &mut RgbImage, rect: [i32; 4], color: Rgb<u8>, thickness: u32) {
    let [x1, y1, x2, y2] = rect;
    let t = thickness.max(1) as i32;
    fill_rect(image, [x1, y1, x2 + 1, y1 + t], color);
    fill_rect(image, [x1, y2 - t + 1, x2 + 1, y2 + 1], color);
    fill_rect(image, [x1, y1, x1 + t, y2 + 1], color);
    fill_rect(image, [x2 - t + 1, y1, x2 + 1, y2 + 1], color);
}

/// Render `text` with its top-left corner at `(x, y)`.
pub fn draw_text(image: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>, scale: u32) {
    let scale = scale.max(1) as i32;
    let mut cursor = x;
    for c in text.chars() {
        let rows = font::glyph(c);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..font::GLYPH_WIDTH as i32 {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                let px = cursor + col * scale;
                let py = y + row as i32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        put(image, px + dx, py + dy, color);
                    }
                }
            }
        }
        cursor += font::GLYPH_ADVANCE as i32 * scale;
    }
}
