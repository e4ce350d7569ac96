//! Text Challenge Rendering
//!
//! Draws challenge text as an SVG of dot-matrix cells so the characters never
//! appear as text in the payload. Difficulty controls glyph jitter, rotation
//! and background noise.

use rand::Rng;
use serde::Serialize;
use std::fmt::Write;

use crate::config::Difficulty;

const CELL: i32 = 4;
const GLYPH_COLS: i32 = 5;
const GLYPH_ROWS: i32 = 7;
const GLYPH_ADVANCE: i32 = (GLYPH_COLS + 2) * CELL;
const MARGIN: i32 = 12;
const HEIGHT: i32 = 64;

/// Rendered text challenge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextImage {
    /// Self-contained SVG document
    pub svg: String,
    pub distortion: &'static str,
    pub noise: bool,
    pub rotation: bool,
}

/// Render `text` (uppercase ASCII letters and digits) as a distorted SVG
pub fn render_text<R: Rng>(text: &str, difficulty: Difficulty, rng: &mut R) -> TextImage {
    let (distortion, jitter, noise, rotation) = match difficulty {
        Difficulty::Easy => ("minimal", 2, false, false),
        Difficulty::Medium => ("moderate", 6, false, true),
        Difficulty::Hard => ("heavy", 10, true, true),
    };

    let width = MARGIN * 2 + GLYPH_ADVANCE * text.chars().count() as i32;
    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = HEIGHT
    );
    svg.push_str(r#"<rect width="100%" height="100%" fill="white"/>"#);

    if noise {
        for _ in 0..8 {
            let _ = write!(
                svg,
                r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="gray" stroke-width="1"/>"#,
                rng.gen_range(0..width),
                rng.gen_range(0..HEIGHT),
                rng.gen_range(0..width),
                rng.gen_range(0..HEIGHT)
            );
        }
        for _ in 0..40 {
            let _ = write!(
                svg,
                r#"<rect x="{}" y="{}" width="2" height="2" fill="dimgray"/>"#,
                rng.gen_range(0..width),
                rng.gen_range(0..HEIGHT)
            );
        }
    }

    let baseline = (HEIGHT - GLYPH_ROWS * CELL) / 2;
    for (i, ch) in text.chars().enumerate() {
        let Some(rows) = glyph(ch) else { continue };
        let x0 = MARGIN + GLYPH_ADVANCE * i as i32;
        let y0 = baseline + rng.gen_range(-jitter..=jitter);

        if rotation {
            let angle = rng.gen_range(-15..=15);
            let cx = x0 + GLYPH_COLS * CELL / 2;
            let cy = y0 + GLYPH_ROWS * CELL / 2;
            let _ = write!(svg, r#"<g transform="rotate({} {} {})">"#, angle, cx, cy);
        } else {
            svg.push_str("<g>");
        }

        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_COLS {
                if bits & (1 << (GLYPH_COLS - 1 - col)) != 0 {
                    let _ = write!(
                        svg,
                        r#"<rect x="{}" y="{}" width="{c}" height="{c}" fill="black"/>"#,
                        x0 + col * CELL,
                        y0 + row as i32 * CELL,
                        c = CELL
                    );
                }
            }
        }
        svg.push_str("</g>");
    }
    svg.push_str("</svg>");

    TextImage {
        svg,
        distortion,
        noise,
        rotation,
    }
}

/// 5x7 bitmap, one byte per row, high bit on the left
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        _ => return None,
    };
    Some(rows)
}
