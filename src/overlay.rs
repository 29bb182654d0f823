//! Annotated frame for report consumers.
//!
//! Every evaluated spot gets a 2 px outline (green when free, red when occupied)
//! and a small tab carrying its number. A banner across the top shows the
//! free / occupied / total counts. Drawing goes through `imageproc` on an
//! `RgbImage`; glyphs come from the `font8x8` bitmap font.

use anyhow::{anyhow, Result};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::frame::BgrFrame;
use crate::report::FrameReport;
use crate::spots::SpotLayout;
use crate::OccupancyStatus;

pub mod colors {
    use image::Rgb;

    pub const FREE_GREEN: Rgb<u8> = Rgb([0, 255, 0]);
    pub const OCCUPIED_RED: Rgb<u8> = Rgb([255, 0, 0]);
    pub const TOTAL_GREY: Rgb<u8> = Rgb([200, 200, 200]);
    pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
    pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
}

pub const OUTLINE_THICKNESS: u32 = 2;
const GLYPH_SIZE: u32 = 8;
const LABEL_SCALE: u32 = 2;
const BANNER_SCALE: u32 = 2;
const BANNER_MARGIN: u32 = 10;

pub fn status_color(status: OccupancyStatus) -> Rgb<u8> {
    match status {
        OccupancyStatus::Free => colors::FREE_GREEN,
        OccupancyStatus::Occupied => colors::OCCUPIED_RED,
    }
}

/// Convert `frame` to RGB and draw every classified spot of `report` plus the
/// count banner.
pub fn annotate(frame: &BgrFrame, layout: &SpotLayout, report: &FrameReport) -> Result<RgbImage> {
    let mut out = frame.to_rgb_image().ok_or_else(|| {
        anyhow!(
            "frame buffer does not match {}x{}x{}",
            frame.width,
            frame.height,
            frame.channels
        )
    })?;
    for c in &report.classifications {
        let Some(spot) = layout.get(c.spot) else {
            continue;
        };
        let color = status_color(c.status);
        render_outline(&mut out, spot.x, spot.y, spot.width, spot.height, color);
        render_text_with_bg(
            &mut out,
            spot.x.saturating_add(OUTLINE_THICKNESS),
            spot.y.saturating_add(OUTLINE_THICKNESS),
            &c.spot.get().to_string(),
            LABEL_SCALE,
            colors::WHITE,
            color,
        );
    }
    render_count_banner(&mut out, report);
    Ok(out)
}

pub fn render_count_banner(image: &mut RgbImage, report: &FrameReport) {
    let boxes = [
        (
            format!("FREE: {}", report.free_count),
            colors::FREE_GREEN,
            colors::BLACK,
        ),
        (
            format!("OCCUPIED: {}", report.occupied_count),
            colors::OCCUPIED_RED,
            colors::WHITE,
        ),
        (
            format!("TOTAL: {}", report.total),
            colors::TOTAL_GREY,
            colors::BLACK,
        ),
    ];
    let mut x = BANNER_MARGIN;
    for (text, bg, fg) in boxes {
        let (w, _) = render_text_with_bg(image, x, BANNER_MARGIN, &text, BANNER_SCALE, fg, bg);
        x = x.saturating_add(w).saturating_add(BANNER_MARGIN);
    }
}

/// Rectangle outline drawn inward from the given bounds, clipped to the image.
pub fn render_outline(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    for i in 0..OUTLINE_THICKNESS {
        let inner_w = w.saturating_sub(2 * i);
        let inner_h = h.saturating_sub(2 * i);
        if let Some(rect) = rect_at(x.saturating_add(i), y.saturating_add(i), inner_w, inner_h) {
            draw_hollow_rect_mut(image, rect, color);
        }
    }
}

/// Text on a padded background box. Returns the box size.
pub fn render_text_with_bg(
    image: &mut RgbImage,
    x: u32,
    y: u32,
    text: &str,
    scale: u32,
    fg: Rgb<u8>,
    bg: Rgb<u8>,
) -> (u32, u32) {
    let pad = scale;
    let (tw, th) = text_size(text, scale);
    let bw = tw.saturating_add(2 * pad);
    let bh = th.saturating_add(2 * pad);
    if let Some(rect) = rect_at(x, y, bw, bh) {
        draw_filled_rect_mut(image, rect, bg);
    }
    render_text(
        image,
        x.saturating_add(pad),
        y.saturating_add(pad),
        text,
        scale,
        fg,
    );
    (bw, bh)
}

/// Width and height in pixels of `text` at `scale`.
pub fn text_size(text: &str, scale: u32) -> (u32, u32) {
    let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
    if chars == 0 {
        return (0, 0);
    }
    let cell = GLYPH_SIZE.saturating_mul(scale);
    (chars.saturating_mul(cell), cell)
}

/// Characters outside the basic Latin block are left blank.
pub fn render_text(image: &mut RgbImage, x: u32, y: u32, text: &str, scale: u32, color: Rgb<u8>) {
    let cell = GLYPH_SIZE.saturating_mul(scale);
    let mut cx = x;
    for ch in text.chars() {
        if let Some(rows) = BASIC_FONTS.get(ch) {
            for (row, bits) in (0u32..).zip(rows) {
                for col in 0..GLYPH_SIZE {
                    if bits & (1 << col) == 0 {
                        continue;
                    }
                    let px = cx.saturating_add(col * scale);
                    let py = y.saturating_add(row * scale);
                    if let Some(rect) = rect_at(px, py, scale, scale) {
                        draw_filled_rect_mut(image, rect, color);
                    }
                }
            }
        }
        cx = cx.saturating_add(cell);
    }
}

/// `None` for empty rectangles and for extents past `i32::MAX`, which cannot
/// intersect any image.
fn rect_at(x: u32, y: u32, w: u32, h: u32) -> Option<Rect> {
    if w == 0 || h == 0 {
        return None;
    }
    i32::try_from(x.checked_add(w)?).ok()?;
    i32::try_from(y.checked_add(h)?).ok()?;
    Some(Rect::at(i32::try_from(x).ok()?, i32::try_from(y).ok()?).of_size(w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::Evaluation;
    use crate::report::build_report;
    use crate::spots::SpotSize;
    use crate::{SpotClassification, SpotId};

    const PAVEMENT: Rgb<u8> = Rgb([90, 90, 90]);

    fn report(statuses: &[OccupancyStatus]) -> FrameReport {
        let classifications: Vec<SpotClassification> = statuses
            .iter()
            .enumerate()
            .map(|(i, &status)| SpotClassification {
                spot: SpotId(i as u32 + 1),
                status,
                foreground: 0,
            })
            .collect();
        let free_count = statuses.iter().filter(|s| s.is_free()).count();
        let evaluation = Evaluation {
            classifications,
            free_count,
        };
        build_report(0, &evaluation, Vec::new())
    }

    #[test]
    fn outlines_use_status_colors() {
        let frame = BgrFrame::filled(400, 200, [90, 90, 90]);
        let layout = SpotLayout::from_positions(&[(20, 100), (200, 100)], SpotSize::default());
        let out = annotate(
            &frame,
            &layout,
            &report(&[OccupancyStatus::Free, OccupancyStatus::Occupied]),
        )
        .expect("annotate");

        // Bottom-right corners sit away from the label tab.
        assert_eq!(out.get_pixel(20 + 104, 100 + 39), &colors::FREE_GREEN);
        assert_eq!(out.get_pixel(200 + 104, 100 + 39), &colors::OCCUPIED_RED);
        // Second ring of the 2 px outline.
        assert_eq!(out.get_pixel(20 + 103, 100 + 38), &colors::FREE_GREEN);
        // Interior is untouched.
        assert_eq!(out.get_pixel(20 + 60, 100 + 30), &PAVEMENT);
        assert_eq!(out.get_pixel(20 + 102, 100 + 37), &PAVEMENT);
    }

    #[test]
    fn annotate_swaps_bgr_to_rgb() {
        let frame = BgrFrame::filled(64, 64, [10, 20, 30]);
        let layout = SpotLayout::from_positions(&[], SpotSize::default());
        let out = annotate(&frame, &layout, &report(&[])).expect("annotate");
        assert_eq!(out.get_pixel(63, 63), &Rgb([30, 20, 10]));
    }

    #[test]
    fn banner_is_drawn_at_top_left() {
        let frame = BgrFrame::filled(400, 200, [90, 90, 90]);
        let layout = SpotLayout::from_positions(&[], SpotSize::default());
        let out = annotate(&frame, &layout, &report(&[])).expect("annotate");
        assert_eq!(
            out.get_pixel(BANNER_MARGIN, BANNER_MARGIN),
            &colors::FREE_GREEN
        );
    }

    #[test]
    fn text_size_scales_glyph_cells() {
        assert_eq!(text_size("", 2), (0, 0));
        assert_eq!(text_size("1", 1), (8, 8));
        assert_eq!(text_size("12", 2), (32, 16));
    }

    #[test]
    fn digits_render_with_the_bitmap_font() {
        let mut image = RgbImage::from_pixel(16, 16, colors::BLACK);
        render_text(&mut image, 0, 0, "1", 1, colors::WHITE);
        let lit = image.pixels().filter(|p| **p == colors::WHITE).count();
        assert!(lit > 0);
        // Glyphs stay inside their 8x8 cell.
        assert!(image
            .enumerate_pixels()
            .filter(|(x, y, _)| *x >= 8 || *y >= 8)
            .all(|(_, _, p)| *p == colors::BLACK));
    }

    #[test]
    fn drawing_clips_at_frame_edge() {
        let mut image = RgbImage::from_pixel(10, 10, colors::BLACK);
        render_outline(&mut image, 5, 5, 105, 40, colors::WHITE);
        assert_eq!(image.get_pixel(9, 5), &colors::WHITE);

        render_outline(&mut image, u32::MAX - 2, 5, 105, 40, colors::FREE_GREEN);
        render_text_with_bg(
            &mut image,
            u32::MAX,
            u32::MAX,
            "7",
            2,
            colors::WHITE,
            colors::FREE_GREEN,
        );
        assert!(image.pixels().all(|p| *p != colors::FREE_GREEN));
    }
}
