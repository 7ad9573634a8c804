use std::path::Path;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::shared::constants::{OVERLAY_STROKE_RGBA, OVERLAY_STROKE_WIDTH};
use crate::shared::face::DisplayRect;
use crate::shared::frame::{Frame, PixelFormat};

/// Composes a still image and its display-space face boxes at a given
/// viewport size.
///
/// The image is stretched to fill the viewport, matching the geometry the
/// visualization layer's display rectangles assume.
pub struct OverlayRenderer {
    stroke: Rgba<u8>,
    stroke_width: u32,
}

impl OverlayRenderer {
    pub fn new() -> Self {
        Self {
            stroke: Rgba(OVERLAY_STROKE_RGBA),
            stroke_width: OVERLAY_STROKE_WIDTH,
        }
    }

    /// Renders `image` at `viewport_width` x `viewport_height` with `rects`
    /// outlined on top.
    ///
    /// Returns `None` when the viewport is degenerate or the image is not
    /// BGRA.
    pub fn render(
        &self,
        image: &Frame,
        rects: &[DisplayRect],
        viewport_width: u32,
        viewport_height: u32,
    ) -> Option<RgbaImage> {
        if viewport_width == 0 || viewport_height == 0 || image.format() != PixelFormat::Bgra8 {
            return None;
        }

        let rgba = RgbaImage::from_raw(image.width(), image.height(), bgra_to_rgba(image.data()))?;
        let mut canvas =
            imageops::resize(&rgba, viewport_width, viewport_height, FilterType::Nearest);
        for rect in rects {
            self.outline(&mut canvas, rect);
        }
        Some(canvas)
    }

    /// Strokes the inside edge of `rect`, clipped to the canvas so boxes
    /// running off an edge still show a border there.
    fn outline(&self, canvas: &mut RgbaImage, rect: &DisplayRect) {
        let x0 = rect.x.round().max(0.0) as u32;
        let y0 = rect.y.round().max(0.0) as u32;
        let x1 = ((rect.x + rect.width).round().max(0.0) as u32).min(canvas.width());
        let y1 = ((rect.y + rect.height).round().max(0.0) as u32).min(canvas.height());
        if x1 <= x0 || y1 <= y0 {
            return;
        }

        // One hollow rect per pixel of stroke, each inset by one.
        for inset in 0..self.stroke_width {
            let width = (x1 - x0).saturating_sub(2 * inset);
            let height = (y1 - y0).saturating_sub(2 * inset);
            if width == 0 || height == 0 {
                break;
            }
            let edge = Rect::at((x0 + inset) as i32, (y0 + inset) as i32).of_size(width, height);
            draw_hollow_rect_mut(canvas, edge, self.stroke);
        }
    }
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn bgra_to_rgba(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(4)
        .flat_map(|px| [px[2], px[1], px[0], px[3]])
        .collect()
}

/// Writes a rendered overlay as PNG, creating parent directories.
pub fn save_png(path: &Path, canvas: &RgbaImage) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    canvas.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}
