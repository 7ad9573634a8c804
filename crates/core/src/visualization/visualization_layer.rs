use crate::shared::face::{DetectedFace, DisplayRect};
use crate::shared::frame::Frame;

struct Snapshot {
    image: Frame,
    faces: Vec<DetectedFace>,
}

/// Holds the frozen image and its detections, and derives where the face
/// boxes land on screen.
///
/// Display rectangles are never stored. Only the last usable viewport size
/// is remembered, so every read recomputes them from image-space faces.
#[derive(Default)]
pub struct VisualizationLayer {
    snapshot: Option<Snapshot>,
    viewport: Option<(u32, u32)>,
}

impl VisualizationLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the still image and the detections together.
    pub fn set_snapshot(&mut self, image: Frame, faces: Vec<DetectedFace>) {
        self.snapshot = Some(Snapshot { image, faces });
    }

    pub fn clear(&mut self) {
        self.snapshot = None;
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn image(&self) -> Option<&Frame> {
        self.snapshot.as_ref().map(|s| &s.image)
    }

    pub fn faces(&self) -> &[DetectedFace] {
        self.snapshot
            .as_ref()
            .map(|s| s.faces.as_slice())
            .unwrap_or(&[])
    }

    /// Last non-degenerate viewport size seen by `recompute_overlay`.
    pub fn viewport(&self) -> Option<(u32, u32)> {
        self.viewport
    }

    /// Rescales the face boxes for a new viewport size.
    ///
    /// A zero width or height is ignored and the overlay for the previous
    /// viewport is returned unchanged.
    pub fn recompute_overlay(
        &mut self,
        viewport_width: u32,
        viewport_height: u32,
    ) -> Vec<DisplayRect> {
        if viewport_width == 0 || viewport_height == 0 {
            log::debug!("Ignoring degenerate viewport {viewport_width}x{viewport_height}");
        } else {
            self.viewport = Some((viewport_width, viewport_height));
        }
        self.overlay()
    }

    /// Face boxes for the current viewport; empty with no snapshot or before
    /// any viewport size is known.
    pub fn overlay(&self) -> Vec<DisplayRect> {
        match self.viewport {
            Some((width, height)) => self.overlay_for(width, height),
            None => Vec::new(),
        }
    }

    /// Face boxes scaled from image space into a `viewport_width` x
    /// `viewport_height` display.
    fn overlay_for(&self, viewport_width: u32, viewport_height: u32) -> Vec<DisplayRect> {
        let Some(snapshot) = &self.snapshot else {
            return Vec::new();
        };
        if viewport_width == 0 || viewport_height == 0 {
            return Vec::new();
        }

        let width_scale = snapshot.image.width() as f64 / viewport_width as f64;
        let height_scale = snapshot.image.height() as f64 / viewport_height as f64;
        snapshot
            .faces
            .iter()
            .map(|face| DisplayRect {
                x: face.x as f64 / width_scale,
                y: face.y as f64 / height_scale,
                width: face.width as f64 / width_scale,
                height: face.height as f64 / height_scale,
            })
            .collect()
    }

    /// Status line describing the detection result, if a snapshot is shown.
    pub fn face_summary(&self) -> Option<String> {
        let snapshot = self.snapshot.as_ref()?;
        Some(match snapshot.faces.len() {
            0 => "Didn't find any human faces in the image".to_string(),
            1 => "Found a human face in the image".to_string(),
            n => format!("Found {n} human faces in the image"),
        })
    }
}
