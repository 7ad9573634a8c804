/// A face bounding box in the pixel space of the image it was found on.
///
/// Immutable once produced; the visualization layer rescales copies of it
/// rather than editing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DetectedFace {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DetectedFace {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// `[x1, y1, x2, y2]` corners as floats.
    pub fn corners(&self) -> [f64; 4] {
        [
            self.x as f64,
            self.y as f64,
            (self.x + self.width) as f64,
            (self.y + self.height) as f64,
        ]
    }
}

/// A rectangle in viewport (display) pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}
