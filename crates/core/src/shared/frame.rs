use std::fmt;

use ndarray::ArrayView3;
use thiserror::Error;

/// Memory layout of a frame's pixel data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Y plane followed by an interleaved UV plane at quarter resolution.
    Nv12,
    /// Packed 4:2:2, `Y0 U Y1 V` per pixel pair.
    Yuyv,
    Rgb8,
    Bgra8,
    /// Compressed; carried through but never decoded by the core.
    Mjpeg,
}

impl PixelFormat {
    /// Expected buffer length for a `width` x `height` frame.
    ///
    /// `None` for compressed formats, whose size is data-dependent.
    pub fn buffer_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Nv12 => Some(pixels + pixels / 2),
            PixelFormat::Yuyv => Some(pixels * 2),
            PixelFormat::Rgb8 => Some(pixels * 3),
            PixelFormat::Bgra8 => Some(pixels * 4),
            PixelFormat::Mjpeg => None,
        }
    }

    /// Bytes per pixel for packed layouts, `None` for planar or compressed.
    pub fn packed_channels(self) -> Option<u8> {
        match self {
            PixelFormat::Rgb8 => Some(3),
            PixelFormat::Bgra8 => Some(4),
            _ => None,
        }
    }

    fn requires_even_width(self) -> bool {
        matches!(self, PixelFormat::Nv12 | PixelFormat::Yuyv)
    }

    fn requires_even_height(self) -> bool {
        self == PixelFormat::Nv12
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Rgb8 => "RGB8",
            PixelFormat::Bgra8 => "BGRA8",
            PixelFormat::Mjpeg => "MJPEG",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("{format} frame of {width}x{height} needs {expected} bytes, got {actual}")]
    BufferSize {
        format: PixelFormat,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("{format} requires even dimensions, got {width}x{height}")]
    OddDimensions {
        format: PixelFormat,
        width: u32,
        height: u32,
    },
}

/// A single camera frame or rendered still image.
///
/// The buffer length is checked against the pixel format at construction,
/// so consumers can index planes without re-validating.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    index: usize,
}

impl Frame {
    pub fn try_new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        index: usize,
    ) -> Result<Self, FrameError> {
        if (format.requires_even_width() && width % 2 != 0)
            || (format.requires_even_height() && height % 2 != 0)
        {
            return Err(FrameError::OddDimensions {
                format,
                width,
                height,
            });
        }
        if let Some(expected) = format.buffer_len(width, height) {
            if data.len() != expected {
                return Err(FrameError::BufferSize {
                    format,
                    width,
                    height,
                    expected,
                    actual: data.len(),
                });
            }
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            index,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Sequence number within the stream that produced the frame.
    pub fn index(&self) -> usize {
        self.index
    }

    /// `(height, width, channels)` view for packed formats.
    pub fn as_ndarray(&self) -> Option<ArrayView3<'_, u8>> {
        let channels = self.format.packed_channels()? as usize;
        ArrayView3::from_shape(
            (self.height as usize, self.width as usize, channels),
            &self.data,
        )
        .ok()
    }
}
