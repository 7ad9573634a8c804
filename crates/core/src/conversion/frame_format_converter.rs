//! Raw camera layouts to packed BGRA for display.
//!
//! Whole frames go through swscale, which is deterministic for a given
//! input. `rgb_at` samples single pixels for the detector without a
//! conversion pass, using BT.601 limited-range integer coefficients.

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context, Flags};
use ffmpeg_next::util::frame::video::Video;
use thiserror::Error;

use crate::shared::frame::{Frame, PixelFormat};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("cannot convert {0} frames to a displayable image")]
    UnsupportedFormat(PixelFormat),
    #[error("pixel format conversion failed: {0}")]
    Scaler(String),
}

/// Converts a captured frame into a BGRA8 image with the same dimensions.
pub fn to_display_format(frame: &Frame) -> Result<Frame, ConvertError> {
    let source = match frame.format() {
        PixelFormat::Bgra8 => return Ok(frame.clone()),
        PixelFormat::Nv12 => Pixel::NV12,
        PixelFormat::Yuyv => Pixel::YUYV422,
        PixelFormat::Rgb8 => Pixel::RGB24,
        other => return Err(ConvertError::UnsupportedFormat(other)),
    };
    let width = frame.width();
    let height = frame.height();
    let scaler_error = |e: ffmpeg_next::Error| ConvertError::Scaler(e.to_string());

    let mut scaler = Context::get(
        source,
        width,
        height,
        Pixel::BGRA,
        width,
        height,
        Flags::POINT | Flags::ACCURATE_RND | Flags::BITEXACT,
    )
    .map_err(scaler_error)?;

    let mut input = Video::new(source, width, height);
    let mut offset = 0;
    for (plane, (row_bytes, rows)) in plane_layout(frame).into_iter().enumerate() {
        let stride = input.stride(plane);
        let dst = input.data_mut(plane);
        for row in 0..rows {
            let src = &frame.data()[offset..offset + row_bytes];
            dst[row * stride..row * stride + row_bytes].copy_from_slice(src);
            offset += row_bytes;
        }
    }

    let mut output = Video::empty();
    scaler.run(&input, &mut output).map_err(scaler_error)?;

    let row_bytes = width as usize * 4;
    let stride = output.stride(0);
    let data: Vec<u8> = output
        .data(0)
        .chunks(stride)
        .take(height as usize)
        .flat_map(|row| &row[..row_bytes])
        .copied()
        .collect();

    Frame::try_new(data, width, height, PixelFormat::Bgra8, frame.index())
        .map_err(|e| ConvertError::Scaler(e.to_string()))
}

/// `(row_bytes, rows)` for each plane of an uncompressed frame.
fn plane_layout(frame: &Frame) -> Vec<(usize, usize)> {
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    match frame.format() {
        PixelFormat::Nv12 => vec![(w, h), (w, h / 2)],
        PixelFormat::Yuyv => vec![(w * 2, h)],
        PixelFormat::Rgb8 => vec![(w * 3, h)],
        PixelFormat::Bgra8 => vec![(w * 4, h)],
        PixelFormat::Mjpeg => Vec::new(),
    }
}

/// Reads one pixel as RGB regardless of the frame's layout.
///
/// Returns `None` for out-of-bounds coordinates or compressed frames.
pub fn rgb_at(frame: &Frame, x: u32, y: u32) -> Option<[u8; 3]> {
    if x >= frame.width() || y >= frame.height() {
        return None;
    }
    let w = frame.width() as usize;
    let i = y as usize * w + x as usize;
    let data = frame.data();
    match frame.format() {
        PixelFormat::Rgb8 => Some([data[i * 3], data[i * 3 + 1], data[i * 3 + 2]]),
        PixelFormat::Bgra8 => Some([data[i * 4 + 2], data[i * 4 + 1], data[i * 4]]),
        PixelFormat::Nv12 | PixelFormat::Yuyv => Some(sample_yuv(frame, x, y)),
        PixelFormat::Mjpeg => None,
    }
}

/// Caller guarantees `frame` is NV12 or YUYV and `(x, y)` is in bounds.
fn sample_yuv(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    let (x, y) = (x as usize, y as usize);
    let data = frame.data();

    let (luma, u, v) = if frame.format() == PixelFormat::Nv12 {
        let uv = w * h + (y / 2) * w + (x / 2) * 2;
        (data[y * w + x], data[uv], data[uv + 1])
    } else {
        let pair = (y * w + (x & !1)) * 2;
        (data[pair + (x & 1) * 2], data[pair + 1], data[pair + 3])
    };
    yuv_to_rgb(luma, u, v)
}

/// BT.601 limited-range YCbCr to RGB.
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
