//! Owned and borrowed single-channel frames plus the colour conversion the
//! pipeline applies before any other processing.

use thiserror::Error;

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

#[derive(Clone, Debug, Default)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    #[inline]
    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

/// Why a raw pixel buffer could not be converted to grayscale.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("frame dimensions are zero ({width}x{height})")]
    EmptyFrame { width: usize, height: usize },
    #[error("unsupported channel count {0}, expected 3 (RGB) or 4 (RGBA)")]
    UnsupportedChannels(usize),
    #[error("frame dimensions {width}x{height} overflow the buffer size")]
    FrameTooLarge { width: usize, height: usize },
    #[error("pixel buffer too short: need {expected} bytes, got {got}")]
    BufferTooShort { expected: usize, got: usize },
}

/// Validates dimensions, channel count, and buffer length without touching
/// the pixel data. Callers that allocate per-frame storage run this before
/// sizing anything from `width * height`.
pub fn check_frame(
    pixels: &[u8],
    width: usize,
    height: usize,
    channels: usize,
) -> Result<(), ConvertError> {
    if width == 0 || height == 0 {
        return Err(ConvertError::EmptyFrame { width, height });
    }
    if channels != 3 && channels != 4 {
        return Err(ConvertError::UnsupportedChannels(channels));
    }
    let expected = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(channels))
        .ok_or(ConvertError::FrameTooLarge { width, height })?;
    if pixels.len() < expected {
        return Err(ConvertError::BufferTooShort {
            expected,
            got: pixels.len(),
        });
    }
    Ok(())
}

/// Convert a row-major RGB or RGBA buffer to grayscale, writing into `out`.
///
/// `out` is resized to `width x height`; an alpha channel is ignored. Uses
/// the Rec.601 luma weights in 8-bit fixed point.
pub fn rgb_to_gray_into(
    pixels: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    out: &mut GrayImage,
) -> Result<(), ConvertError> {
    check_frame(pixels, width, height, channels)?;

    out.width = width;
    out.height = height;
    out.data.resize(width * height, 0);

    for (dst, px) in out.data.iter_mut().zip(pixels.chunks_exact(channels)) {
        let r = px[0] as u32;
        let g = px[1] as u32;
        let b = px[2] as u32;
        *dst = ((77 * r + 150 * g + 29 * b) >> 8) as u8;
    }
    Ok(())
}

#[inline]
pub(crate) fn get_gray(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_gray(src, x0, y0) as f32;
    let p10 = get_gray(src, x0 + 1, y0) as f32;
    let p01 = get_gray(src, x0, y0 + 1) as f32;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &GrayImageView<'_>, x: f32, y: f32) -> u8 {
    sample_bilinear(src, x, y).clamp(0.0, 255.0) as u8
}
