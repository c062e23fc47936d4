//! Raw frame to oriented RGB bitmap.

use std::time::{Duration, Instant};

use image::{imageops, RgbImage};
use tracing::instrument;
use zune_jpeg::JpegDecoder;

use super::frame::{Frame, PixelFormat, Rotation};
use crate::PipelineError;

/// Decoded, correctly oriented bitmap ready for inference.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: RgbImage,
    /// Sequence number of the source frame
    pub sequence: u64,
    /// Capture instant of the source frame
    pub captured_at: Instant,
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Decodes frames and corrects for the sensor mounting offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder {
    rotation: Rotation,
}

impl FrameDecoder {
    pub fn new(rotation: Rotation) -> Self {
        Self { rotation }
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    #[instrument(skip(self, frame), fields(seq = frame.meta.sequence))]
    pub fn decode(&self, frame: &Frame) -> Result<NormalizedImage, PipelineError> {
        let start = Instant::now();
        let sequence = frame.meta.sequence;

        let upright = match frame.meta.format {
            PixelFormat::Mjpeg => decode_mjpeg(&frame.data, sequence)?,
            PixelFormat::Rgb24 => pack_rgb24(
                &frame.data,
                frame.meta.width,
                frame.meta.height,
                frame.meta.stride,
                sequence,
            )?,
            PixelFormat::Yuyv4 => yuyv_to_rgb(
                &frame.data,
                frame.meta.width,
                frame.meta.height,
                frame.meta.stride,
                sequence,
            )?,
        };

        let rotation = frame.meta.rotation.unwrap_or(self.rotation);
        let image = rotate(upright, rotation);

        record_decode_time(start.elapsed());

        Ok(NormalizedImage {
            image,
            sequence,
            captured_at: frame.timestamp,
        })
    }
}

fn record_decode_time(elapsed: Duration) {
    metrics::histogram!("decode_time_us").record(elapsed.as_micros() as f64);
}

pub fn rotate(image: RgbImage, rotation: Rotation) -> RgbImage {
    match rotation {
        Rotation::None => image,
        Rotation::Cw90 => imageops::rotate90(&image),
        Rotation::Cw180 => imageops::rotate180(&image),
        Rotation::Cw270 => imageops::rotate270(&image),
    }
}

fn decode_mjpeg(data: &[u8], sequence: u64) -> Result<RgbImage, PipelineError> {
    let mut decoder = JpegDecoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| PipelineError::decode(sequence, format!("{e:?}")))?;
    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| PipelineError::decode(sequence, "jpeg carried no dimensions"))?;

    if pixels.len() != width * height * 3 {
        return Err(PipelineError::decode(
            sequence,
            format!(
                "expected {} RGB bytes for {width}x{height}, decoder produced {}",
                width * height * 3,
                pixels.len()
            ),
        ));
    }

    RgbImage::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| PipelineError::decode(sequence, "decoded buffer does not fit image"))
}

/// Bytes needed for `height` rows of `row_bytes` each, spaced `stride` apart.
fn required_len(row_bytes: usize, stride: usize, height: usize) -> usize {
    if height == 0 {
        0
    } else {
        stride * (height - 1) + row_bytes
    }
}

fn check_geometry(
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    bpp: u32,
    sequence: u64,
) -> Result<usize, PipelineError> {
    if width == 0 || height == 0 {
        return Err(PipelineError::decode(sequence, "frame has zero area"));
    }
    let row_bytes = (width * bpp) as usize;
    let stride = if stride == 0 { row_bytes } else { stride as usize };
    if stride < row_bytes {
        return Err(PipelineError::decode(
            sequence,
            format!("stride {stride} shorter than row of {row_bytes} bytes"),
        ));
    }
    let needed = required_len(row_bytes, stride, height as usize);
    if data.len() < needed {
        return Err(PipelineError::decode(
            sequence,
            format!("buffer holds {} bytes, {needed} required", data.len()),
        ));
    }
    Ok(stride)
}

fn pack_rgb24(
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    sequence: u64,
) -> Result<RgbImage, PipelineError> {
    let stride = check_geometry(data, width, height, stride, 3, sequence)?;
    let row_bytes = (width * 3) as usize;

    let mut packed = Vec::with_capacity(row_bytes * height as usize);
    for row in data.chunks(stride).take(height as usize) {
        packed.extend_from_slice(&row[..row_bytes]);
    }

    RgbImage::from_raw(width, height, packed)
        .ok_or_else(|| PipelineError::decode(sequence, "rgb buffer does not fit image"))
}

fn yuyv_to_rgb(
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    sequence: u64,
) -> Result<RgbImage, PipelineError> {
    if width % 2 != 0 {
        return Err(PipelineError::decode(sequence, "YUYV width must be even"));
    }
    let stride = check_geometry(data, width, height, stride, 2, sequence)?;
    let row_bytes = (width * 2) as usize;

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for row in data.chunks(stride).take(height as usize) {
        for px in row[..row_bytes].chunks_exact(4) {
            let (y0, u, y1, v) = (px[0], px[1], px[2], px[3]);
            rgb.extend_from_slice(&bt601(y0, u, v));
            rgb.extend_from_slice(&bt601(y1, u, v));
        }
    }

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| PipelineError::decode(sequence, "yuyv buffer does not fit image"))
}

/// ITU-R BT.601 studio-swing YCbCr to RGB, integer approximation.
fn bt601(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
    ]
}
