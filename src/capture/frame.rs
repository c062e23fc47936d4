use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::pool::BufferLease;

/// Captured frame.
///
/// Not `Clone`: the frame owns a slot of the source's buffer pool and gives it
/// back exactly once, when it is dropped.
pub struct Frame {
    /// Immutable frame data
    pub data: Bytes,
    /// Frame metadata
    pub meta: FrameMetadata,
    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
    lease: BufferLease,
}

impl Frame {
    pub fn new(data: Bytes, meta: FrameMetadata, lease: BufferLease) -> Self {
        Self {
            data,
            meta,
            timestamp: Instant::now(),
            lease,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// Index of the pool slot this frame occupies.
    pub fn slot(&self) -> usize {
        self.lease.slot()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("len", &self.data.len())
            .field("slot", &self.lease.slot())
            .finish()
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row for packed formats, 0 for compressed ones
    pub stride: u32,
    pub format: PixelFormat,
    /// Sensor orientation reported by the source; overrides the decoder default
    pub rotation: Option<Rotation>,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgb24 => Some(3),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }
}

/// Clockwise rotation applied to a decoded frame. Deserialises from either
/// the degree name (`"90"`) or the number (`90`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Degrees")]
pub enum Rotation {
    #[default]
    #[serde(rename = "0")]
    None,
    #[serde(rename = "90")]
    Cw90,
    #[serde(rename = "180")]
    Cw180,
    #[serde(rename = "270")]
    Cw270,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Degrees {
    Number(i64),
    Name(String),
}

impl TryFrom<Degrees> for Rotation {
    type Error = String;

    fn try_from(value: Degrees) -> Result<Self, Self::Error> {
        let degrees = match value {
            Degrees::Number(n) => n,
            Degrees::Name(name) => name
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("rotation {name:?} is not a number of degrees"))?,
        };
        i32::try_from(degrees)
            .ok()
            .and_then(Rotation::from_degrees)
            .ok_or_else(|| format!("rotation {degrees} is not a multiple of 90"))
    }
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    /// Output dimensions for an input of `width` x `height`.
    pub fn apply_to_size(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Rotation::Cw90 | Rotation::Cw270 => (height, width),
            Rotation::None | Rotation::Cw180 => (width, height),
        }
    }
}
