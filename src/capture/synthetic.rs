//! Camera stand-in that emits generated frames at a fixed cadence.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tracing::{debug, error, info};

use super::frame::{Frame, FrameMetadata, PixelFormat, Rotation};
use super::pool::BufferPool;
use super::FrameSource;
use crate::pipeline::FrameSink;
use crate::{CaptureConfig, PipelineError};

const DEFAULT_SIZE: (u32, u32) = (640, 480);

/// Emits `count` frames (or runs until stopped), one every `interval`.
pub struct SyntheticSource {
    interval: Duration,
    count: Option<u64>,
    rotation_hint: Option<Rotation>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticSource {
    pub fn new(interval: Duration, count: Option<u64>) -> Self {
        Self {
            interval,
            count,
            rotation_hint: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Frame cadence matching `fps`; zero means as fast as possible.
    pub fn at_fps(fps: u32, count: Option<u64>) -> Self {
        let interval = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(1_000_000_000 / fps as u64)
        };
        Self::new(interval, count)
    }

    /// Tag every frame with a sensor orientation.
    pub fn with_rotation_hint(mut self, rotation: Rotation) -> Self {
        self.rotation_hint = Some(rotation);
        self
    }

    /// Block until the emitter has produced all of its frames.
    pub fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn start(&mut self, target: &CaptureConfig, sink: FrameSink) -> Result<(), PipelineError> {
        if self.worker.is_some() {
            return Err(PipelineError::Stopped("already capturing"));
        }
        if target.format == PixelFormat::Yuyv4 {
            return Err(PipelineError::Configuration(
                "synthetic source emits MJPEG or RGB24 only".into(),
            ));
        }

        let (width, height) = if target.width == 0 || target.height == 0 {
            DEFAULT_SIZE
        } else {
            (target.width, target.height)
        };
        let emitter = Emitter {
            width,
            height,
            format: target.format,
            rotation: self.rotation_hint,
            interval: self.interval,
            count: self.count,
            pool: BufferPool::new(target.buffer_count as usize),
        };

        self.running.store(true, Ordering::Release);
        let running = self.running.clone();
        let worker = std::thread::Builder::new()
            .name("lookout-synthetic".into())
            .spawn(move || emitter.run(&running, &sink))
            .map_err(|e| PipelineError::Configuration(format!("emitter thread: {e}")))?;

        info!(
            "Synthetic source started: {}x{} {:?} every {:?}",
            width, height, target.format, self.interval
        );
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.wait();
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Emitter {
    width: u32,
    height: u32,
    format: PixelFormat,
    rotation: Option<Rotation>,
    interval: Duration,
    count: Option<u64>,
    pool: BufferPool,
}

impl Emitter {
    fn run(self, running: &AtomicBool, sink: &FrameSink) {
        let epoch = Instant::now();
        let mut sequence = 0u64;

        while running.load(Ordering::Acquire) && self.count.map_or(true, |n| sequence < n) {
            // Pace against the schedule, not the previous frame, to avoid drift.
            if let Some(due) = epoch.checked_add(schedule_offset(self.interval, sequence)) {
                if let Some(wait) = due.checked_duration_since(Instant::now()) {
                    std::thread::sleep(wait);
                }
            }
            sequence += 1;

            let Some(lease) = self.pool.try_acquire() else {
                debug!(seq = sequence, "buffer pool exhausted, frame dropped");
                sink.record_pool_exhausted();
                continue;
            };

            let data = match self.render(sequence) {
                Ok(data) => data,
                Err(e) => {
                    error!("Could not render synthetic frame {}: {}", sequence, e);
                    sink.record_source_failure();
                    continue;
                }
            };

            let meta = FrameMetadata {
                sequence,
                width: self.width,
                height: self.height,
                stride: match self.format {
                    PixelFormat::Rgb24 => self.width * 3,
                    _ => 0,
                },
                format: self.format,
                rotation: self.rotation,
                device_timestamp: Some(epoch.elapsed()),
            };
            sink.publish(Frame::new(data, meta, lease));
        }

        debug!("synthetic source emitted {} frames", sequence);
    }

    fn render(&self, sequence: u64) -> Result<Bytes, image::ImageError> {
        let image = test_pattern(self.width, self.height, sequence);
        match self.format {
            PixelFormat::Mjpeg => {
                let mut jpeg = Vec::new();
                DynamicImage::ImageRgb8(image)
                    .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)?;
                Ok(Bytes::from(jpeg))
            }
            _ => Ok(Bytes::from(image.into_raw())),
        }
    }
}

/// Time after start at which frame `sequence` (zero-based) is due.
fn schedule_offset(interval: Duration, sequence: u64) -> Duration {
    let nanos = interval.as_nanos().saturating_mul(sequence as u128);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Gradient background with a white marker that walks one step per frame.
pub fn test_pattern(width: u32, height: u32, sequence: u64) -> RgbImage {
    let shade = (sequence.wrapping_mul(37) % 256) as u8;
    let mut image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            shade,
        ])
    });

    let side = (width.min(height) / 8).max(1);
    let steps = (width / side).max(1) as u64;
    let x0 = (sequence % steps) as u32 * side;
    let y0 = height.saturating_sub(side) / 2;
    for y in y0..(y0 + side).min(height) {
        for x in x0..(x0 + side).min(width) {
            image.put_pixel(x, y, Rgb([255, 255, 255]));
        }
    }
    image
}
