//! V4L2 camera source with memory-mapped buffers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::{Frame, FrameMetadata, PixelFormat};
use super::pool::BufferPool;
use super::FrameSource;
use crate::pipeline::FrameSink;
use crate::{utils, CaptureConfig, PipelineError};

/// How long a blocking dequeue may wait before re-checking for stop.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

/// Continuous capture from a V4L2 device on a dedicated thread.
#[derive(Default)]
pub struct V4l2Source {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

/// Negotiated session parameters, reported back to `start`.
#[derive(Debug, Clone)]
struct Session {
    path: String,
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
}

impl V4l2Source {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSource for V4l2Source {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    #[instrument(skip(self, target, sink), fields(device = %target.device))]
    fn start(&mut self, target: &CaptureConfig, sink: FrameSink) -> Result<(), PipelineError> {
        if self.worker.is_some() {
            return Err(PipelineError::Stopped("already capturing"));
        }

        let mut target = target.clone();
        if target.device.is_empty() {
            let found = utils::auto_detect_device()?;
            target.device = found.path;
            target.format = found.format;
        }

        self.running.store(true, Ordering::Release);
        let running = self.running.clone();
        let (ready_tx, ready_rx) = flume::bounded::<Result<Session, PipelineError>>(1);

        // The device is opened on the capture thread so the mmap'd stream never
        // has to cross threads; `start` waits for the negotiation outcome.
        let worker = std::thread::Builder::new()
            .name("lookout-v4l2".into())
            .spawn(move || {
                let (device, session) = match open_device(&target) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let mut stream =
                    match MmapStream::with_buffers(&device, Type::VideoCapture, target.buffer_count) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(PipelineError::Configuration(format!(
                                "requesting {} buffers: {e}",
                                target.buffer_count
                            ))));
                            return;
                        }
                    };
                stream.set_timeout(DEQUEUE_TIMEOUT);

                let _ = ready_tx.send(Ok(session.clone()));
                capture_loop(&mut stream, &session, &target, &running, &sink);
            })
            .map_err(|e| PipelineError::Configuration(format!("capture thread: {e}")))?;

        let outcome = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(PipelineError::DeviceUnavailable("capture thread exited".into())));

        match outcome {
            Ok(session) => {
                info!(
                    "Capture started on {}: {}x{} {:?}, {} buffers",
                    session.path, session.width, session.height, session.format, target.buffer_count
                );
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                let _ = worker.join();
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("V4L2 capture thread panicked");
            }
            info!("Capture stopped");
        }
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.stop();
    }
}

fn fourcc_for(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
        PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
    }
}

/// Smallest `(width, height)` whose sides are both at least `min_dimension`.
pub fn select_capture_size(sizes: &[(u32, u32)], min_dimension: u32) -> Option<(u32, u32)> {
    sizes
        .iter()
        .copied()
        .filter(|&(w, h)| w >= min_dimension && h >= min_dimension)
        .min_by_key(|&(w, h)| (w as u64 * h as u64, w))
}

fn discrete_sizes(device: &Device, fourcc: FourCC) -> Vec<(u32, u32)> {
    match device.enum_framesizes(fourcc) {
        Ok(sizes) => sizes
            .into_iter()
            .filter_map(|size| match size.size {
                FrameSizeEnum::Discrete(d) => Some((d.width, d.height)),
                FrameSizeEnum::Stepwise(_) => None,
            })
            .collect(),
        Err(e) => {
            warn!("Could not enumerate frame sizes: {}", e);
            Vec::new()
        }
    }
}

fn open_device(target: &CaptureConfig) -> Result<(Device, Session), PipelineError> {
    let device = Device::with_path(&target.device).map_err(|e| {
        PipelineError::DeviceUnavailable(format!("opening {}: {e}", target.device))
    })?;

    let caps = device
        .query_caps()
        .map_err(|e| PipelineError::DeviceUnavailable(format!("querying caps: {e}")))?;
    info!("Device: {} ({})", caps.card, caps.driver);
    if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
        return Err(PipelineError::Configuration(format!(
            "{} does not support video capture",
            target.device
        )));
    }

    let fourcc = fourcc_for(target.format);
    let (width, height) = if target.width == 0 || target.height == 0 {
        let sizes = discrete_sizes(&device, fourcc);
        select_capture_size(&sizes, target.min_dimension).ok_or_else(|| {
            PipelineError::Configuration(format!(
                "no {:?} size with both sides >= {}",
                target.format, target.min_dimension
            ))
        })?
    } else {
        (target.width, target.height)
    };

    let mut fmt = device.format()?;
    fmt.width = width;
    fmt.height = height;
    fmt.fourcc = fourcc;
    let actual = device.set_format(&fmt)?;
    if actual.fourcc != fourcc {
        return Err(PipelineError::Configuration(format!(
            "device refused {:?}, offered {}",
            target.format, actual.fourcc
        )));
    }
    if (actual.width, actual.height) != (width, height) {
        warn!(
            "Requested {}x{}, device negotiated {}x{}",
            width, height, actual.width, actual.height
        );
    }

    if target.fps > 0 {
        if let Err(e) = device.set_params(&Parameters::with_fps(target.fps)) {
            warn!("Could not set {} fps: {}", target.fps, e);
        }
    }

    let session = Session {
        path: target.device.clone(),
        width: actual.width,
        height: actual.height,
        stride: actual.stride,
        format: target.format,
    };
    Ok((device, session))
}

fn capture_loop(
    stream: &mut MmapStream<'_>,
    session: &Session,
    target: &CaptureConfig,
    running: &AtomicBool,
    sink: &FrameSink,
) {
    let pool = BufferPool::new(target.buffer_count as usize);
    let mut sequence = 0u64;

    while running.load(Ordering::Acquire) {
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                error!("Capture error: {}", e);
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
        };
        sequence += 1;

        let Some(lease) = pool.try_acquire() else {
            debug!(seq = sequence, "buffer pool exhausted, frame dropped");
            sink.record_pool_exhausted();
            continue;
        };

        let used = (meta.bytesused as usize).min(buf.len());
        let data = Bytes::copy_from_slice(&buf[..used]);

        let frame_meta = FrameMetadata {
            sequence,
            width: session.width,
            height: session.height,
            stride: match session.format {
                PixelFormat::Mjpeg => 0,
                _ => session.stride,
            },
            format: session.format,
            rotation: None,
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            ),
        };

        sink.publish(Frame::new(data, frame_meta, lease));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_smallest_size_meeting_minimum() {
        let sizes = [(1920, 1080), (640, 480), (1280, 720), (800, 800), (640, 640)];
        assert_eq!(select_capture_size(&sizes, 640), Some((640, 640)));
        assert_eq!(select_capture_size(&sizes, 720), Some((800, 800)));
        assert_eq!(select_capture_size(&sizes, 2000), None);
    }

    #[test]
    fn missing_device_is_unavailable() {
        let target = CaptureConfig {
            device: "/dev/lookout-does-not-exist".into(),
            ..CaptureConfig::default()
        };
        let err = open_device(&target).unwrap_err();
        assert!(matches!(err, PipelineError::DeviceUnavailable(_)));
    }
}
