use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::capture::frame::PixelFormat;
use crate::PipelineError;

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

/// Auto-detect a capture device, preferring MJPEG over YUYV.
pub fn auto_detect_device() -> Result<FoundDevice, PipelineError> {
    info!("Auto-detecting capture devices...");

    let mut fallback = None;
    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        for fmt in formats {
            if fmt.fourcc == FourCC::new(b"MJPG") {
                info!("Found MJPEG device: {} - {}", path, caps.card);
                return Ok(FoundDevice::new(path, PixelFormat::Mjpeg));
            } else if fmt.fourcc == FourCC::new(b"YUYV") && fallback.is_none() {
                debug!("Found YUYV device: {} - {}", path, caps.card);
                fallback = Some(FoundDevice::new(path.clone(), PixelFormat::Yuyv4));
            }
        }
    }

    fallback.ok_or_else(|| PipelineError::DeviceUnavailable("no suitable capture device found".into()))
}

/// Copy a packaged asset into `dest_dir` once. An existing copy is kept as-is
/// and treated as read-only from then on. Returns the staged path.
pub fn stage_asset(src: &Path, dest_dir: &Path) -> std::io::Result<PathBuf> {
    let name = src.file_name().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("asset path {} has no file name", src.display()),
        )
    })?;
    let dest = dest_dir.join(name);

    if dest.exists() {
        debug!("Asset {} already staged", dest.display());
        return Ok(dest);
    }

    std::fs::create_dir_all(dest_dir)?;
    let bytes = std::fs::copy(src, &dest)?;

    let mut perms = std::fs::metadata(&dest)?.permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(&dest, perms)?;

    info!("Staged {} ({} bytes) to {}", src.display(), bytes, dest.display());
    Ok(dest)
}
