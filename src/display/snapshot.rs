//! Headless sink: keeps the latest annotated frame as a PNG on disk.

use std::path::{Path, PathBuf};

use color_eyre::{eyre::WrapErr, Result};
use image::ImageFormat;
use tracing::{debug, info};

use super::DisplaySink;
use crate::inference::DetectionResult;

pub struct SnapshotSink {
    path: PathBuf,
    staging: PathBuf,
}

impl SnapshotSink {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .wrap_err_with(|| format!("creating snapshot directory {}", dir.display()))?;
        }
        let mut staging = path.clone().into_os_string();
        staging.push(".partial");

        info!("Writing snapshots to {}", path.display());
        Ok(Self {
            path,
            staging: staging.into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DisplaySink for SnapshotSink {
    fn show(&mut self, result: &DetectionResult) -> Result<()> {
        // Write aside and rename so readers never see a half-written file.
        result
            .image
            .save_with_format(&self.staging, ImageFormat::Png)
            .wrap_err("encoding snapshot")?;
        std::fs::rename(&self.staging, &self.path).wrap_err("publishing snapshot")?;

        debug!(
            seq = result.sequence,
            detections = result.detections.len(),
            "snapshot updated"
        );
        Ok(())
    }
}
