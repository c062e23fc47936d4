pub mod capture;
pub mod display;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};

use arc_swap::ArcSwap;
use capture::frame::{PixelFormat, Rotation};
use pipeline::BackPressure;
use serde::{Deserialize, Serialize};

pub use error::PipelineError;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Environment variable prefix; `LOOKOUT__CAPTURE__FPS=15` overrides `capture.fps`.
pub const ENV_PREFIX: &str = "LOOKOUT";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub inference: InferenceConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    V4l2,
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// Device node; empty means auto-detect
    pub device: String,
    /// Requested size; 0 x 0 picks the smallest size of at least `min_dimension`
    pub width: u32,
    pub height: u32,
    pub min_dimension: u32,
    pub fps: u32,
    pub format: PixelFormat,
    /// Frame buffer pool size
    pub buffer_count: u32,
    /// Sensor mounting offset, corrected by the decoder
    pub rotation: Rotation,
    /// Synthetic source only: stop after this many frames
    pub synthetic_frames: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub back_pressure: BackPressure,
    /// Pin the pipeline worker to this CPU core
    pub worker_core: Option<usize>,
    /// Display loop wake-up interval
    pub display_tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub labels: Vec<String>,
    pub confidence_threshold: f32,
    /// Simulated latency of the stub detector
    pub stub_latency_ms: u64,
    /// Packaged label file staged into `asset_dir` at startup
    pub label_asset: Option<PathBuf>,
    pub asset_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Snapshot,
    Window,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub sink: SinkKind,
    pub width: u32,
    pub height: u32,
    pub snapshot_path: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::V4l2,
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            min_dimension: 640,
            fps: 30,
            format: PixelFormat::Mjpeg,
            buffer_count: 2,
            rotation: Rotation::Cw90,
            synthetic_frames: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            back_pressure: BackPressure::DropWhileBusy,
            worker_core: None,
            display_tick_ms: 16,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            labels: inference::COCO_LABELS.iter().map(|s| s.to_string()).collect(),
            confidence_threshold: 0.5,
            stub_latency_ms: 40,
            label_asset: None,
            asset_dir: PathBuf::from("assets"),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::Snapshot,
            width: 800,
            height: 600,
            snapshot_path: PathBuf::from("lookout-latest.png"),
        }
    }
}

impl Config {
    /// Defaults, overlaid with `path` (TOML) when given, overlaid with
    /// `LOOKOUT__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        Self::load_with_env(path, None)
    }

    /// As [`Config::load`], reading overrides from `env` instead of the
    /// process environment when given.
    fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}
