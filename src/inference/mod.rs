//! Inference boundary.
//!
//! The detector itself is an external collaborator. The pipeline only sees
//! [`InferenceAdapter`]: a normalized image goes in, an annotated result comes
//! out. [`AnnotatingAdapter`] turns any [`DetectionModel`] into an adapter by
//! thresholding, labelling and drawing its detections.

pub mod annotate;
pub mod stub;

pub use annotate::{caption, class_color, draw_detections, AnnotatingAdapter};
pub use stub::StubModel;

use std::time::{Duration, Instant};

use image::RgbImage;

use crate::capture::NormalizedImage;
use crate::{InferenceConfig, PipelineError};

/// Axis-aligned box in pixel coordinates of the normalized image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y_max - self.y_min).max(0.0)
    }

    /// Clamp to a `width` x `height` image, fixing inverted corners.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        let (x0, x1) = (self.x_min.min(self.x_max), self.x_min.max(self.x_max));
        let (y0, y1) = (self.y_min.min(self.y_max), self.y_min.max(self.y_max));
        Self {
            x_min: x0.clamp(0.0, w),
            y_min: y0.clamp(0.0, h),
            x_max: x1.clamp(0.0, w),
            y_max: y1.clamp(0.0, h),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    /// Class name, filled in from the configured label list
    pub label: Option<String>,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Output of one inference call.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// Copy of the input with detections drawn on it
    pub image: RgbImage,
    pub detections: Vec<Detection>,
    pub sequence: u64,
    pub captured_at: Instant,
    pub inference_time: Duration,
}

/// Model and label settings, fixed for the lifetime of an adapter.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub labels: Vec<String>,
    pub confidence_threshold: f32,
}

impl ModelSpec {
    pub fn label(&self, class_id: usize) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }
}

impl From<&InferenceConfig> for ModelSpec {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            labels: config.labels.clone(),
            confidence_threshold: config.confidence_threshold,
        }
    }
}

/// The pipeline's view of the detector.
///
/// `infer` is called at most once per accepted frame and never concurrently.
/// It blocks the pipeline worker, never the UI thread.
pub trait InferenceAdapter: Send {
    fn name(&self) -> &'static str;

    fn infer(&mut self, image: NormalizedImage) -> Result<DetectionResult, PipelineError>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Raw detector: preprocessing, model execution and box decoding are all its
/// own business.
pub trait DetectionModel: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, image: &RgbImage) -> color_eyre::Result<Vec<Detection>>;
}

/// COCO class names, in model output order.
pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];
