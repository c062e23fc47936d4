use std::time::Duration;

use image::RgbImage;

use super::{BoundingBox, Detection, DetectionModel};

/// Stand-in detector with a fixed latency.
///
/// Reports a single centred box covering half of each dimension. Useful to
/// exercise the pipeline without a model runtime.
pub struct StubModel {
    latency: Duration,
    class_id: usize,
    confidence: f32,
}

impl StubModel {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            class_id: 0,
            confidence: 0.9,
        }
    }

    pub fn with_class(mut self, class_id: usize, confidence: f32) -> Self {
        self.class_id = class_id;
        self.confidence = confidence;
        self
    }
}

impl DetectionModel for StubModel {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &RgbImage) -> color_eyre::Result<Vec<Detection>> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let (w, h) = (image.width() as f32, image.height() as f32);
        Ok(vec![Detection {
            class_id: self.class_id,
            label: None,
            confidence: self.confidence,
            bbox: BoundingBox::new(w * 0.25, h * 0.25, w * 0.75, h * 0.75),
        }])
    }
}
