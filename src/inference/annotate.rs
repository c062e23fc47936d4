//! Detection overlay and the adapter that applies it.

use std::time::Instant;

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use once_cell::sync::Lazy;
use tracing::{debug, instrument, warn};

use super::{Detection, DetectionModel, DetectionResult, InferenceAdapter, ModelSpec};
use crate::capture::NormalizedImage;
use crate::PipelineError;

const STROKE_WIDTH: u32 = 3;
const LABEL_BAR_HEIGHT: u32 = 12;
const LABEL_PADDING: u32 = 2;
const LABEL_SCALE: f32 = 11.0;

static LABEL_FONT: Lazy<Option<FontRef<'static>>> = Lazy::new(|| {
    match FontRef::try_from_slice(include_bytes!("../../assets/fonts/DejaVuSansMono.ttf")) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!("Label font unusable, boxes will carry empty label bars: {}", e);
            None
        }
    }
});

/// Stable per-class colour.
pub fn class_color(class_id: usize) -> Rgb<u8> {
    let r = (class_id + 72) * 1717 % 256;
    let g = (class_id + 7) * 33 % 126 + 70;
    let b = (class_id + 47) * 107 % 256;
    Rgb([r as u8, g as u8, b as u8])
}

/// Black on light fills, white on dark ones.
fn text_color(fill: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = fill.0;
    let luma = 299 * r as u32 + 587 * g as u32 + 114 * b as u32;
    if luma > 128_000 {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}

/// Caption shown above a box, e.g. `person 0.87`.
pub fn caption(detection: &Detection) -> String {
    match &detection.label {
        Some(label) => format!("{} {:.2}", label, detection.confidence),
        None => format!("#{} {:.2}", detection.class_id, detection.confidence),
    }
}

/// Draw a stroked box and a captioned label bar for every detection.
pub fn draw_detections(image: &mut RgbImage, detections: &[Detection]) {
    let (width, height) = image.dimensions();
    let font = LABEL_FONT.as_ref();
    let scale = PxScale::from(LABEL_SCALE);

    for detection in detections {
        let b = detection.bbox.clamped(width, height);
        let (x, y) = (b.x_min as i32, b.y_min as i32);
        let (w, h) = (b.width() as u32, b.height() as u32);
        if w == 0 || h == 0 {
            continue;
        }
        let color = class_color(detection.class_id);

        for inset in 0..STROKE_WIDTH.min(w / 2).min(h / 2).max(1) {
            let rect = Rect::at(x + inset as i32, y + inset as i32)
                .of_size(w - 2 * inset, h - 2 * inset);
            draw_hollow_rect_mut(image, rect, color);
        }

        // Bar sits above the box, or just inside it when the box touches the top.
        let bar_y = if y >= LABEL_BAR_HEIGHT as i32 {
            y - LABEL_BAR_HEIGHT as i32
        } else {
            y
        };
        let text = caption(detection);
        let text_w = font.map_or(0, |f| text_size(scale, f, &text).0);
        let bar_w = (text_w + 2 * LABEL_PADDING)
            .max(STROKE_WIDTH)
            .min(width.saturating_sub(x as u32).max(1));
        let bar = Rect::at(x, bar_y).of_size(bar_w, LABEL_BAR_HEIGHT);
        draw_filled_rect_mut(image, bar, color);

        if let Some(font) = font {
            draw_text_mut(
                image,
                text_color(color),
                x + LABEL_PADDING as i32,
                bar_y,
                scale,
                font,
                &text,
            );
        }
    }
}

/// Adapter around a [`DetectionModel`]: filters by confidence, attaches
/// labels and renders the overlay onto a copy of the input.
pub struct AnnotatingAdapter<M> {
    model: M,
    spec: ModelSpec,
}

impl<M: DetectionModel> AnnotatingAdapter<M> {
    pub fn new(model: M, spec: ModelSpec) -> Self {
        Self { model, spec }
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }
}

impl<M: DetectionModel> InferenceAdapter for AnnotatingAdapter<M> {
    fn name(&self) -> &'static str {
        self.model.name()
    }

    #[instrument(skip(self, input), fields(seq = input.sequence, model = self.model.name()))]
    fn infer(&mut self, input: NormalizedImage) -> Result<DetectionResult, PipelineError> {
        let start = Instant::now();
        let (width, height) = input.image.dimensions();

        let raw = self
            .model
            .detect(&input.image)
            .map_err(|e| PipelineError::inference(input.sequence, e))?;

        let detections: Vec<Detection> = raw
            .into_iter()
            .filter(|d| d.confidence >= self.spec.confidence_threshold)
            .map(|mut d| {
                d.bbox = d.bbox.clamped(width, height);
                d.label = self.spec.label(d.class_id).map(str::to_owned);
                d
            })
            .collect();

        let mut image = input.image;
        draw_detections(&mut image, &detections);

        let inference_time = start.elapsed();
        metrics::histogram!("inference_time_ms").record(inference_time.as_secs_f64() * 1000.0);
        for d in &detections {
            debug!(
                "{} {:.2} at ({:.0}, {:.0})-({:.0}, {:.0})",
                d.label.as_deref().unwrap_or("?"),
                d.confidence,
                d.bbox.x_min,
                d.bbox.y_min,
                d.bbox.x_max,
                d.bbox.y_max
            );
        }

        Ok(DetectionResult {
            image,
            detections,
            sequence: input.sequence,
            captured_at: input.captured_at,
            inference_time,
        })
    }
}
