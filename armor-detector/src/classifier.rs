//! Digit classification.
//!
//! The digit painted between the two lightbars identifies the robot class.
//! The digit region is perspective-unwarped to a 64×64 grayscale patch and
//! run through a pre-trained ONNX network; the argmax class is accepted
//! when its softmax probability clears the configured threshold.

use image::GrayImage;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::{Point2, Vector2};
use tracing::{trace, warn};

use autoaim_config_data::ClassifierConfig;
use autoaim_types::Labels;

use crate::armor::RawArmor;
use crate::{Error, Result};

/// Side length of the classifier input patch.
pub const PATCH_SIZE: u32 = 64;

/// Seam between armor pairing and the class decision. The production
/// implementation is [`OnnxClassifier`]; tests substitute stubs.
pub trait DigitClassifier: Send {
    /// Classify a 64×64 grayscale patch. Returns the accepted label (or
    /// `Labels::None` below threshold) and the winning probability.
    fn classify(&mut self, patch: &GrayImage) -> (Labels, f64);
}

/// Quadrilateral of the digit region for one paired armor.
///
/// The lightbar endpoints are pushed outward by a third of the lightbar
/// length along the bar axis, then the sides are inset by 30% of the
/// horizontal span, which brackets the painted digit while excluding the
/// bars themselves.
pub(crate) fn digit_region(armor: &RawArmor, width: u32, height: u32) -> [Point2<f64>; 4] {
    let [tl, tr, br, bl] = armor.vertices;

    let extend = |top: Point2<f64>, bottom: Point2<f64>| -> (Point2<f64>, Point2<f64>) {
        let axis: Vector2<f64> = bottom - top;
        let len = axis.norm();
        if len <= f64::EPSILON {
            return (top, bottom);
        }
        let unit = axis / len;
        (top - unit * (len / 3.0), bottom + unit * (len / 3.0))
    };
    let (mut top_left, mut bottom_left) = extend(tl, bl);
    let (mut top_right, mut bottom_right) = extend(tr, br);

    let horizontal_span = (nalgebra::distance(&top_left, &top_right)
        + nalgebra::distance(&bottom_left, &bottom_right))
        / 2.0;
    let inset = horizontal_span * 0.3;
    top_left.x += inset;
    bottom_left.x += inset;
    top_right.x -= inset;
    bottom_right.x -= inset;

    let clamp = |p: &mut Point2<f64>| {
        p.x = p.x.clamp(1.0, width as f64 - 1.0);
        p.y = p.y.clamp(1.0, height as f64 - 1.0);
    };
    clamp(&mut top_left);
    clamp(&mut top_right);
    clamp(&mut bottom_right);
    clamp(&mut bottom_left);

    [top_left, top_right, bottom_right, bottom_left]
}

/// Warp the digit region of `gray` to a `PATCH_SIZE` square patch. Returns
/// `None` for degenerate quadrilaterals.
pub(crate) fn extract_digit_patch(gray: &GrayImage, armor: &RawArmor) -> Option<GrayImage> {
    let quad = digit_region(armor, gray.width(), gray.height());
    let from: [(f32, f32); 4] = std::array::from_fn(|i| (quad[i].x as f32, quad[i].y as f32));
    let size = PATCH_SIZE as f32;
    let to = [(0.0, 0.0), (size, 0.0), (size, size), (0.0, size)];
    let projection = Projection::from_control_points(from, to)?;
    let mut patch = GrayImage::new(PATCH_SIZE, PATCH_SIZE);
    warp_into(
        gray,
        &projection,
        Interpolation::Bilinear,
        image::Luma([0u8]),
        &mut patch,
    );
    Some(patch)
}

/// Numerically stable softmax.
pub(crate) fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// The production ONNX-backed classifier.
pub struct OnnxClassifier {
    session: ort::session::Session,
    input_name: String,
    /// Human-readable names of the eight classes, wire order.
    label_names: Vec<String>,
    confidence_threshold: f64,
}

impl OnnxClassifier {
    pub fn new(cfg: &ClassifierConfig) -> Result<OnnxClassifier> {
        if cfg.labels.len() != Labels::TRACKABLE.len() {
            return Err(Error::BadLabelList(cfg.labels.len()));
        }
        let session = ort::session::Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(&cfg.model_path)?;
        Ok(OnnxClassifier {
            session,
            input_name: cfg.input_name.clone(),
            label_names: cfg.labels.clone(),
            confidence_threshold: cfg.confidence_threshold,
        })
    }

    /// Configured display name of a label, for diagnostics.
    fn label_name(&self, label: Labels) -> &str {
        match label.index() {
            0 => "none",
            idx => &self.label_names[idx as usize - 1],
        }
    }

    fn infer(&mut self, patch: &GrayImage) -> Result<Vec<f32>> {
        let mut input = ndarray::Array4::<f32>::zeros((1, 1, PATCH_SIZE as usize, PATCH_SIZE as usize));
        for (x, y, px) in patch.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = px.0[0] as f32 / 255.0;
        }
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input.view()]?)?;
        let logits = outputs[0].try_extract_tensor::<f32>()?;
        Ok(logits.iter().copied().collect())
    }
}

impl DigitClassifier for OnnxClassifier {
    fn classify(&mut self, patch: &GrayImage) -> (Labels, f64) {
        let logits = match self.infer(patch) {
            Ok(logits) => logits,
            Err(e) => {
                warn!("classifier inference failed: {e}");
                return (Labels::None, 0.0);
            }
        };
        let (label, prob) = decide(&logits, self.confidence_threshold);
        trace!("digit read as {} (p = {:.2})", self.label_name(label), prob);
        (label, prob)
    }
}

/// Softmax, argmax, threshold, and the fixed 1..8 label mapping.
pub(crate) fn decide(logits: &[f32], confidence_threshold: f64) -> (Labels, f64) {
    let probs = softmax(logits);
    let Some((argmax, prob)) = probs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, p)| (i, *p as f64))
    else {
        return (Labels::None, 0.0);
    };
    if prob >= confidence_threshold {
        (Labels::from_index(argmax as u8), prob)
    } else {
        (Labels::None, prob)
    }
}
