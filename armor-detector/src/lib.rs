//! Armor plate detection.
//!
//! Stage S2 of the pipeline: given an RGB frame and the IMU sample fused
//! with it, extract enemy-colored lightbars, pair them into armor plates,
//! classify the painted digit, and emit [`Detection2D`]s for every plate
//! whose class the micro-controller currently allows. Empty output is the
//! normal no-target case, never an error.

use std::time::Instant;

use image::RgbImage;
use tracing::trace;

use autoaim_config_data::DetectorConfig;
use autoaim_types::{Detection2D, ImuSample, Labels};

mod armor;
mod classifier;
mod lightbar;

pub use classifier::{DigitClassifier, OnnxClassifier, PATCH_SIZE};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("ort error: {source}")]
    Ort {
        #[from]
        source: ort::Error,
    },
    #[error("classifier config must name 8 classes, got {0}")]
    BadLabelList(usize),
}

pub struct Detector {
    cfg: DetectorConfig,
    ignore: Vec<Labels>,
    classifier: Box<dyn DigitClassifier>,
}

impl Detector {
    pub fn new(
        cfg: DetectorConfig,
        ignore: Vec<Labels>,
        classifier: Box<dyn DigitClassifier>,
    ) -> Detector {
        Detector {
            cfg,
            ignore,
            classifier,
        }
    }

    /// Detect armor plates of the enemy color in one frame.
    pub fn detect(
        &mut self,
        rgb: &RgbImage,
        imu: &ImuSample,
        capture_time: Instant,
    ) -> Vec<Detection2D> {
        let bars = lightbar::find_lightbars(
            rgb,
            self.cfg.enemy_color,
            self.cfg.brightness_threshold,
            self.cfg.color_threshold,
            &self.cfg.lightbar,
        );
        if bars.len() < 2 {
            return vec![];
        }
        let armors = armor::pair_armors(&bars, &self.cfg.armor);
        if armors.is_empty() {
            return vec![];
        }

        let gray = image::imageops::grayscale(rgb);
        let mut detections = Vec::with_capacity(armors.len());
        for armor in armors {
            let Some(patch) = classifier::extract_digit_patch(&gray, &armor) else {
                trace!("degenerate digit region, skipping armor");
                continue;
            };
            let (label, confidence) = self.classifier.classify(&patch);
            if label == Labels::None {
                continue;
            }
            if self.ignore.contains(&label) {
                trace!("{label} is on the ignore list, dropping");
                continue;
            }
            if !imu.shoot_decision.allows(label) {
                trace!("{label} not in the current shoot decision, dropping");
                continue;
            }
            detections.push(Detection2D {
                left: armor.left.geom,
                right: armor.right.geom,
                vertices: armor.vertices,
                center: armor.center,
                size: armor.size,
                label,
                confidence,
                imu: *imu,
                capture_time,
            });
        }
        trace!("{} detection(s) this frame", detections.len());
        detections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoaim_types::{ArmorSize, ShootDecision};
    use image::GrayImage;

    const BLUE_BAR: [u8; 3] = [180, 180, 255];

    fn paint(img: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: [u8; 3]) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, image::Rgb(color));
            }
        }
    }

    /// An image with one small-armor-shaped pair of blue lightbars.
    fn armor_scene() -> RgbImage {
        let mut img = RgbImage::new(400, 300);
        paint(&mut img, 140, 120, 8, 56, BLUE_BAR);
        paint(&mut img, 240, 120, 8, 56, BLUE_BAR);
        img
    }

    struct StubClassifier {
        label: Labels,
        confidence: f64,
    }

    impl DigitClassifier for StubClassifier {
        fn classify(&mut self, _patch: &GrayImage) -> (Labels, f64) {
            (self.label, self.confidence)
        }
    }

    fn detector_with(label: Labels) -> Detector {
        Detector::new(
            DetectorConfig::default(),
            vec![],
            Box::new(StubClassifier {
                label,
                confidence: 0.9,
            }),
        )
    }

    #[test]
    fn allowed_armor_is_detected() {
        let mut detector = detector_with(Labels::Infantry3);
        let imu = ImuSample::zero(Instant::now());
        let detections = detector.detect(&armor_scene(), &imu, Instant::now());
        assert_eq!(detections.len(), 1);
        let det = &detections[0];
        assert_eq!(det.label, Labels::Infantry3);
        assert_eq!(det.size, ArmorSize::Small);
        let [tl, tr, br, bl] = det.vertices;
        assert!(tl.x < tr.x && tl.y < bl.y && tr.y < br.y);
        assert!((det.center.x - 192.0).abs() < 5.0);
        assert!((det.center.y - 148.0).abs() < 5.0);
    }

    #[test]
    fn shoot_decision_filters_detections() {
        let mut detector = detector_with(Labels::Infantry3);
        let mut imu = ImuSample::zero(Instant::now());
        imu.shoot_decision = ShootDecision::allow(Labels::Hero);
        let detections = detector.detect(&armor_scene(), &imu, Instant::now());
        assert!(detections.is_empty());
    }

    #[test]
    fn unclassified_armor_is_dropped() {
        let mut detector = detector_with(Labels::None);
        let imu = ImuSample::zero(Instant::now());
        assert!(detector
            .detect(&armor_scene(), &imu, Instant::now())
            .is_empty());
    }

    #[test]
    fn ignore_list_drops_detections() {
        let mut detector = Detector::new(
            DetectorConfig::default(),
            vec![Labels::Infantry3],
            Box::new(StubClassifier {
                label: Labels::Infantry3,
                confidence: 0.9,
            }),
        );
        let imu = ImuSample::zero(Instant::now());
        assert!(detector
            .detect(&armor_scene(), &imu, Instant::now())
            .is_empty());
    }

    #[test]
    fn empty_frame_yields_empty_vector() {
        let mut detector = detector_with(Labels::Infantry3);
        let imu = ImuSample::zero(Instant::now());
        let black = RgbImage::new(400, 300);
        assert!(detector.detect(&black, &imu, Instant::now()).is_empty());
    }

    #[test]
    fn digit_patch_sees_the_region_between_the_bars() {
        let cfg = DetectorConfig::default();
        let scene = armor_scene();
        let bars = crate::lightbar::find_lightbars(
            &scene,
            cfg.enemy_color,
            cfg.brightness_threshold,
            cfg.color_threshold,
            &cfg.lightbar,
        );
        let armors = crate::armor::pair_armors(&bars, &cfg.armor);
        assert_eq!(armors.len(), 1);

        // Paint a bright panel between the two bars, taller than the
        // plate, and unwarp: the patch center must be bright while the
        // corners (outside the panel) stay dark.
        let mut gray = GrayImage::new(400, 300);
        for y in 80..220u32 {
            for x in 160..230u32 {
                gray.put_pixel(x, y, image::Luma([255u8]));
            }
        }
        let patch = crate::classifier::extract_digit_patch(&gray, &armors[0]).unwrap();
        assert_eq!(patch.dimensions(), (PATCH_SIZE, PATCH_SIZE));
        assert!(patch.get_pixel(PATCH_SIZE / 2, PATCH_SIZE / 2).0[0] > 200);
    }
}
