//! Target selection.
//!
//! Given the detections of one frame and the tracker set, choose the label
//! to engage. Stickiness first: a target we were already engaging is kept
//! as long as it is still seen. Otherwise prefer converged trackers close
//! to the barrel axis, then anything at least fitting.

use std::collections::BTreeMap;

use tracing::debug;

use autoaim_tracking::TargetTracker;
use autoaim_types::{Detection3D, Labels, TrackingStatus};

#[derive(Default)]
pub struct SelectionPolicy {
    previous: Option<Labels>,
}

impl SelectionPolicy {
    pub fn new() -> SelectionPolicy {
        SelectionPolicy::default()
    }

    /// The label selected by the previous successful call, if any.
    pub fn previous(&self) -> Option<Labels> {
        self.previous
    }

    pub fn select(
        &mut self,
        detections: &[Detection3D],
        trackers: &BTreeMap<Labels, TargetTracker>,
    ) -> Option<Labels> {
        let selected = self.choose(detections, trackers);
        if let Some(label) = selected {
            if self.previous != Some(label) {
                debug!("engaging {label}");
            }
            self.previous = Some(label);
        }
        selected
    }

    fn choose(
        &self,
        detections: &[Detection3D],
        trackers: &BTreeMap<Labels, TargetTracker>,
    ) -> Option<Labels> {
        if detections.is_empty() {
            return None;
        }

        // 1. Keep shooting at what we were shooting at.
        if let Some(prev) = self.previous {
            if detections.iter().any(|d| d.detection.label == prev) {
                return Some(prev);
            }
        }

        let status_of = |label: Labels| {
            trackers
                .get(&label)
                .map(|t| t.status())
                .unwrap_or(TrackingStatus::Lost)
        };

        // 2. Converged tracker closest to the barrel axis.
        detections
            .iter()
            .filter(|d| status_of(d.detection.label) == TrackingStatus::Tracking)
            .min_by(|a, b| a.off_axis().total_cmp(&b.off_axis()))
            .map(|d| d.detection.label)
            // 3. Anything still fitting.
            .or_else(|| {
                detections
                    .iter()
                    .find(|d| {
                        matches!(
                            status_of(d.detection.label),
                            TrackingStatus::Tracking | TrackingStatus::Fitting
                        )
                    })
                    .map(|d| d.detection.label)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use autoaim_config_data::TrackingConfig;
    use autoaim_types::{ArmorSize, Detection2D, ImuSample, LightBarGeom};
    use nalgebra::{Point2, Point3, Vector3};

    fn detection(label: Labels, yaw_off: f64, t: Instant) -> Detection3D {
        let bar = LightBarGeom {
            center: Point2::origin(),
            long_axis: 20.0,
            short_axis: 4.0,
            angle_deg: 0.0,
            ellipse_area: 60.0,
        };
        Detection3D {
            detection: Detection2D {
                left: bar,
                right: bar,
                vertices: [Point2::origin(); 4],
                center: Point2::origin(),
                size: ArmorSize::Small,
                label,
                confidence: 0.9,
                imu: ImuSample::zero(t),
                capture_time: t,
            },
            rvec: Vector3::zeros(),
            tvec: Vector3::new(0.0, 0.0, 3.0),
            center_barrel: Point3::new(3.0, 0.0, 0.0),
            distance: 3.0,
            direction: 0.0,
            pitch: 0.0,
            pitch_to_barrel: 0.0,
            yaw_to_barrel: yaw_off,
            bullet_tof: 0.12,
        }
    }

    /// Tracker pushed into the requested status by feeding updates.
    fn tracker_in(label: Labels, status: TrackingStatus, t0: Instant) -> TargetTracker {
        let cfg = TrackingConfig::default();
        let mut tracker = TargetTracker::new(label, &cfg, 0.05);
        let updates = match status {
            TrackingStatus::Lost => 0,
            TrackingStatus::Fitting => 1,
            _ => cfg.fit_count,
        };
        for i in 0..updates {
            tracker
                .update(&detection(
                    label,
                    0.0,
                    t0 + Duration::from_millis(5 * (i as u64 + 1)),
                ))
                .unwrap();
        }
        tracker
    }

    fn map_of(trackers: Vec<TargetTracker>) -> BTreeMap<Labels, TargetTracker> {
        trackers.into_iter().map(|t| (t.label(), t)).collect()
    }

    #[test]
    fn sticks_with_the_previous_target() {
        let t0 = Instant::now();
        let trackers = map_of(vec![
            tracker_in(Labels::Hero, TrackingStatus::Tracking, t0),
            tracker_in(Labels::Infantry3, TrackingStatus::Tracking, t0),
        ]);
        let mut policy = SelectionPolicy::new();
        let now = t0 + Duration::from_secs(1);

        // First frame: only Hero visible.
        let first = [detection(Labels::Hero, 0.4, now)];
        assert_eq!(policy.select(&first, &trackers), Some(Labels::Hero));

        // Second frame: Infantry3 is much closer to the axis, but Hero is
        // still visible and keeps the lock.
        let second = [
            detection(Labels::Hero, 0.4, now),
            detection(Labels::Infantry3, 0.01, now),
        ];
        assert_eq!(policy.select(&second, &trackers), Some(Labels::Hero));
    }

    #[test]
    fn prefers_tracking_target_closest_to_axis() {
        let t0 = Instant::now();
        let trackers = map_of(vec![
            tracker_in(Labels::Hero, TrackingStatus::Tracking, t0),
            tracker_in(Labels::Infantry4, TrackingStatus::Tracking, t0),
        ]);
        let mut policy = SelectionPolicy::new();
        let now = t0 + Duration::from_secs(1);
        let frame = [
            detection(Labels::Hero, 0.5, now),
            detection(Labels::Infantry4, 0.1, now),
        ];
        assert_eq!(policy.select(&frame, &trackers), Some(Labels::Infantry4));
    }

    #[test]
    fn falls_back_to_fitting_trackers() {
        let t0 = Instant::now();
        let trackers = map_of(vec![tracker_in(Labels::Sentry, TrackingStatus::Fitting, t0)]);
        let mut policy = SelectionPolicy::new();
        let frame = [detection(Labels::Sentry, 0.3, t0 + Duration::from_secs(1))];
        assert_eq!(policy.select(&frame, &trackers), Some(Labels::Sentry));
    }

    #[test]
    fn nothing_usable_selects_none() {
        let t0 = Instant::now();
        let trackers = map_of(vec![tracker_in(Labels::Base, TrackingStatus::Lost, t0)]);
        let mut policy = SelectionPolicy::new();
        let frame = [detection(Labels::Base, 0.3, t0)];
        assert_eq!(policy.select(&frame, &trackers), None);
        assert_eq!(policy.previous(), None);

        assert_eq!(policy.select(&[], &trackers), None);
    }
}
