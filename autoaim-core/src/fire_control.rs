//! Fire control.
//!
//! Converts the selected tracker's prediction plus the raw detections of
//! the frame into the outgoing [`FireCommand`]. The fire decision is a
//! cone test: shoot only when the predicted angular error is smaller than
//! the angle the armor plate itself subtends at the predicted distance.

use std::time::Instant;

use tracing::{debug, trace};

use autoaim_config_data::FireConfig;
use autoaim_tracking::PredictedAim;
use autoaim_types::{
    ArmorSize, Detection3D, FireCommand, ImuSample, Labels, TrackingStatus, RAD2DEG,
};

/// Everything fire control needs to know about the selected target.
pub struct SelectedTarget {
    pub prediction: PredictedAim,
    pub status: TrackingStatus,
    pub size: ArmorSize,
}

pub struct FireController {
    cfg: FireConfig,
    updated: u8,
    last_fire: Option<Instant>,
}

impl FireController {
    pub fn new(cfg: FireConfig) -> FireController {
        FireController {
            cfg,
            updated: 0,
            last_fire: None,
        }
    }

    /// Build the command for one frame and advance the `updated` counter.
    pub fn command(
        &mut self,
        selected: Option<&SelectedTarget>,
        detections: &[Detection3D],
        imu: Option<&ImuSample>,
        now: Instant,
    ) -> FireCommand {
        let found = match selected {
            Some(target) => detections
                .iter()
                .any(|d| d.detection.label == target.prediction.label),
            None => false,
        };

        let mut fire = false;
        let mut done_fitting = false;
        let (mut pitch_deg, mut yaw_deg) = match imu {
            Some(imu) => (imu.pitch_deg as f32, imu.yaw_deg as f32),
            None => (0.0, 0.0),
        };

        if let Some(target) = selected {
            let aim = &target.prediction;
            pitch_deg = aim.pitch_deg as f32;
            yaw_deg = aim.yaw_deg as f32;

            if found {
                let (w, h) = self.cfg.armor_size_m(target.size == ArmorSize::Large);
                let d = aim.distance;
                let yaw_limit_deg = (w / 2.0 / d).atan() * RAD2DEG;
                let pitch_limit_deg = (h / 2.0 / d).atan() * RAD2DEG;
                let (rel_pitch, rel_yaw) = match imu {
                    Some(imu) => (
                        aim.pitch_deg - imu.pitch_deg,
                        aim.yaw_deg - imu.yaw_deg,
                    ),
                    None => (aim.pitch_deg, aim.yaw_deg),
                };
                fire = rel_pitch.abs() < pitch_limit_deg && rel_yaw.abs() < yaw_limit_deg;
                trace!(
                    "gate: |{:.2}| < {:.2} pitch, |{:.2}| < {:.2} yaw -> fire={}",
                    rel_pitch,
                    pitch_limit_deg,
                    rel_yaw,
                    yaw_limit_deg,
                    fire,
                );
            }

            done_fitting =
                aim.label == Labels::Outpost && target.status == TrackingStatus::Tracking;
        }

        if fire {
            self.last_fire = Some(now);
            debug!("fire at {:.2} / {:.2} deg", pitch_deg, yaw_deg);
        }

        // Patrolling only once the gun has been quiet for a while, so one
        // missed frame does not flip the gimbal into patrol mode.
        let quiet = self
            .last_fire
            .map(|t| now.saturating_duration_since(t).as_secs_f64() >= self.cfg.patrol_cooldown)
            .unwrap_or(true);
        let patrolling = !found && !fire && quiet;

        let updated = self.updated;
        self.updated = 1 - self.updated;

        FireCommand {
            pitch_deg,
            yaw_deg,
            found,
            fire,
            patrolling,
            done_fitting,
            updated,
        }
    }
}
