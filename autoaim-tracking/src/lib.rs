//! Per-target tracking.
//!
//! One [`TargetTracker`] exists per non-`None` label for the lifetime of
//! the process. Each runs a constant-velocity linear Kalman filter over
//! pose and attitude, a Fitting/Tracking/TemporaryLost/Lost status machine
//! driven by update success and a polled watchdog, and produces the
//! time-of-flight-compensated aim prediction used by fire control.

use std::time::Instant;

use adskalman::{CovarianceUpdateMethod, ObservationModel, StateAndCovariance,
    TransitionModelLinearNoControl};
use nalgebra::{OMatrix, OVector, Point3, U10, U8};
use rand::Rng;
use tracing::{debug, trace};

use autoaim_config_data::TrackingConfig;
use autoaim_types::{Detection3D, Labels, TrackingStatus, RAD2DEG};

mod lowpass;
mod models;

pub use lowpass::LowPassFilter;
pub use models::{ConstantVelocityModel, PoseVelocityObservationModel, OBS_DIM, STATE_DIM};

/// Output-yaw smoothing factor.
const YAW_LOWPASS_ALPHA: f64 = 0.75;

/// Standard deviation of the randomized initial filter state.
const INITIAL_STATE_STD: f64 = 0.1;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("observation is not newer than the last accepted update")]
    OutOfOrder,
    #[error("kalman update failed: {0}")]
    Kalman(String),
}

/// Where to point the gun, extrapolated over the bullet time of flight.
#[derive(Debug, Clone, Copy)]
pub struct PredictedAim {
    pub label: Labels,
    /// Predicted armor center in the barrel frame at impact time, meters.
    pub position: Point3<f64>,
    pub distance: f64,
    /// Predicted armor facing, radians.
    pub direction: f64,
    pub pitch_deg: f64,
    /// Low-pass-filtered output yaw, degrees.
    pub yaw_deg: f64,
}

pub struct TargetTracker {
    label: Labels,
    cfg: TrackingConfig,
    fire_time_delay: f64,
    motion: ConstantVelocityModel,
    observation: PoseVelocityObservationModel,
    estimate: StateAndCovariance<f64, U10>,
    status: TrackingStatus,
    consecutive_updates: u32,
    last_update: Option<Instant>,
    last_detection: Option<Detection3D>,
    yaw_filter: LowPassFilter,
}

impl TargetTracker {
    pub fn new(label: Labels, cfg: &TrackingConfig, fire_time_delay: f64) -> TargetTracker {
        let mut tracker = TargetTracker {
            label,
            cfg: cfg.clone(),
            fire_time_delay,
            motion: ConstantVelocityModel::new(cfg.dt, cfg.q),
            observation: PoseVelocityObservationModel::new(cfg.r),
            estimate: StateAndCovariance::new(
                OVector::<f64, U10>::zeros(),
                OMatrix::<f64, U10, U10>::identity(),
            ),
            status: TrackingStatus::Lost,
            consecutive_updates: 0,
            last_update: None,
            last_detection: None,
            yaw_filter: LowPassFilter::new(YAW_LOWPASS_ALPHA),
        };
        tracker.reinitialize();
        tracker
    }

    pub fn label(&self) -> Labels {
        self.label
    }

    pub fn status(&self) -> TrackingStatus {
        self.status
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    pub fn last_detection(&self) -> Option<&Detection3D> {
        self.last_detection.as_ref()
    }

    /// Posterior filter state, `[x y z direction pitch vx vy vz vdir vpitch]`.
    pub fn state(&self) -> &OVector<f64, U10> {
        self.estimate.state()
    }

    fn reinitialize(&mut self) {
        let mut rng = rand::rng();
        let normal = rand_distr::Normal::new(0.0, INITIAL_STATE_STD).unwrap();
        let state = OVector::<f64, U10>::from_fn(|_, _| rng.sample(normal));
        self.estimate = StateAndCovariance::new(state, OMatrix::<f64, U10, U10>::identity());
        self.consecutive_updates = 0;
        self.last_update = None;
        self.last_detection = None;
        self.yaw_filter.reset();
    }

    fn build_observation(&self, det: &Detection3D) -> OVector<f64, U8> {
        let c = det.center_barrel;
        let (vx, vy, vz) = match (&self.last_detection, self.last_update) {
            (Some(prev), Some(prev_t)) => {
                let dt = det
                    .detection
                    .capture_time
                    .duration_since(prev_t)
                    .as_secs_f64();
                if dt > 0.0 {
                    let clamp = |v: f64| v.clamp(-self.cfg.max_speed, self.cfg.max_speed);
                    (
                        clamp((c.x - prev.center_barrel.x) / dt),
                        clamp((c.y - prev.center_barrel.y) / dt),
                        clamp((c.z - prev.center_barrel.z) / dt),
                    )
                } else {
                    (0.0, 0.0, 0.0)
                }
            }
            _ => (0.0, 0.0, 0.0),
        };
        OVector::<f64, U8>::from_column_slice(&[
            c.x,
            c.y,
            c.z,
            vx,
            vy,
            vz,
            det.direction,
            det.pitch,
        ])
    }

    /// Fold a matching detection into the filter and produce the aim
    /// prediction. Out-of-order observations are discarded.
    pub fn update(&mut self, det: &Detection3D) -> Result<PredictedAim> {
        if let Some(last) = self.last_update {
            if det.detection.capture_time <= last {
                return Err(Error::OutOfOrder);
            }
        }
        if self.status == TrackingStatus::Lost {
            self.reinitialize();
            self.status = TrackingStatus::Fitting;
            debug!("{} tracker: lost -> fitting", self.label);
        }

        let observation = self.build_observation(det);
        let prior = self.motion.predict(&self.estimate);
        let posterior = self
            .observation
            .update(&prior, &observation, CovarianceUpdateMethod::JosephForm)
            .map_err(|e| Error::Kalman(format!("{e}")))?;
        self.estimate = posterior;
        self.last_update = Some(det.detection.capture_time);
        self.last_detection = Some(det.clone());
        self.consecutive_updates += 1;

        match self.status {
            TrackingStatus::Fitting if self.consecutive_updates >= self.cfg.fit_count => {
                self.status = TrackingStatus::Tracking;
                debug!("{} tracker: fitting -> tracking", self.label);
            }
            TrackingStatus::TemporaryLost => {
                self.status = TrackingStatus::Tracking;
                debug!("{} tracker: temporary lost -> tracking", self.label);
            }
            _ => {}
        }

        Ok(self.predict_aim(det))
    }

    fn predict_aim(&mut self, det: &Detection3D) -> PredictedAim {
        let s = self.estimate.state();
        let t_fly = det.bullet_tof + self.fire_time_delay;
        let position = Point3::new(
            s[0] + s[5] * t_fly,
            s[1] + s[6] * t_fly,
            s[2] + s[7] * t_fly,
        );
        let direction = s[3] + s[8] * t_fly;
        let pitch = s[4] + s[9] * t_fly;
        let yaw_deg = self
            .yaw_filter
            .filter(position.y.atan2(position.x) * RAD2DEG);
        trace!(
            "{} aim: ({:.2}, {:.2}, {:.2}) yaw {:.2} deg",
            self.label,
            position.x,
            position.y,
            position.z,
            yaw_deg,
        );
        PredictedAim {
            label: self.label,
            position,
            distance: position.coords.norm(),
            direction,
            pitch_deg: pitch * RAD2DEG,
            yaw_deg,
        }
    }

    /// Watchdog poll. Demotes Tracking to TemporaryLost after the short
    /// timeout and any active status to Lost (with a filter reset) after
    /// the long one.
    pub fn check_status(&mut self, now: Instant) {
        if self.status == TrackingStatus::Lost {
            return;
        }
        let Some(last) = self.last_update else {
            return;
        };
        let elapsed = now.saturating_duration_since(last).as_secs_f64();
        if elapsed > self.cfg.lost_timeout_long {
            debug!("{} tracker: lost after {:.2} s silence", self.label, elapsed);
            self.status = TrackingStatus::Lost;
            self.reinitialize();
        } else if elapsed > self.cfg.lost_timeout_short
            && self.status == TrackingStatus::Tracking
        {
            debug!("{} tracker: temporarily lost", self.label);
            self.status = TrackingStatus::TemporaryLost;
        }
    }
}
