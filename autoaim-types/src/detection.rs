use std::time::Instant;

use nalgebra::{Point2, Point3, Vector3};

use crate::{ImuSample, Labels};

/// Geometric summary of one accepted lightbar.
///
/// This is a plain record of the fitted ellipse plus derived quantities; the
/// detector keeps the underlying contour to itself.
#[derive(Debug, Clone, Copy)]
pub struct LightBarGeom {
    pub center: Point2<f64>,
    /// Fitted ellipse long axis length, pixels. Always the near-vertical axis.
    pub long_axis: f64,
    pub short_axis: f64,
    /// Tilt from image vertical, degrees, in [-90, 90).
    pub angle_deg: f64,
    pub ellipse_area: f64,
}

/// Physical armor plate size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmorSize {
    Small,
    Large,
}

/// One armor plate found in a single frame, before pose recovery.
///
/// Vertices are ordered TL, TR, BR, BL in image coordinates.
#[derive(Debug, Clone)]
pub struct Detection2D {
    pub left: LightBarGeom,
    pub right: LightBarGeom,
    pub vertices: [Point2<f64>; 4],
    pub center: Point2<f64>,
    pub size: ArmorSize,
    pub label: Labels,
    pub confidence: f64,
    /// The IMU sample fused with this frame at capture time.
    pub imu: ImuSample,
    pub capture_time: Instant,
}

/// A 2-D detection lifted to 3-D, expressed in the barrel frame.
///
/// The barrel frame has x forward along the gun axis, y left, z up, origin
/// at the muzzle. Angles are radians here; degrees appear only at the wire.
#[derive(Debug, Clone)]
pub struct Detection3D {
    pub detection: Detection2D,
    /// Armor pose in the camera frame (axis-angle rotation), meters.
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
    /// Armor center in the barrel frame, meters.
    pub center_barrel: Point3<f64>,
    pub distance: f64,
    /// Yaw of the armor face about vertical, radians.
    pub direction: f64,
    /// Elevation of the armor center above the barrel x-y plane, radians.
    pub pitch: f64,
    pub pitch_to_barrel: f64,
    pub yaw_to_barrel: f64,
    /// Projectile travel time to the armor at the configured muzzle
    /// velocity, seconds.
    pub bullet_tof: f64,
}

impl Detection3D {
    /// Combined angular offset from the barrel axis, used by target
    /// selection as a proximity score.
    pub fn off_axis(&self) -> f64 {
        self.yaw_to_barrel.abs() + self.pitch_to_barrel.abs()
    }
}
