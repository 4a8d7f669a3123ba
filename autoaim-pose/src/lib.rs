//! Pose recovery: lift 2-D armor detections into the barrel frame.
//!
//! The chain is armor → camera → IMU → base → barrel. The armor→camera
//! edge comes from planar PnP on the four plate vertices; camera→IMU and
//! base→barrel are static calibration; IMU→base is rotation-only, rebuilt
//! from the attitude sample fused with each frame. All edges are rigid
//! `Isometry3`s, so no scaling can enter anywhere in the chain.

use nalgebra::{Isometry3, Point2, Point3, Rotation3, Translation3, UnitQuaternion, Vector3, Vector5};
use opencv_ros_camera::{Distortion, RosOpenCvIntrinsics};
use tracing::trace;

use autoaim_config_data::{FireConfig, TransformConfig};
use autoaim_types::{ArmorSize, Detection2D, Detection3D, ImuSample, DEG2RAD};

mod frames;
mod pnp;

pub use frames::{FrameGraph, FrameId};
pub use pnp::solve_planar_pnp;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("SVD failed")]
    SvdFailed,
    #[error("degenerate target geometry")]
    DegenerateTarget,
}

/// Build `Rz(rz)·Ry(ry)·Rx(rx)` from `[rx, ry, rz]` in radians.
fn euler_xyz(angles: &[f64; 3]) -> Rotation3<f64> {
    Rotation3::from_euler_angles(angles[0], angles[1], angles[2])
}

fn isometry(t: &[f64; 3], r: Rotation3<f64>) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(t[0], t[1], t[2]),
        UnitQuaternion::from_rotation_matrix(&r),
    )
}

/// Rotation-only IMU→base transform from an attitude sample, composed as
/// `Rz(yaw)·Ry(pitch)·Rx(roll)`.
pub fn imu_to_base(imu: &ImuSample) -> Isometry3<f64> {
    let r = Rotation3::from_euler_angles(
        imu.roll_deg * DEG2RAD,
        imu.pitch_deg * DEG2RAD,
        imu.yaw_deg * DEG2RAD,
    );
    Isometry3::from_parts(
        Translation3::identity(),
        UnitQuaternion::from_rotation_matrix(&r),
    )
}

/// Projectile travel time to a target.
///
/// `theta_imu` is the gimbal pitch, `theta_pnp` the vertical angle of the
/// target in the camera frame, both radians.
pub fn bullet_time_of_flight(
    distance: f64,
    theta_imu: f64,
    theta_pnp: f64,
    bullet_velocity: f64,
) -> f64 {
    distance * (theta_imu.abs() - theta_pnp.abs()).cos() / (bullet_velocity * theta_imu.cos())
}

/// Stateless converter from `Detection2D` to `Detection3D`.
pub struct PoseConverter {
    intrinsics: RosOpenCvIntrinsics<f64>,
    camera_to_imu: Isometry3<f64>,
    camera_to_barrel: Isometry3<f64>,
    base_to_barrel: Isometry3<f64>,
    bullet_velocity: f64,
    small_armor_m: (f64, f64),
    large_armor_m: (f64, f64),
}

impl PoseConverter {
    pub fn new(tf: &TransformConfig, fire: &FireConfig) -> PoseConverter {
        let k = &tf.camera_matrix;
        let intrinsics = RosOpenCvIntrinsics::from_params_with_distortion(
            k[0],
            k[1],
            k[4],
            k[2],
            k[5],
            Distortion::from_opencv_vec(Vector5::new(
                tf.distortion[0],
                tf.distortion[1],
                tf.distortion[2],
                tf.distortion[3],
                tf.distortion[4],
            )),
        );
        PoseConverter {
            intrinsics,
            camera_to_imu: isometry(&tf.camera_to_imu_t, euler_xyz(&tf.camera_to_imu_r)),
            camera_to_barrel: isometry(&tf.camera_to_barrel_t, Rotation3::identity()),
            base_to_barrel: isometry(&tf.base_to_barrel_t, euler_xyz(&tf.base_to_barrel_r)),
            bullet_velocity: fire.bullet_velocity,
            small_armor_m: fire.armor_size_m(false),
            large_armor_m: fire.armor_size_m(true),
        }
    }

    /// The static edges of the five-frame system. The armor→camera and
    /// IMU→base edges vary per detection and are registered by the caller.
    pub fn static_graph(&self) -> FrameGraph {
        let mut graph = FrameGraph::new();
        graph.register(FrameId::Camera, FrameId::Imu, self.camera_to_imu);
        graph.register(FrameId::Camera, FrameId::Barrel, self.camera_to_barrel);
        graph.register(FrameId::Base, FrameId::Barrel, self.base_to_barrel);
        graph
    }

    /// Armor-in-barrel for a given armor-in-camera pose and attitude.
    pub fn barrel_from_armor(
        &self,
        armor_to_camera: &Isometry3<f64>,
        imu: &ImuSample,
    ) -> Isometry3<f64> {
        self.base_to_barrel * imu_to_base(imu) * self.camera_to_imu * armor_to_camera
    }

    pub fn convert(&self, detection: Detection2D) -> Result<Detection3D> {
        let (w, h) = match detection.size {
            ArmorSize::Small => self.small_armor_m,
            ArmorSize::Large => self.large_armor_m,
        };
        let (half_w, half_h) = (w / 2.0, h / 2.0);
        // Canonical plate corners in the armor frame (x right, y down,
        // z out of the plate), ordered TL, TR, BR, BL like the vertices.
        let object_xy = [
            Point2::new(-half_w, -half_h),
            Point2::new(half_w, -half_h),
            Point2::new(half_w, half_h),
            Point2::new(-half_w, half_h),
        ];

        let (r_ac, t_ac) = solve_planar_pnp(&object_xy, &detection.vertices, &self.intrinsics)?;
        let armor_to_camera = Isometry3::from_parts(
            Translation3::from(t_ac),
            UnitQuaternion::from_rotation_matrix(&r_ac),
        );

        let barrel = self.barrel_from_armor(&armor_to_camera, &detection.imu);
        let center = barrel * Point3::origin();
        let rot = barrel.rotation.to_rotation_matrix();
        let rot = rot.matrix();
        let distance = center.coords.norm();
        let direction = rot[(1, 0)].atan2(rot[(0, 0)]);
        let pitch = center.z.atan2(center.x.hypot(center.y));

        // Relative aim straight from the armor-in-camera translation; the
        // small camera/barrel offset is ignored at aiming distances.
        let yaw_to_barrel = -t_ac.x.atan2(t_ac.z);
        let pitch_to_barrel = -t_ac.y.atan2(t_ac.z);

        let theta_imu = detection.imu.pitch_deg * DEG2RAD;
        let theta_pnp = t_ac.y.atan2(t_ac.z);
        let bullet_tof =
            bullet_time_of_flight(distance, theta_imu, theta_pnp, self.bullet_velocity);

        trace!(
            "armor {:?} at {:.2} m, direction {:.1} deg, tof {:.0} ms",
            detection.label,
            distance,
            direction * autoaim_types::RAD2DEG,
            bullet_tof * 1e3,
        );

        Ok(Detection3D {
            rvec: r_ac.scaled_axis(),
            tvec: t_ac,
            center_barrel: center,
            distance,
            direction,
            pitch,
            pitch_to_barrel,
            yaw_to_barrel,
            bullet_tof,
            detection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::time::Instant;

    use autoaim_types::{ImuSample, Labels, LightBarGeom};

    fn frontal_detection(center_px: Point2<f64>, distance: f64) -> Detection2D {
        // Synthesize the image of a small plate facing the camera at the
        // given distance, centered on `center_px`.
        let tf = TransformConfig::default();
        let fx = tf.camera_matrix[0];
        let fy = tf.camera_matrix[4];
        let half_w_px = 0.0675 / distance * fx;
        let half_h_px = 0.028 / distance * fy;
        let vertices = [
            Point2::new(center_px.x - half_w_px, center_px.y - half_h_px),
            Point2::new(center_px.x + half_w_px, center_px.y - half_h_px),
            Point2::new(center_px.x + half_w_px, center_px.y + half_h_px),
            Point2::new(center_px.x - half_w_px, center_px.y + half_h_px),
        ];
        let bar = LightBarGeom {
            center: center_px,
            long_axis: 2.0 * half_h_px,
            short_axis: 4.0,
            angle_deg: 0.0,
            ellipse_area: 8.0 * half_h_px,
        };
        Detection2D {
            left: bar,
            right: bar,
            vertices,
            center: center_px,
            size: ArmorSize::Small,
            label: Labels::Infantry3,
            confidence: 0.99,
            imu: ImuSample::zero(Instant::now()),
            capture_time: Instant::now(),
        }
    }

    #[test]
    fn frontal_target_maps_forward_in_barrel_frame() {
        let converter = PoseConverter::new(&TransformConfig::default(), &FireConfig::default());
        let det = frontal_detection(Point2::new(640.0, 512.0), 3.0);
        let d3 = converter.convert(det).unwrap();
        // Optical axis target: straight ahead of the barrel.
        assert_relative_eq!(d3.distance, 3.0, epsilon = 1e-3);
        assert!(d3.center_barrel.x > 2.9, "x = {}", d3.center_barrel.x);
        assert_relative_eq!(d3.yaw_to_barrel, 0.0, epsilon = 1e-6);
        assert_relative_eq!(d3.pitch_to_barrel, 0.0, epsilon = 1e-6);
        // Zero gimbal pitch, target on axis: tof is just d / v.
        assert_relative_eq!(d3.bullet_tof, 3.0 / 25.0, epsilon = 1e-4);
    }

    #[test]
    fn off_axis_target_has_signed_relative_aim() {
        let converter = PoseConverter::new(&TransformConfig::default(), &FireConfig::default());
        // Target to the right of and above the image center.
        let det = frontal_detection(Point2::new(740.0, 412.0), 3.0);
        let d3 = converter.convert(det).unwrap();
        assert!(d3.yaw_to_barrel < 0.0, "right of axis turns yaw negative");
        assert!(d3.pitch_to_barrel > 0.0, "above axis turns pitch positive");
    }

    #[test]
    fn conversion_chain_matches_frame_graph() {
        let converter = PoseConverter::new(&TransformConfig::default(), &FireConfig::default());
        let mut imu = ImuSample::zero(Instant::now());
        imu.yaw_deg = 15.0;
        imu.pitch_deg = -4.0;
        imu.roll_deg = 1.0;

        let armor_to_camera = Isometry3::from_parts(
            Translation3::new(0.2, -0.1, 2.5),
            UnitQuaternion::from_euler_angles(0.05, 0.4, -0.03),
        );

        let chain = converter.barrel_from_armor(&armor_to_camera, &imu);

        // The graph route goes armor → camera → imu → base → barrel and
        // must agree with the direct composition.
        let mut graph = FrameGraph::new();
        graph.register(FrameId::Armor, FrameId::Camera, armor_to_camera);
        graph.register(FrameId::Camera, FrameId::Imu, converter.camera_to_imu);
        graph.register(FrameId::Imu, FrameId::Base, imu_to_base(&imu));
        graph.register(FrameId::Base, FrameId::Barrel, converter.base_to_barrel);
        let routed = graph.resolve(FrameId::Armor, FrameId::Barrel).unwrap();

        assert_relative_eq!(
            chain.to_homogeneous(),
            routed.to_homogeneous(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn tof_reduces_to_d_over_v_on_axis() {
        assert_relative_eq!(bullet_time_of_flight(5.0, 0.0, 0.0, 25.0), 0.2);
    }

    #[test]
    fn tof_grows_when_shooting_upward() {
        let level = bullet_time_of_flight(4.0, 0.0, 0.0, 25.0);
        let steep = bullet_time_of_flight(4.0, 0.5, 0.0, 25.0);
        assert!(steep > level);
    }
}
