use nalgebra::{DMatrix, Matrix3, Point2, Rotation3, Vector3, U2};
use opencv_ros_camera::RosOpenCvIntrinsics;

use crate::{Error, Result};

/// Recover the pose of a planar target from four image points.
///
/// The object points live in the target plane (z = 0); the solution is the
/// classic planar case: undistort, normalize, DLT the 4-point homography,
/// then decompose it into a rotation and translation with positive depth.
/// Returns the target pose in the camera frame, translation in the units of
/// the object points.
pub fn solve_planar_pnp(
    object_xy: &[Point2<f64>; 4],
    image_pts: &[Point2<f64>; 4],
    intrinsics: &RosOpenCvIntrinsics<f64>,
) -> Result<(Rotation3<f64>, Vector3<f64>)> {
    // Undistort all four observations in one call.
    let mut distorted = nalgebra::OMatrix::<f64, nalgebra::U4, U2>::zeros();
    for (i, p) in image_pts.iter().enumerate() {
        distorted[(i, 0)] = p.x;
        distorted[(i, 1)] = p.y;
    }
    let undistorted = intrinsics.undistort(&cam_geom::Pixels { data: distorted });

    let fx = intrinsics.p[(0, 0)];
    let fy = intrinsics.p[(1, 1)];
    let cx = intrinsics.p[(0, 2)];
    let cy = intrinsics.p[(1, 2)];

    // DLT for the homography taking object-plane coordinates to normalized
    // image coordinates: two rows per correspondence.
    let mut a = DMatrix::<f64>::zeros(8, 9);
    for i in 0..4 {
        let (ox, oy) = (object_xy[i].x, object_xy[i].y);
        let nx = (undistorted.data[(i, 0)] - cx) / fx;
        let ny = (undistorted.data[(i, 1)] - cy) / fy;
        let row_x = [-ox, -oy, -1.0, 0.0, 0.0, 0.0, nx * ox, nx * oy, nx];
        let row_y = [0.0, 0.0, 0.0, -ox, -oy, -1.0, ny * ox, ny * oy, ny];
        for (j, (vx, vy)) in row_x.iter().zip(row_y.iter()).enumerate() {
            a[(2 * i, j)] = *vx;
            a[(2 * i + 1, j)] = *vy;
        }
    }

    let svd = a.svd(true, true);
    let v_t = svd.v_t.ok_or(Error::SvdFailed)?;
    let h = v_t.row(v_t.nrows() - 1);
    let hmat = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let h1 = hmat.column(0).into_owned();
    let h2 = hmat.column(1).into_owned();
    let h3 = hmat.column(2).into_owned();

    let n1 = h1.norm();
    let n2 = h2.norm();
    if n1 <= f64::EPSILON || n2 <= f64::EPSILON {
        return Err(Error::DegenerateTarget);
    }
    let mut lambda = 2.0 / (n1 + n2);
    // The plate is in front of the camera.
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let approx_r = Matrix3::from_columns(&[r1, r2, r3]);

    // Nearest rotation matrix in the Frobenius sense.
    let svd_r = approx_r.svd(true, true);
    let u = svd_r.u.ok_or(Error::SvdFailed)?;
    let vt = svd_r.v_t.ok_or(Error::SvdFailed)?;
    let mut sigma = Matrix3::identity();
    sigma[(2, 2)] = (u * vt).determinant().signum();
    let r = Rotation3::from_matrix_unchecked(u * sigma * vt);

    let t = h3 * lambda;
    Ok((r, t))
}
