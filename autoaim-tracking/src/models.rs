//! Kalman filter models for target tracking.
//!
//! The state vector is
//! `[x, y, z, direction, pitch, vx, vy, vz, v_direction, v_pitch]`
//! in the barrel frame; the observation vector is
//! `[x, y, z, vx, vy, vz, direction, pitch]`, with the velocities
//! finite-differenced by the tracker before the update.

use adskalman::{ObservationModel, TransitionModelLinearNoControl};
use nalgebra::{OMatrix, U10, U8};

/// Number of state dimensions.
pub const STATE_DIM: usize = 10;
/// Number of observation dimensions.
pub const OBS_DIM: usize = 8;

/// Constant-velocity transition: each pose row integrates its paired
/// velocity row over `dt`; identity otherwise. Process noise is `q·I`.
#[derive(Debug, Clone)]
pub struct ConstantVelocityModel {
    transition_model: OMatrix<f64, U10, U10>,
    transition_model_transpose: OMatrix<f64, U10, U10>,
    transition_noise_covariance: OMatrix<f64, U10, U10>,
}

impl ConstantVelocityModel {
    pub fn new(dt: f64, q: f64) -> ConstantVelocityModel {
        let mut f = OMatrix::<f64, U10, U10>::identity();
        for pose_row in 0..5 {
            f[(pose_row, pose_row + 5)] = dt;
        }
        ConstantVelocityModel {
            transition_model_transpose: f.transpose(),
            transition_model: f,
            transition_noise_covariance: OMatrix::<f64, U10, U10>::identity() * q,
        }
    }
}

#[allow(non_snake_case)]
impl TransitionModelLinearNoControl<f64, U10> for ConstantVelocityModel {
    fn F(&self) -> &OMatrix<f64, U10, U10> {
        &self.transition_model
    }
    fn FT(&self) -> &OMatrix<f64, U10, U10> {
        &self.transition_model_transpose
    }
    fn Q(&self) -> &OMatrix<f64, U10, U10> {
        &self.transition_noise_covariance
    }
}

/// Linear observation of position, finite-differenced velocity, direction
/// and pitch. Measurement noise is `r·I`.
#[derive(Debug, Clone)]
pub struct PoseVelocityObservationModel {
    observation_matrix: OMatrix<f64, U8, U10>,
    observation_matrix_transpose: OMatrix<f64, U10, U8>,
    observation_noise_covariance: OMatrix<f64, U8, U8>,
}

impl PoseVelocityObservationModel {
    pub fn new(r: f64) -> PoseVelocityObservationModel {
        let mut h = OMatrix::<f64, U8, U10>::zeros();
        h[(0, 0)] = 1.0; // x
        h[(1, 1)] = 1.0; // y
        h[(2, 2)] = 1.0; // z
        h[(3, 5)] = 1.0; // vx
        h[(4, 6)] = 1.0; // vy
        h[(5, 7)] = 1.0; // vz
        h[(6, 3)] = 1.0; // direction
        h[(7, 4)] = 1.0; // pitch
        PoseVelocityObservationModel {
            observation_matrix_transpose: h.transpose(),
            observation_matrix: h,
            observation_noise_covariance: OMatrix::<f64, U8, U8>::identity() * r,
        }
    }
}

#[allow(non_snake_case)]
impl ObservationModel<f64, U10, U8> for PoseVelocityObservationModel {
    fn H(&self) -> &OMatrix<f64, U8, U10> {
        &self.observation_matrix
    }
    fn HT(&self) -> &OMatrix<f64, U10, U8> {
        &self.observation_matrix_transpose
    }
    fn R(&self) -> &OMatrix<f64, U8, U8> {
        &self.observation_noise_covariance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adskalman::StateAndCovariance;
    use approx::assert_relative_eq;
    use nalgebra::OVector;

    #[test]
    fn transition_integrates_velocity() {
        let model = ConstantVelocityModel::new(0.1, 0.0);
        let mut state = OVector::<f64, U10>::zeros();
        state[0] = 1.0; // x
        state[5] = 2.0; // vx
        state[3] = 0.5; // direction
        state[8] = -1.0; // v_direction
        let est = StateAndCovariance::new(state, OMatrix::<f64, U10, U10>::identity());
        let next = model.predict(&est);
        assert_relative_eq!(next.state()[0], 1.2);
        assert_relative_eq!(next.state()[3], 0.4);
        assert_relative_eq!(next.state()[5], 2.0);
    }

    #[test]
    fn observation_matrix_picks_the_right_rows() {
        let model = PoseVelocityObservationModel::new(0.1);
        let mut state = OVector::<f64, U10>::zeros();
        for i in 0..STATE_DIM {
            state[i] = i as f64;
        }
        let expected = model.predict_observation(&state);
        // [x y z vx vy vz direction pitch]
        let want = [0.0, 1.0, 2.0, 5.0, 6.0, 7.0, 3.0, 4.0];
        for i in 0..OBS_DIM {
            assert_relative_eq!(expected[i], want[i]);
        }
    }
}
