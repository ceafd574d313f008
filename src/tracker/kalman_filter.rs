//! Constant-velocity Kalman filter over a track centroid.
//!
//! State is `[cx, cy, vx, vy]`, the measurement is `[cx, cy]`. Noise scales
//! with the box height so near and far subjects get comparable uncertainty.
//! Matrices are ndarray; the 2x2 innovation inverse goes through nalgebra.

use ndarray::{Array1, Array2};

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    motion_mat: Array2<f64>,
    update_mat: Array2<f64>,
    std_weight_position: f64,
    std_weight_velocity: f64,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl KalmanFilter {
    pub fn new() -> Self {
        let ndim = 2;
        let mut motion_mat = Array2::eye(2 * ndim);
        for i in 0..ndim {
            motion_mat[[i, ndim + i]] = 1.0;
        }

        let mut update_mat = Array2::zeros((ndim, 2 * ndim));
        for i in 0..ndim {
            update_mat[[i, i]] = 1.0;
        }

        Self {
            motion_mat,
            update_mat,
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
        }
    }

    /// Start a new state from a first centroid measurement.
    pub fn initiate(&self, measurement: [f64; 2], height: f64) -> (Array1<f64>, Array2<f64>) {
        let mut mean = Array1::zeros(4);
        mean[0] = measurement[0];
        mean[1] = measurement[1];

        let h = height.max(1.0);
        let std = [
            2.0 * self.std_weight_position * h,
            2.0 * self.std_weight_position * h,
            10.0 * self.std_weight_velocity * h,
            10.0 * self.std_weight_velocity * h,
        ];

        (mean, diagonal(&std))
    }

    pub fn predict(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
        height: f64,
    ) -> (Array1<f64>, Array2<f64>) {
        let h = height.max(1.0);
        let std = [
            self.std_weight_position * h,
            self.std_weight_position * h,
            self.std_weight_velocity * h,
            self.std_weight_velocity * h,
        ];
        let motion_cov = diagonal(&std);

        let new_mean = self.motion_mat.dot(mean);
        let new_covariance = self.motion_mat.dot(covariance).dot(&self.motion_mat.t()) + motion_cov;

        (new_mean, new_covariance)
    }

    fn project(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
        height: f64,
    ) -> (Array1<f64>, Array2<f64>) {
        let h = height.max(1.0);
        let std = [self.std_weight_position * h, self.std_weight_position * h];
        let innovation_cov = diagonal(&std);

        let mean_proj = self.update_mat.dot(mean);
        let covariance_proj =
            self.update_mat.dot(covariance).dot(&self.update_mat.t()) + innovation_cov;

        (mean_proj, covariance_proj)
    }

    /// Correct the state with a measured centroid.
    ///
    /// If the innovation covariance is singular the position snaps to the
    /// measurement and the velocity estimate is kept.
    pub fn update(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
        measurement: [f64; 2],
        height: f64,
    ) -> (Array1<f64>, Array2<f64>) {
        let (projected_mean, projected_cov) = self.project(mean, covariance, height);

        let Some(s_inv) = invert_2x2(&projected_cov) else {
            let mut snapped = mean.clone();
            snapped[0] = measurement[0];
            snapped[1] = measurement[1];
            return (snapped, covariance.clone());
        };

        let innovation = Array1::from_vec(measurement.to_vec()) - projected_mean;

        // K = P * H^T * S^-1
        let pht = covariance.dot(&self.update_mat.t()); // 4x2
        let kalman_gain = pht.dot(&s_inv); // 4x2

        let new_mean = mean + &kalman_gain.dot(&innovation);
        let new_covariance = covariance - &kalman_gain.dot(&projected_cov).dot(&kalman_gain.t());

        (new_mean, new_covariance)
    }
}

fn diagonal(std: &[f64]) -> Array2<f64> {
    let mut cov = Array2::zeros((std.len(), std.len()));
    for (i, s) in std.iter().enumerate() {
        cov[[i, i]] = s * s;
    }
    cov
}

fn invert_2x2(m: &Array2<f64>) -> Option<Array2<f64>> {
    let nm = nalgebra::Matrix2::new(m[[0, 0]], m[[0, 1]], m[[1, 0]], m[[1, 1]]);
    let inv = nm.try_inverse()?;
    let mut res = Array2::zeros((2, 2));
    for i in 0..2 {
        for j in 0..2 {
            res[[i, j]] = inv[(i, j)];
        }
    }
    Some(res)
}
