//! Extended Kalman filter over the planar pose `[x, y, θ]`.
//!
//! Prediction integrates wheel odometry through the differential-drive
//! model; the update step fuses a full pose observation from the overhead
//! camera. The filter itself is clock-free: the owning task supplies `dt`.

use arena_types::{wrap_angle, Pose};
use nalgebra::{Matrix3, Matrix3x2, Vector2, Vector3};

use crate::config::WHEELBASE_CM;

/// Process noise, tuned offline against recorded wheel-slip runs.
const Q_DIAG: [f64; 3] = [0.1, 0.1, 0.05];

/// Camera measurement noise, tuned offline.
const R_DIAG: [f64; 3] = [0.5, 0.5, 0.2];

pub struct Ekf {
    /// State vector `[x_cm, y_cm, θ_rad]`.
    e: Vector3<f64>,
    /// Estimate covariance.
    p: Matrix3<f64>,
    q: Matrix3<f64>,
    r: Matrix3<f64>,
}

impl Ekf {
    pub fn new(initial: Pose) -> Self {
        Self::with_noise(initial, Q_DIAG, R_DIAG)
    }

    pub fn with_noise(initial: Pose, q_diag: [f64; 3], r_diag: [f64; 3]) -> Self {
        Self {
            e: Vector3::new(initial.x, initial.y, initial.theta),
            p: Matrix3::identity(),
            q: Matrix3::from_diagonal(&Vector3::from(q_diag)),
            r: Matrix3::from_diagonal(&Vector3::from(r_diag)),
        }
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.e[0], self.e[1], self.e[2])
    }

    pub fn covariance_trace(&self) -> f64 {
        self.p.trace()
    }

    /// Propagate the estimate by `dt` seconds of wheel odometry.
    /// Wheel speeds are in cm/s.
    pub fn predict(&mut self, v_left: f64, v_right: f64, dt: f64) -> Pose {
        let v_fwd = (v_left + v_right) / 2.0;
        let omega = (v_right - v_left) / WHEELBASE_CM;
        let theta = self.e[2];

        // E ← A·E + B(θ)·u, with A = I₃.
        let b = Matrix3x2::new(
            theta.cos() * dt, 0.0,
            theta.sin() * dt, 0.0,
            0.0, dt,
        );
        let u = Vector2::new(v_fwd, omega);
        self.e += b * u;

        // Motion Jacobian.
        let mut g = Matrix3::identity();
        g[(0, 2)] = -theta.sin() * dt * v_fwd;
        g[(1, 2)] = theta.cos() * dt * v_fwd;
        self.p = g * self.p * g.transpose() + self.q;

        self.e[2] = wrap_angle(self.e[2]);
        self.pose()
    }

    /// Fuse a camera pose observation `[x, y, θ]`.
    pub fn update(&mut self, z: [f64; 3]) -> Pose {
        let h = Matrix3::<f64>::identity();
        let s = h * self.p * h.transpose() + self.r;

        let Some(s_inv) = s.try_inverse() else {
            // Singular innovation covariance cannot happen with positive R;
            // keep the prediction rather than corrupt the estimate.
            return self.pose();
        };
        let k = self.p * h.transpose() * s_inv;

        let mut innovation = Vector3::from(z) - h * self.e;
        innovation[2] = wrap_angle(innovation[2]);

        self.e += k * innovation;
        self.e[2] = wrap_angle(self.e[2]);
        self.p = (Matrix3::identity() - k * h) * self.p;

        self.pose()
    }
}
