//! Constant-velocity smoothing for tracked corner positions.
//!
//! One filter per quad corner: state [x, y, vx, vy] with unit frame time,
//! measurements are raw 2-D corner positions. The tracker corrects with the
//! measured corner first, then reports the one-step prediction.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Matrix4x2, Point2, Vector2, Vector4};

const PROCESS_NOISE: f32 = 0.03;
const MEASUREMENT_NOISE: f32 = 0.1;

#[derive(Clone, Debug)]
pub struct PointKalman {
    x: Vector4<f32>,
    p: Matrix4<f32>,
}

impl PointKalman {
    /// Start at `pos` with zero velocity and identity covariance.
    pub fn new(pos: Point2<f32>) -> Self {
        Self {
            x: Vector4::new(pos.x, pos.y, 0.0, 0.0),
            p: Matrix4::identity(),
        }
    }

    #[inline]
    fn transition() -> Matrix4<f32> {
        Matrix4::new(
            1.0, 0.0, 1.0, 0.0, //
            0.0, 1.0, 0.0, 1.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        )
    }

    #[inline]
    fn observation() -> Matrix2x4<f32> {
        Matrix2x4::new(
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0,
        )
    }

    /// Measurement update with an observed corner position.
    pub fn correct(&mut self, measured: Point2<f32>) {
        let h = Self::observation();
        let r = Matrix2::identity() * MEASUREMENT_NOISE;

        let z = Vector2::new(measured.x, measured.y);
        let innovation = z - h * self.x;
        let s = h * self.p * h.transpose() + r;
        let Some(s_inv) = s.try_inverse() else {
            return;
        };
        let gain: Matrix4x2<f32> = self.p * h.transpose() * s_inv;

        self.x += gain * innovation;
        self.p = (Matrix4::identity() - gain * h) * self.p;
    }

    /// Time update; returns the predicted position.
    pub fn predict(&mut self) -> Point2<f32> {
        let f = Self::transition();
        let q = Matrix4::identity() * PROCESS_NOISE;

        self.x = f * self.x;
        self.p = f * self.p * f.transpose() + q;
        Point2::new(self.x[0], self.x[1])
    }

    #[inline]
    pub fn position(&self) -> Point2<f32> {
        Point2::new(self.x[0], self.x[1])
    }

    #[inline]
    pub fn velocity(&self) -> Vector2<f32> {
        Vector2::new(self.x[2], self.x[3])
    }
}
