use sfm_core::nalgebra::Vector2;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

const UNDISTORT_ITERATIONS: usize = 20;

/// Brown-Conrady lens distortion with three radial (`k1`, `k2`, `k3`) and two tangential
/// (`p1`, `p2`) coefficients, using the same ordering and conventions as OpenCV.
///
/// Given undistorted normalized coordinates $(x, y)$ and $r^2 = x^2 + y^2$:
///
/// $$
/// \begin{aligned}
/// x' &= x (1 + k_1 r^2 + k_2 r^4 + k_3 r^6) + 2 p_1 x y + p_2 (r^2 + 2 x^2) \\\\
/// y' &= y (1 + k_1 r^2 + k_2 r^4 + k_3 r^6) + p_1 (r^2 + 2 y^2) + 2 p_2 x y
/// \end{aligned}
/// $$
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    /// A lens with no distortion.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(k1: f64, k2: f64, p1: f64, p2: f64, k3: f64) -> Self {
        Self { k1, k2, p1, p2, k3 }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::none()
    }

    /// Applies the distortion to an undistorted normalized image coordinate.
    pub fn distort(&self, point: Vector2<f64>) -> Vector2<f64> {
        if self.is_identity() {
            return point;
        }
        let (x, y) = (point.x, point.y);
        let r2 = point.norm_squared();
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        Vector2::new(
            x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }

    /// Removes the distortion from a distorted normalized image coordinate.
    ///
    /// The model has no closed form inverse, so this runs a fixed-point iteration.
    pub fn undistort(&self, distorted: Vector2<f64>) -> Vector2<f64> {
        if self.is_identity() {
            return distorted;
        }
        let mut point = distorted;
        for _ in 0..UNDISTORT_ITERATIONS {
            let (x, y) = (point.x, point.y);
            let r2 = point.norm_squared();
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            point = Vector2::new((distorted.x - dx) / radial, (distorted.y - dy) / radial);
        }
        point
    }
}
