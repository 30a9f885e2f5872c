use crate::{CameraIntrinsics, EssentialMatrix};
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use sfm_core::nalgebra::Matrix3;
use sfm_core::sample_consensus::Model;
use sfm_core::{FeatureMatch, KeyPoint};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The fundamental matrix `F` relating two uncalibrated images:
///
/// ```text
/// transpose(x') * F * x = 0
/// ```
///
/// where `x` and `x'` are homogeneous pixel coordinates in the first and second image.
/// The constraint only holds for undistorted pixels, see [`CameraIntrinsics::undistort`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct FundamentalMatrix(pub Matrix3<f64>);

impl FundamentalMatrix {
    /// The algebraic epipolar error `x'ᵗ F x`.
    pub fn epipolar_error(&self, a: KeyPoint, b: KeyPoint) -> f64 {
        (b.to_homogeneous().transpose() * self.0 * a.to_homogeneous())[0]
    }

    /// The Sampson distance of a correspondence, a first order approximation of the squared
    /// geometric reprojection error in pixels.
    pub fn sampson_distance(&self, a: KeyPoint, b: KeyPoint) -> f64 {
        let a = a.to_homogeneous();
        let b = b.to_homogeneous();
        let error = (b.transpose() * self.0 * a)[0];
        let line_b = self.0 * a;
        let line_a = self.0.transpose() * b;
        let denominator = line_b.x * line_b.x
            + line_b.y * line_b.y
            + line_a.x * line_a.x
            + line_a.y * line_a.y;
        if denominator > 0.0 {
            error * error / denominator
        } else if error == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    }

    /// Scales the matrix to unit Frobenius norm. Fundamental matrices are only defined up to scale.
    #[must_use]
    pub fn normalize(self) -> Self {
        let norm = self.0.norm();
        if norm > 0.0 {
            Self(self.0 / norm)
        } else {
            self
        }
    }

    /// Upgrades to the essential matrix `E = K₂ᵗ F K₁` given the intrinsics of both images.
    pub fn essential(
        &self,
        first: &CameraIntrinsics,
        second: &CameraIntrinsics,
    ) -> EssentialMatrix {
        EssentialMatrix(second.matrix().transpose() * self.0 * first.matrix())
    }
}

impl Model<FeatureMatch<KeyPoint>> for FundamentalMatrix {
    fn residual(&self, data: &FeatureMatch<KeyPoint>) -> f64 {
        let &FeatureMatch(a, b) = data;
        self.sampson_distance(a, b)
    }
}
