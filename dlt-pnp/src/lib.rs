//! This package estimates the pose of a calibrated camera from six or more correspondences
//! between pixels and known world points.
//!
//! This problem is generally known as ["Perspective-n-Point" (PnP)][pnp], or camera resectioning.
//! The solver implemented here is the Direct Linear Transform (DLT) from
//! "Multiple View Geometry in Computer Vision" (Hartley and Zisserman, algorithm 7.1), made to
//! respect the known intrinsics:
//!
//!  1. Pixels are converted to normalized image coordinates with the camera intrinsics.
//!  2. World points are translated to their centroid and scaled to a mean distance of `√3`.
//!  3. The `3x4` projection `[R | t]` is the null vector of the `2n x 12` DLT system.
//!  4. The left `3x3` block is projected onto the closest rotation and the common scale
//!     is divided out of the translation.
//!
//! [pnp]: https://en.wikipedia.org/wiki/Perspective-n-Point
#![warn(missing_docs)]

use sfm_core::{
    nalgebra::{Matrix3, OMatrix, OVector, Point3, Rotation3, Vector2, Vector3, SVD, U12},
    sample_consensus::Estimator,
    FeatureWorldMatch, KeyPoint, Pose, Projective, WorldToCamera,
};
use sfm_pinhole::{Camera, CameraIntrinsics};

const MIN_CORRESPONDENCES: usize = 6;

/// Direct linear transform PnP for a camera with the given intrinsics.
///
/// Estimates exactly one [`Camera`] sharing the intrinsics, which is exact for noiseless
/// correspondences in general position. Coplanar world points are degenerate for the DLT.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DltPnp {
    intrinsics: CameraIntrinsics,
    epsilon: f64,
    max_iterations: usize,
}

impl DltPnp {
    /// Creates the solver for images taken with these intrinsics.
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            epsilon: 1e-12,
            max_iterations: 1000,
        }
    }

    /// Set the epsilon used in the eigen and singular value solvers.
    ///
    /// Default is `1e-12`.
    #[must_use]
    pub fn epsilon(self, epsilon: f64) -> Self {
        Self { epsilon, ..self }
    }

    /// Set the maximum number of iterations of the eigen and singular value solvers.
    ///
    /// Default is `1000`.
    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// The intrinsics of the estimated cameras.
    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Estimates the world-to-camera pose from at least six correspondences.
    ///
    /// Returns `None` with too few correspondences, with points at infinity, or when the
    /// configuration is degenerate.
    pub fn pose<I>(&self, data: I) -> Option<WorldToCamera>
    where
        I: Iterator<Item = FeatureWorldMatch<KeyPoint>>,
    {
        let correspondences = data
            .map(|FeatureWorldMatch(keypoint, world)| {
                let normalized = self.intrinsics.normalize(keypoint);
                Some((normalized.coords, world.point()?))
            })
            .collect::<Option<Vec<(Vector2<f64>, Point3<f64>)>>>()?;
        if correspondences.len() < MIN_CORRESPONDENCES {
            return None;
        }

        let count = correspondences.len() as f64;
        let centroid = correspondences
            .iter()
            .map(|(_, world)| world.coords)
            .sum::<Vector3<f64>>()
            / count;
        let mean_distance = correspondences
            .iter()
            .map(|(_, world)| (world.coords - centroid).norm())
            .sum::<f64>()
            / count;
        if mean_distance <= 0.0 || !mean_distance.is_finite() {
            return None;
        }
        let scale = 3.0f64.sqrt() / mean_distance;

        let mut ata = OMatrix::<f64, U12, U12>::zeros();
        for (image, world) in &correspondences {
            let world = ((world.coords - centroid) * scale).push(1.0);
            let mut u_row = OVector::<f64, U12>::zeros();
            u_row.fixed_rows_mut::<4>(0).copy_from(&world);
            u_row.fixed_rows_mut::<4>(8).copy_from(&(-image.x * world));
            let mut v_row = OVector::<f64, U12>::zeros();
            v_row.fixed_rows_mut::<4>(4).copy_from(&world);
            v_row.fixed_rows_mut::<4>(8).copy_from(&(-image.y * world));
            ata += u_row * u_row.transpose() + v_row * v_row.transpose();
        }

        let eigens = ata.try_symmetric_eigen(self.epsilon, self.max_iterations)?;
        let projection = eigens
            .eigenvalues
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| float_ord::FloatOrd(n))
            .map(|(ix, _)| eigens.eigenvectors.column(ix).into_owned())?;

        // Rows of the projection are contiguous in the null vector.
        let mut rotation = Matrix3::from_fn(|r, c| projection[4 * r + c]);
        let mut translation = Vector3::from_fn(|r, _| projection[4 * r + 3]);
        // The null vector has an arbitrary sign, but only one puts the points in front.
        if rotation.determinant() < 0.0 {
            rotation = -rotation;
            translation = -translation;
        }

        let svd = SVD::try_new(rotation, true, true, self.epsilon, self.max_iterations)?;
        let (u, v_t) = (svd.u?, svd.v_t?);
        let rotation = u * v_t;
        if rotation.determinant() <= 0.0 {
            return None;
        }
        let projection_scale = svd.singular_values.mean();
        if projection_scale <= 0.0 {
            return None;
        }
        let rotation = Rotation3::from_matrix_unchecked(rotation);

        // Undo the world normalization: `s * (R X + t) = R (s (X - c)) + s (R c + t)`.
        let translation = translation / (projection_scale * scale) - rotation * centroid;
        Some(WorldToCamera::from_parts(translation, rotation))
    }
}

impl Estimator<FeatureWorldMatch<KeyPoint>> for DltPnp {
    type Model = Camera;
    type ModelIter = Option<Camera>;
    const MIN_SAMPLES: usize = MIN_CORRESPONDENCES;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureWorldMatch<KeyPoint>> + Clone,
    {
        self.pose(data)
            .map(|pose| Camera::new(self.intrinsics, pose))
    }
}
