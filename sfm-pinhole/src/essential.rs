use crate::{CameraIntrinsics, FundamentalMatrix, NormalizedKeyPoint};
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use num_traits::Float;
use sfm_core::nalgebra::{Matrix3, Rotation3, UnitVector3, Vector3, SVD};
use sfm_core::sample_consensus::Model;
use sfm_core::{CameraToCamera, FeatureMatch, Pose, TriangulatorRelative};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This stores an essential matrix, which is satisfied by the following constraint:
///
/// transpose(x') * E * x = 0
///
/// Where `x'` and `x` are homogeneous normalized image coordinates. You can get a
/// homogeneous normalized image coordinate by appending `1.0` to a [`NormalizedKeyPoint`].
///
/// For any point on the sensor of the first camera, the light that produced it travelled along
/// the ray through the optical center. Every point on that ray projects onto a line in the second
/// image, the epipolar line. `E * x` is the normal of the plane containing that ray and both
/// optical centers, so the bearing `x'` of the same point in the second image is perpendicular to it.
///
/// Decomposing `E` yields the relative pose between the two cameras, but only up to four-way
/// ambiguity and an unknown scale. Use [`EssentialMatrix::pose_solver`] to pick the right one.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct EssentialMatrix(pub Matrix3<f64>);

impl EssentialMatrix {
    /// Can be used to enforce the constraints of an essential matrix to fix it.
    ///
    /// This finds the closest essential matrix in frobenius form. This just means
    /// that the two singular values are averaged and the null singular value is
    /// forced to zero.
    pub fn recondition(self, epsilon: f64, max_iterations: usize) -> Option<Self> {
        let mut svd = self.try_svd(true, true, epsilon, max_iterations)?;
        svd.singular_values[2] = 0.0;
        let new_singular = (svd.singular_values[0] + svd.singular_values[1]) / 2.0;
        svd.singular_values[0] = new_singular;
        svd.singular_values[1] = new_singular;
        svd.recompose().ok().map(Self)
    }

    /// Returns two possible rotations for the essential matrix along with a translation
    /// bearing of arbitrary length. The translation's length is unknown and of unknown sign
    /// and must be solved for by using a prior.
    ///
    /// `epsilon` is the threshold by which the singular value decomposition is considered
    /// complete. It is recommended to set this to no higher than `1e-6`.
    ///
    /// `max_iterations` caps the singular value decomposition. A `max_iterations` of `0`
    /// may execute indefinitely and is not recommended.
    ///
    /// ```
    /// use sfm_core::CameraToCamera;
    /// use sfm_core::nalgebra::{IsometryMatrix3, Rotation3, Vector3};
    /// use sfm_pinhole::EssentialMatrix;
    /// let pose = CameraToCamera(IsometryMatrix3::from_parts(
    ///     Vector3::new(-0.8, 0.4, 0.5).into(),
    ///     Rotation3::from_euler_angles(0.2, 0.3, 0.4),
    /// ));
    /// let (rot_a, rot_b, t) = EssentialMatrix::from(pose)
    ///     .possible_rotations_unscaled_translation(1e-6, 50)
    ///     .unwrap();
    /// let a_close = (rot_a.matrix() - pose.0.rotation.matrix()).norm() < 1e-4;
    /// let b_close = (rot_b.matrix() - pose.0.rotation.matrix()).norm() < 1e-4;
    /// assert!(a_close || b_close);
    /// // The translation points in the same (or reverse) direction.
    /// let t_res = 1.0 - t.normalize().dot(&pose.0.translation.vector.normalize()).abs();
    /// assert!(t_res < 1e-4);
    /// ```
    pub fn possible_rotations_unscaled_translation(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<(Rotation3<f64>, Rotation3<f64>, Vector3<f64>)> {
        // `W` from https://en.wikipedia.org/wiki/Essential_matrix#Finding_one_solution.
        let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let wt = w.transpose();

        let svd = SVD::try_new(self.0, true, true, epsilon, max_iterations)?;
        let mut u = svd.u?;
        let mut v_t = svd.v_t?;
        // Last column of U and last row of Vt are undetermined since d = (a a 0),
        // so their signs can be flipped to get proper rotations.
        if u.determinant() < 0.0 {
            u.column_mut(2).neg_mut();
        }
        if v_t.determinant() < 0.0 {
            v_t.row_mut(2).neg_mut();
        }
        Some((
            Rotation3::from_matrix_unchecked(u * w * v_t),
            Rotation3::from_matrix_unchecked(u * wt * v_t),
            u.column(2).into_owned(),
        ))
    }

    /// See [`EssentialMatrix::possible_rotations_unscaled_translation`].
    ///
    /// This returns the two rotations combined with both signs of the translation bearing.
    ///
    /// ```
    /// use sfm_core::CameraToCamera;
    /// use sfm_core::nalgebra::{IsometryMatrix3, Rotation3, Vector3};
    /// use sfm_pinhole::EssentialMatrix;
    /// let pose = CameraToCamera(IsometryMatrix3::from_parts(
    ///     Vector3::new(-0.8, 0.4, 0.5).into(),
    ///     Rotation3::from_euler_angles(0.2, 0.3, 0.4),
    /// ));
    /// let poses = EssentialMatrix::from(pose).possible_unscaled_poses(1e-6, 50).unwrap();
    /// let one_correct = poses.iter().any(|&upose| {
    ///     let rotation_residual = (upose.0.rotation.matrix() - pose.0.rotation.matrix()).norm();
    ///     let translation_residual = 1.0
    ///         - upose.0.translation.vector.normalize()
    ///             .dot(&pose.0.translation.vector.normalize());
    ///     rotation_residual < 1e-4 && translation_residual < 1e-4
    /// });
    /// assert!(one_correct);
    /// ```
    pub fn possible_unscaled_poses(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<[CameraToCamera; 4]> {
        self.possible_rotations_unscaled_translation(epsilon, max_iterations)
            .map(|(rot_a, rot_b, t)| {
                [
                    CameraToCamera::from_parts(t, rot_a),
                    CameraToCamera::from_parts(t, rot_b),
                    CameraToCamera::from_parts(-t, rot_a),
                    CameraToCamera::from_parts(-t, rot_b),
                ]
            })
    }

    /// Converts back into the fundamental matrix `F = K₂⁻ᵗ E K₁⁻¹` of the two images.
    ///
    /// Fails if either intrinsic matrix is singular.
    pub fn to_fundamental(
        &self,
        first: &CameraIntrinsics,
        second: &CameraIntrinsics,
    ) -> Option<FundamentalMatrix> {
        let first_inverse = first.matrix().try_inverse()?;
        let second_inverse = second.matrix().try_inverse()?;
        Some(FundamentalMatrix(
            second_inverse.transpose() * self.0 * first_inverse,
        ))
    }

    /// Creates a [`PoseSolver`] that picks the physically valid decomposition of this matrix.
    pub fn pose_solver(&self) -> PoseSolver<'_> {
        PoseSolver::new(self)
    }
}

/// Generates an essential matrix corresponding to this relative camera pose.
///
/// If a point `a` is transformed using [`Pose::transform`] into
/// a point `b`, then the essential matrix returned by this method will
/// give a residual of approximately `0.0` for the match of their normalized keypoints.
impl From<CameraToCamera> for EssentialMatrix {
    fn from(pose: CameraToCamera) -> Self {
        Self(pose.0.translation.vector.cross_matrix() * *pose.0.rotation.matrix())
    }
}

impl Model<FeatureMatch<NormalizedKeyPoint>> for EssentialMatrix {
    fn residual(&self, data: &FeatureMatch<NormalizedKeyPoint>) -> f64 {
        let &FeatureMatch(a, b) = data;
        Float::abs((b.to_homogeneous().transpose() * self.0 * a.to_homogeneous())[0])
    }
}

/// Disambiguates the four poses of an [`EssentialMatrix`] with the cheirality constraint.
///
/// Every correspondence is triangulated under each candidate (camera A at the origin, camera B at
/// the candidate pose). A correct pose places the points in front of both cameras.
#[derive(Copy, Clone, Debug)]
pub struct PoseSolver<'a> {
    essential: &'a EssentialMatrix,
    epsilon: f64,
    max_iterations: usize,
}

impl<'a> PoseSolver<'a> {
    /// Creates a solver with an SVD `epsilon` of `1e-12` and `1000` maximum iterations.
    pub fn new(essential: &'a EssentialMatrix) -> Self {
        Self {
            essential,
            epsilon: 1e-12,
            max_iterations: 1000,
        }
    }

    #[must_use]
    pub fn epsilon(self, epsilon: f64) -> Self {
        Self { epsilon, ..self }
    }

    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// Each candidate pose with the number of correspondences it puts in front of both cameras.
    ///
    /// Returns `None` only if the decomposition failed.
    pub fn visible_counts<T, I>(
        &self,
        triangulator: &T,
        matches: I,
    ) -> Option<[(CameraToCamera, usize); 4]>
    where
        T: TriangulatorRelative,
        I: Iterator<Item = FeatureMatch<UnitVector3<f64>>> + Clone,
    {
        let poses = self
            .essential
            .possible_unscaled_poses(self.epsilon, self.max_iterations)?;
        Some(poses.map(|pose| {
            let visible = matches
                .clone()
                .filter(|&FeatureMatch(a, b)| {
                    triangulator
                        .triangulate_relative(pose, a, b)
                        .and_then(|point_a| {
                            let depth_a = point_a.depth()?;
                            let depth_b = pose.transform(point_a).depth()?;
                            Some(depth_a > 0.0 && depth_b > 0.0)
                        })
                        .unwrap_or(false)
                })
                .count();
            (pose, visible)
        }))
    }

    /// The candidate pose that puts the most correspondences in front of both cameras, with that count.
    ///
    /// On ties the earlier candidate wins.
    pub fn solve_unscaled<T, I>(
        &self,
        triangulator: &T,
        matches: I,
    ) -> Option<(CameraToCamera, usize)>
    where
        T: TriangulatorRelative,
        I: Iterator<Item = FeatureMatch<UnitVector3<f64>>> + Clone,
    {
        let counts = self.visible_counts(triangulator, matches)?;
        let mut best = counts[0];
        for &candidate in &counts[1..] {
            if candidate.1 > best.1 {
                best = candidate;
            }
        }
        Some(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sfm_core::nalgebra::Point3;
    use sfm_core::{CameraPoint, Projective};
    use sfm_geom::LinearEigenTriangulator;

    fn relative_pose() -> CameraToCamera {
        CameraToCamera::from_parts(
            Vector3::new(-0.8, 0.1, 0.2),
            Rotation3::from_euler_angles(0.05, 0.15, -0.1),
        )
    }

    fn bearings(pose: CameraToCamera) -> Vec<FeatureMatch<UnitVector3<f64>>> {
        let mut matches = vec![];
        for i in 0..5 {
            for j in 0..4 {
                let point = CameraPoint::from_point(Point3::new(
                    -1.0 + 0.5 * i as f64,
                    -0.75 + 0.5 * j as f64,
                    4.0 + 0.3 * ((i + j) % 3) as f64,
                ));
                matches.push(FeatureMatch(point.bearing(), pose.transform(point).bearing()));
            }
        }
        matches
    }

    #[test]
    fn solver_recovers_pose_with_all_points_visible() {
        let pose = relative_pose();
        let matches = bearings(pose);
        let essential = EssentialMatrix::from(pose);
        let (solved, visible) = essential
            .pose_solver()
            .solve_unscaled(&LinearEigenTriangulator::new(), matches.iter().copied())
            .unwrap();
        assert_eq!(visible, matches.len());
        assert_relative_eq!(
            solved.0.rotation.matrix(),
            pose.0.rotation.matrix(),
            epsilon = 1e-6
        );
        assert_relative_eq!(
            solved.0.translation.vector.normalize(),
            pose.0.translation.vector.normalize(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn wrong_candidates_see_fewer_points() {
        let pose = relative_pose();
        let matches = bearings(pose);
        let counts = EssentialMatrix::from(pose)
            .pose_solver()
            .visible_counts(&LinearEigenTriangulator::new(), matches.iter().copied())
            .unwrap();
        let full = counts.iter().filter(|&&(_, n)| n == matches.len()).count();
        assert_eq!(full, 1);
    }

    #[test]
    fn residual_vanishes_for_true_matches() {
        let pose = relative_pose();
        let essential = EssentialMatrix::from(pose);
        for FeatureMatch(a, b) in bearings(pose) {
            let a = NormalizedKeyPoint::from_bearing(a).unwrap();
            let b = NormalizedKeyPoint::from_bearing(b).unwrap();
            assert!(essential.residual(&FeatureMatch(a, b)) < 1e-12);
        }
    }

    #[test]
    fn recondition_equalizes_singular_values() {
        let exact = EssentialMatrix::from(relative_pose());
        let noisy = EssentialMatrix(exact.0 + Matrix3::repeat(1e-3));
        let fixed = noisy.recondition(1e-12, 1000).unwrap();
        let singular = fixed.0.singular_values();
        assert_relative_eq!(singular[0], singular[1], epsilon = 1e-9);
        assert_relative_eq!(singular[2], 0.0, epsilon = 1e-9);
    }
}
