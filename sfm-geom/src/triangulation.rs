use sfm_core::{
    nalgebra::{zero, Matrix4, UnitVector3},
    Pose, Projective, TriangulatorObservations, WorldPoint, WorldToCamera,
};

/// This is a very quick triangulator to execute. It minimizes an algebraic error, so it is most
/// accurate when the observations have very low error to begin with, and exact for noiseless data.
/// It is not suitable for accurately computing points at infinity in projective space.
///
/// Referred to as the Linear-Eigen method by Hartley and Sturm in the paper
/// ["Triangulation"](https://users.cecs.anu.edu.au/~hartley/Papers/triangulation/triangulation.pdf).
///
/// Each observation contributes the component of the transformed point that is perpendicular
/// to its bearing, `(I - b bᵗ) [R | t] X`, which vanishes when the ray passes through `X`.
/// Summing the normal equations of every observation gives a 4x4 symmetric matrix and the
/// homogeneous point is the eigenvector of its smallest eigenvalue. This scales to any number
/// of observations at constant cost per observation.
///
/// The result is rejected when every optical center coincides (no baseline, so the depth is
/// unobservable), when it is not finite, or when it lies behind any of the observing cameras.
///
/// ```
/// use sfm_core::nalgebra::{Vector3, Point3, Rotation3};
/// use sfm_core::{TriangulatorRelative, CameraToCamera, CameraPoint, Pose, Projective};
/// use sfm_geom::triangulation::LinearEigenTriangulator;
///
/// let point = CameraPoint::from_point(Point3::new(0.3, 0.1, 2.0));
/// let pose = CameraToCamera::from_parts(
///     Vector3::new(0.1, 0.1, 0.1),
///     Rotation3::new(Vector3::new(0.1, 0.1, 0.1)),
/// );
/// let bearing_a = point.bearing();
/// let bearing_b = pose.transform(point).bearing();
/// let triangulated = LinearEigenTriangulator::new()
///     .triangulate_relative(pose, bearing_a, bearing_b)
///     .unwrap();
/// let distance = (point.point().unwrap().coords - triangulated.point().unwrap().coords).norm();
/// assert!(distance < 1e-6);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct LinearEigenTriangulator {
    epsilon: f64,
    max_iterations: usize,
    baseline_epsilon: f64,
}

impl LinearEigenTriangulator {
    /// Creates a `LinearEigenTriangulator` with default values.
    ///
    /// Same as calling [`Default::default`].
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the epsilon used in the symmetric eigen solver.
    ///
    /// Default is `1e-12`.
    #[must_use]
    pub fn epsilon(self, epsilon: f64) -> Self {
        Self { epsilon, ..self }
    }

    /// Set the maximum number of iterations for the symmetric eigen solver.
    ///
    /// Default is `1000`.
    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// Set the distance under which two optical centers are considered the same.
    ///
    /// Default is `1e-9`.
    #[must_use]
    pub fn baseline_epsilon(self, baseline_epsilon: f64) -> Self {
        Self {
            baseline_epsilon,
            ..self
        }
    }
}

impl Default for LinearEigenTriangulator {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            max_iterations: 1000,
            baseline_epsilon: 1e-9,
        }
    }
}

impl TriangulatorObservations for LinearEigenTriangulator {
    fn triangulate_observations(
        &self,
        mut pairs: impl Iterator<Item = (WorldToCamera, UnitVector3<f64>)> + Clone,
    ) -> Option<WorldPoint> {
        let (first_pose, _) = pairs.clone().next()?;
        let first_center = first_pose.optical_center();
        let has_baseline = pairs.clone().any(|(pose, _)| {
            (pose.optical_center() - first_center).norm() > self.baseline_epsilon
        });
        if !has_baseline {
            return None;
        }

        let mut a: Matrix4<f64> = zero();
        for (pose, bearing) in pairs.clone() {
            let bearing = bearing.into_inner();
            let pose = pose.matrix3x4();
            let term = pose - bearing * bearing.transpose() * pose;
            a += term.transpose() * term;
        }

        let se = a.try_symmetric_eigen(self.epsilon, self.max_iterations)?;

        // The point lies in the null space, which is the eigenvector of the smallest eigenvalue.
        let homogeneous = se
            .eigenvalues
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| float_ord::FloatOrd(n))
            .map(|(ix, _)| se.eigenvectors.column(ix).into_owned())?;
        let point = WorldPoint::from(homogeneous).point()?;
        if !point.coords.iter().all(|n| n.is_finite()) {
            return None;
        }
        let point = WorldPoint::from_point(point);
        // The point must be in front of every camera and along (not against) every bearing.
        pairs
            .all(|(pose, bearing)| {
                let camera_point = pose.transform(point);
                camera_point.depth().map_or(false, |depth| depth > 0.0)
                    && camera_point.bearing().dot(&bearing) > 0.0
            })
            .then(|| point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sfm_core::nalgebra::{Matrix3, Point3, Rotation3, Vector3};
    use sfm_core::{CameraPoint, CameraToCamera, TriangulatorRelative};

    fn look_at(center: Point3<f64>, target: Point3<f64>) -> WorldToCamera {
        let forward = (target - center).normalize();
        let right = (-Vector3::y()).cross(&forward).normalize();
        let down = forward.cross(&right);
        let rotation = Rotation3::from_matrix_unchecked(Matrix3::from_rows(&[
            right.transpose(),
            down.transpose(),
            forward.transpose(),
        ]));
        WorldToCamera::from_parts(-(rotation * center.coords), rotation)
    }

    #[test]
    fn many_views_recover_point() {
        let point = Point3::new(0.2, -0.4, 0.7);
        let observations = (0..6)
            .map(|i| {
                let angle = 0.2 * i as f64;
                let pose = look_at(
                    Point3::new(6.0 * angle.sin(), 0.5, -6.0 * angle.cos()),
                    Point3::origin(),
                );
                let bearing = pose.transform(WorldPoint::from_point(point)).bearing();
                (pose, bearing)
            })
            .collect::<Vec<_>>();
        let triangulated = LinearEigenTriangulator::new()
            .triangulate_observations(observations.iter().copied())
            .unwrap();
        assert_relative_eq!(triangulated.point().unwrap(), point, epsilon = 1e-9);
    }

    #[test]
    fn coincident_centers_fail() {
        let point = CameraPoint::from_point(Point3::new(0.3, 0.1, 2.0));
        let pure_rotation = CameraToCamera::from_parts(
            Vector3::zeros(),
            Rotation3::new(Vector3::new(0.0, 0.1, 0.0)),
        );
        let result = LinearEigenTriangulator::new().triangulate_relative(
            pure_rotation,
            point.bearing(),
            pure_rotation.transform(point).bearing(),
        );
        assert!(result.is_none());
    }

    #[test]
    fn point_behind_cameras_fails() {
        let pose = CameraToCamera::from_parts(Vector3::new(-1.0, 0.0, 0.0), Rotation3::identity());
        let point = CameraPoint::from_point(Point3::new(0.3, 0.1, -2.0));
        let result = LinearEigenTriangulator::new().triangulate_relative(
            pose,
            point.bearing(),
            pose.transform(point).bearing(),
        );
        assert!(result.is_none());
    }

    #[test]
    fn single_observation_fails() {
        let pose = WorldToCamera::identity();
        let bearing = UnitVector3::new_normalize(Vector3::new(0.1, 0.2, 1.0));
        assert!(LinearEigenTriangulator::new()
            .triangulate_observations(core::iter::once((pose, bearing)))
            .is_none());
    }
}
