use crate::{BundleAdjustError, BundleAdjustmentOptions};
use itertools::Itertools;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::*;
use sfm_core::{
    nalgebra::{
        dimension::{Dynamic, U1},
        DMatrix, DVector, Matrix2x3, Point3, VecStorage, Vector2,
    },
    Pose, WorldToCamera,
};
use sfm_pinhole::NormalizedKeyPoint;

/// Step of the central differences taken on the so(3) part of each free pose.
const ROTATION_STEP: f64 = 1e-7;

/// One observation of a landmark from a view of the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BundleObservation {
    /// Index into the poses given to [`BundleAdjuster::new`].
    pub view: usize,
    /// Index into the points given to [`BundleAdjuster::new`].
    pub point: usize,
    /// The observed keypoint with lens distortion removed.
    pub keypoint: NormalizedKeyPoint,
    /// Pixels per normalized image unit, usually the mean focal length of the view.
    pub scale: f64,
}

fn project(point: Point3<f64>) -> Vector2<f64> {
    point.coords.xy() / point.z
}

/// Derivative of the pinhole projection `(x/z, y/z)` with respect to the camera point.
#[rustfmt::skip]
fn projection_jacobian(point: Point3<f64>) -> Matrix2x3<f64> {
    let inv_z = point.z.recip();
    Matrix2x3::new(
        inv_z, 0.0,   -point.x * inv_z * inv_z,
        0.0,   inv_z, -point.y * inv_z * inv_z,
    )
}

#[derive(Clone, Debug)]
pub struct BundleAdjuster {
    poses: Vec<WorldToCamera>,
    points: Vec<Point3<f64>>,
    observations: Vec<BundleObservation>,
    fixed_views: usize,
    residuals: DVector<f64>,
    jacobian: DMatrix<f64>,
}

impl BundleAdjuster {
    /// Creates the problem.
    ///
    /// The first `fixed_views` poses are held constant. Every observation must index a pose and a
    /// point given here, otherwise this panics.
    pub fn new(
        poses: Vec<WorldToCamera>,
        points: Vec<Point3<f64>>,
        observations: Vec<BundleObservation>,
        fixed_views: usize,
    ) -> Self {
        assert!(
            observations
                .iter()
                .all(|o| o.view < poses.len() && o.point < points.len()),
            "bundle observation refers to a pose or point that was not given"
        );
        let mut adjuster = Self {
            poses,
            points,
            observations,
            fixed_views,
            residuals: DVector::zeros(0),
            jacobian: DMatrix::zeros(0, 0),
        };
        adjuster.update();
        adjuster
    }

    fn num_free_views(&self) -> usize {
        self.poses.len().saturating_sub(self.fixed_views)
    }

    /// The number of scalar parameters being optimized.
    pub fn num_parameters(&self) -> usize {
        6 * self.num_free_views() + 3 * self.points.len()
    }

    pub fn poses(&self) -> &[WorldToCamera] {
        &self.poses
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    /// Half the sum of squared reprojection errors, in squared pixels.
    pub fn cost(&self) -> f64 {
        0.5 * self.residuals.norm_squared()
    }

    /// Runs Levenberg-Marquardt and returns the refined poses and points in their original order.
    ///
    /// Fails unless the final cost is strictly below the initial cost. The inputs are consumed,
    /// so callers that want to keep their estimates on failure should keep their own copy.
    pub fn adjust(
        self,
        options: &BundleAdjustmentOptions,
    ) -> Result<(Vec<WorldToCamera>, Vec<Point3<f64>>), BundleAdjustError> {
        if self.observations.is_empty() || self.num_parameters() == 0 {
            return Err(BundleAdjustError::NothingToOptimize);
        }
        let initial_cost = self.cost();
        let (adjusted, report) = LevenbergMarquardt::new()
            .with_patience(options.max_num_iterations.max(1))
            .with_ftol(options.function_tolerance)
            .with_gtol(options.gradient_tolerance)
            .minimize(self);
        // Running out of representable improvement is convergence at machine precision.
        let converged = report.termination.was_successful()
            || matches!(report.termination, TerminationReason::NoImprovementPossible(_));
        if !converged || !report.objective_function.is_finite() {
            return Err(BundleAdjustError::DidNotConverge(format!(
                "{:?}",
                report.termination
            )));
        }
        let final_cost = adjusted.cost();
        if !(final_cost < initial_cost) {
            return Err(BundleAdjustError::NoImprovement {
                initial: initial_cost,
                last: final_cost,
            });
        }
        debug!(
            "bundle adjustment reduced cost from {} to {} in {} evaluations",
            initial_cost, final_cost, report.number_of_evaluations
        );
        Ok((adjusted.poses, adjusted.points))
    }

    fn update(&mut self) {
        let num_free_views = self.num_free_views();
        let mut residuals = DVector::zeros(2 * self.observations.len());
        let mut jacobian = DMatrix::zeros(2 * self.observations.len(), self.num_parameters());
        for (ix, observation) in self.observations.iter().enumerate() {
            let row = 2 * ix;
            let pose = self.poses[observation.view];
            let point = self.points[observation.point];
            let camera_point = pose.0 * point;
            let residual =
                observation.scale * (project(camera_point) - observation.keypoint.coords);
            residuals.fixed_rows_mut::<2>(row).copy_from(&residual);

            let d_project = observation.scale * projection_jacobian(camera_point);
            let point_column = 6 * num_free_views + 3 * observation.point;
            jacobian
                .fixed_slice_mut::<2, 3>(row, point_column)
                .copy_from(&(d_project * pose.0.rotation.matrix()));

            if let Some(free_view) = observation.view.checked_sub(self.fixed_views) {
                let pose_column = 6 * free_view;
                jacobian
                    .fixed_slice_mut::<2, 3>(row, pose_column)
                    .copy_from(&d_project);
                let se3 = pose.se3();
                for axis in 0..3 {
                    let mut plus = se3;
                    plus[3 + axis] += ROTATION_STEP;
                    let mut minus = se3;
                    minus[3 + axis] -= ROTATION_STEP;
                    let difference = project(WorldToCamera::from_se3(plus).0 * point)
                        - project(WorldToCamera::from_se3(minus).0 * point);
                    jacobian
                        .fixed_slice_mut::<2, 1>(row, pose_column + 3 + axis)
                        .copy_from(&(observation.scale * difference / (2.0 * ROTATION_STEP)));
                }
            }
        }
        self.residuals = residuals;
        self.jacobian = jacobian;
    }
}

impl LeastSquaresProblem<f64, Dynamic, Dynamic> for BundleAdjuster {
    type ResidualStorage = VecStorage<f64, Dynamic, U1>;
    type JacobianStorage = VecStorage<f64, Dynamic, Dynamic>;
    type ParameterStorage = VecStorage<f64, Dynamic, U1>;

    fn set_params(&mut self, params: &DVector<f64>) {
        let num_free_views = self.num_free_views();
        for (ix, pose) in self.poses.iter_mut().skip(self.fixed_views).enumerate() {
            *pose = Pose::from_se3(params.fixed_rows::<6>(6 * ix).into_owned());
        }
        for (ix, point) in self.points.iter_mut().enumerate() {
            *point = params
                .fixed_rows::<3>(6 * num_free_views + 3 * ix)
                .into_owned()
                .into();
        }
        self.update();
    }

    fn params(&self) -> DVector<f64> {
        let values = self
            .poses
            .iter()
            .skip(self.fixed_views)
            .flat_map(|pose| pose.se3().iter().copied().collect_vec())
            .chain(
                self.points
                    .iter()
                    .flat_map(|point| point.coords.iter().copied().collect_vec()),
            )
            .collect_vec();
        DVector::from_vec(values)
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals.clone())
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        Some(self.jacobian.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sfm_core::nalgebra::{Matrix3, Rotation3, Vector3, Vector6};
    use sfm_core::{Projective, WorldPoint};

    const FOCAL: f64 = 500.0;

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

    fn scene() -> (Vec<WorldToCamera>, Vec<Point3<f64>>, Vec<BundleObservation>) {
        let poses = (0..3)
            .map(|i| {
                let angle = 0.15 * i as f64;
                look_at(
                    Point3::new(6.0 * angle.sin(), 0.3, -6.0 * angle.cos()),
                    Point3::origin(),
                )
            })
            .collect_vec();
        let points = (0..20)
            .map(|i| {
                let i = i as f64;
                Point3::new((0.7 * i).sin(), (1.3 * i).cos(), (0.4 * i).sin() * 0.8)
            })
            .collect_vec();
        let observations = poses
            .iter()
            .enumerate()
            .flat_map(|(view, pose)| {
                points.iter().enumerate().map(move |(point, &position)| {
                    let camera_point = pose.transform(WorldPoint::from_point(position));
                    BundleObservation {
                        view,
                        point,
                        keypoint: NormalizedKeyPoint::from_camera_point(camera_point).unwrap(),
                        scale: FOCAL,
                    }
                })
            })
            .collect_vec();
        (poses, points, observations)
    }

    #[test]
    fn recovers_perturbed_scene() {
        let (poses, points, observations) = scene();
        let mut perturbed_poses = poses.clone();
        let delta = Vector6::new(0.01, -0.02, 0.01, 0.002, -0.001, 0.003);
        perturbed_poses[2] = WorldToCamera::from_se3(poses[2].se3() + delta);
        let perturbed_points = points
            .iter()
            .enumerate()
            .map(|(i, p)| p + Vector3::new(0.01, -0.01, 0.005) * ((i % 3) as f64 - 1.0))
            .collect_vec();

        let options = BundleAdjustmentOptions::default();
        assert_eq!(options.fixed_views, 2);
        let adjuster = BundleAdjuster::new(
            perturbed_poses,
            perturbed_points,
            observations,
            options.fixed_views,
        );
        assert!(adjuster.cost() > 1.0);
        let (adjusted_poses, adjusted_points) = adjuster.adjust(&options).unwrap();

        assert_relative_eq!(adjusted_poses[0].0, poses[0].0);
        assert_relative_eq!(adjusted_poses[2].0, poses[2].0, epsilon = 1e-6);
        for (adjusted, truth) in adjusted_points.iter().zip(&points) {
            assert_relative_eq!(adjusted, truth, epsilon = 1e-6);
        }
    }

    #[test]
    fn exact_scene_has_zero_cost() {
        let (poses, points, observations) = scene();
        let adjuster = BundleAdjuster::new(poses, points, observations, 1);
        assert!(adjuster.cost() < 1e-12);
        assert_eq!(adjuster.num_parameters(), 6 * 2 + 3 * 20);
    }

    #[test]
    fn exact_scene_stays_put() {
        let (poses, points, observations) = scene();
        let adjuster = BundleAdjuster::new(poses.clone(), points.clone(), observations, 2);
        match adjuster.adjust(&BundleAdjustmentOptions::default()) {
            Ok((adjusted_poses, adjusted_points)) => {
                for (adjusted, truth) in adjusted_poses.iter().zip(&poses) {
                    assert_relative_eq!(adjusted.0, truth.0, epsilon = 1e-9);
                }
                for (adjusted, truth) in adjusted_points.iter().zip(&points) {
                    assert_relative_eq!(adjusted, truth, epsilon = 1e-9);
                }
            }
            Err(BundleAdjustError::NoImprovement { initial, last }) => {
                assert!(initial < 1e-12 && last >= initial);
            }
            Err(e) => panic!("unexpected failure: {}", e),
        }
    }

    #[test]
    fn nothing_to_optimize() {
        let adjuster = BundleAdjuster::new(vec![WorldToCamera::identity()], vec![], vec![], 1);
        assert_eq!(
            adjuster.adjust(&BundleAdjustmentOptions::default()),
            Err(BundleAdjustError::NothingToOptimize)
        );
    }
}
