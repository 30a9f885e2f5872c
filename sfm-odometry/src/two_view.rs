use crate::{Ransac, RansacOptions, TwoViewError};
use eight_point::EightPoint;
use log::*;
use rand::Rng;
use sfm_core::{
    nalgebra::UnitVector3, sample_consensus::Consensus, CameraModel, CameraToCamera,
    FeatureMatch, KeyPoint, TriangulatorRelative,
};
use sfm_pinhole::{CameraIntrinsics, FundamentalMatrix};

const MIN_MATCHES: usize = 8;

/// The relative pose found between two views.
#[derive(Debug, Clone, PartialEq)]
pub struct TwoViewSolution {
    /// Transforms points from the first camera into the second. The translation has unit norm.
    pub pose: CameraToCamera,
    pub fundamental: FundamentalMatrix,
    /// Indices of the matches consistent with the fundamental matrix.
    pub inliers: Vec<usize>,
    /// The number of matches that triangulate in front of both cameras under `pose`.
    pub visible: usize,
}

/// Estimates the relative pose of two views from pixel matches.
///
/// A fundamental matrix is fit with RANSAC over the undistorted pixels and upgraded to an
/// essential matrix with the intrinsics. Of its four decompositions the one that puts the most
/// matches in front of both cameras is chosen, and it must do so for at least
/// `min_points_visible_ratio` of all matches.
pub fn estimate_relative_pose<T, R>(
    matches: &[FeatureMatch<KeyPoint>],
    first: &CameraIntrinsics,
    second: &CameraIntrinsics,
    options: &RansacOptions,
    min_points_visible_ratio: f64,
    triangulator: &T,
    rng: &mut R,
) -> Result<TwoViewSolution, TwoViewError>
where
    T: TriangulatorRelative,
    R: Rng,
{
    if matches.len() < MIN_MATCHES {
        return Err(TwoViewError::TooFewMatches {
            found: matches.len(),
            required: MIN_MATCHES,
        });
    }

    let undistorted = matches
        .iter()
        .map(|&FeatureMatch(a, b)| FeatureMatch(first.undistort(a), second.undistort(b)));
    let (fundamental, inliers) = Ransac::new(*options, rng)
        .model_inliers(&EightPoint::new(), undistorted)
        .ok_or(TwoViewError::InsufficientInliers {
            required: options.minimum_num_inliers,
        })?;
    info!(
        "fundamental matrix has {} inliers out of {} matches",
        inliers.len(),
        matches.len()
    );

    let essential = fundamental.essential(first, second);
    let bearings = matches.iter().map(|&FeatureMatch(a, b)| {
        FeatureMatch::<UnitVector3<f64>>(first.calibrate(a), second.calibrate(b))
    });
    let (pose, visible) = essential
        .pose_solver()
        .solve_unscaled(triangulator, bearings)
        .ok_or(TwoViewError::DegenerateEssential)?;

    let required = (min_points_visible_ratio * matches.len() as f64).ceil() as usize;
    debug!(
        "{} of {} matches in front of both cameras, {} required",
        visible,
        matches.len(),
        required
    );
    if visible < required {
        return Err(TwoViewError::Ambiguous { visible, required });
    }

    Ok(TwoViewSolution {
        pose,
        fundamental,
        inliers,
        visible,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::SmallRng, SeedableRng};
    use sfm_core::nalgebra::{Point3, Rotation3, Vector3};
    use sfm_core::{CameraPoint, Pose, Projective};
    use sfm_geom::LinearEigenTriangulator;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::from_vertical_fov(1280.0, 720.0, 1.2)
    }

    fn true_pose() -> CameraToCamera {
        CameraToCamera::from_parts(
            Vector3::new(-0.8, 0.1, 0.2),
            Rotation3::from_euler_angles(0.02, 0.1, -0.03),
        )
    }

    fn matches(count: usize) -> Vec<FeatureMatch<KeyPoint>> {
        let intrinsics = intrinsics();
        (0..count)
            .filter_map(|i| {
                let i = i as f64;
                let point = CameraPoint::from_point(Point3::new(
                    (1.7 * i).sin() * 1.5,
                    (0.9 * i).cos(),
                    4.0 + (0.3 * i).sin(),
                ));
                Some(FeatureMatch(
                    intrinsics.project(point)?,
                    intrinsics.project(true_pose().transform(point))?,
                ))
            })
            .collect()
    }

    fn options() -> RansacOptions {
        RansacOptions {
            iterations: 50,
            acceptable_error: 1e-1,
            minimum_num_inliers: 35,
            num_samples: 8,
        }
    }

    #[test]
    fn recovers_unit_baseline_pose() {
        let matches = matches(60);
        assert_eq!(matches.len(), 60);
        let solution = estimate_relative_pose(
            &matches,
            &intrinsics(),
            &intrinsics(),
            &options(),
            0.5,
            &LinearEigenTriangulator::new(),
            &mut SmallRng::seed_from_u64(0),
        )
        .unwrap();

        let expected = true_pose();
        assert_eq!(solution.inliers.len(), 60);
        assert_eq!(solution.visible, 60);
        assert_relative_eq!(
            solution.pose.0.rotation,
            expected.0.rotation,
            epsilon = 1e-6
        );
        assert_relative_eq!(
            solution.pose.0.translation.vector,
            expected.0.translation.vector.normalize(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn inliers_satisfy_epipolar_constraint() {
        let mut matches = matches(60);
        let outliers = matches[..15]
            .iter()
            .map(|&FeatureMatch(a, b)| FeatureMatch(a, KeyPoint::new(b.x, b.y + 80.0)))
            .collect::<Vec<_>>();
        matches.extend(outliers);
        let solution = estimate_relative_pose(
            &matches,
            &intrinsics(),
            &intrinsics(),
            &RansacOptions {
                iterations: 200,
                ..options()
            },
            0.5,
            &LinearEigenTriangulator::new(),
            &mut SmallRng::seed_from_u64(3),
        )
        .unwrap();

        assert_eq!(solution.inliers.len(), 60);
        assert!(solution.inliers.iter().all(|&ix| ix < 60));
        for &ix in &solution.inliers {
            let FeatureMatch(a, b) = matches[ix];
            assert!(solution.fundamental.sampson_distance(a, b) < 1e-8);
        }
        assert_relative_eq!(
            solution.pose.0.translation.vector,
            true_pose().0.translation.vector.normalize(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn too_few_matches() {
        let matches = matches(7);
        assert_eq!(
            estimate_relative_pose(
                &matches,
                &intrinsics(),
                &intrinsics(),
                &options(),
                0.5,
                &LinearEigenTriangulator::new(),
                &mut SmallRng::seed_from_u64(0),
            ),
            Err(TwoViewError::TooFewMatches {
                found: 7,
                required: 8
            })
        );
    }

    #[test]
    fn unreachable_inlier_count() {
        let matches = matches(20);
        assert_eq!(
            estimate_relative_pose(
                &matches,
                &intrinsics(),
                &intrinsics(),
                &options(),
                0.5,
                &LinearEigenTriangulator::new(),
                &mut SmallRng::seed_from_u64(0),
            ),
            Err(TwoViewError::InsufficientInliers { required: 35 })
        );
    }
}
