use sfm_core::{
    nalgebra::{IsometryMatrix3, Point3, Rotation3, Vector3},
    sample_consensus::Model,
    CameraModel, CameraPoint, CameraToCamera, FeatureMatch, KeyPoint, Pose, Projective,
};
use sfm_pinhole::{CameraIntrinsics, EssentialMatrix};

const SAMPLE_POINTS: usize = 16;
const RESIDUAL_THRESHOLD: f64 = 1e-6;

const ROT_MAGNITUDE: f64 = 0.2;
const POINT_BOX_SIZE: f64 = 2.0;
const POINT_DISTANCE: f64 = 3.0;

#[test]
fn randomized() {
    let successes = (0..1000).filter(|_| run_round()).count();
    eprintln!("successes: {}", successes);
    assert!(successes > 950);
}

#[test]
fn matches_essential_of_true_pose() {
    let pose = CameraToCamera::from_parts(
        Vector3::new(0.4, -0.2, 0.3),
        Rotation3::from_euler_angles(0.1, -0.15, 0.05),
    );
    let matches = matches_for(pose);
    let fundamental = eight_point::EightPoint::new()
        .from_matches(matches.iter().copied())
        .expect("didn't get any fundamental matrix");
    let expected = EssentialMatrix::from(pose)
        .to_fundamental(&intrinsics(), &intrinsics())
        .unwrap()
        .normalize();
    // Equal up to sign.
    let difference = (fundamental.0 - expected.0)
        .norm()
        .min((fundamental.0 + expected.0).norm());
    assert!(difference < 1e-6, "difference: {}", difference);
}

#[test]
fn short_baseline_stays_exact() {
    let pose = CameraToCamera::from_parts(
        Vector3::new(0.05, 0.01, -0.02),
        Rotation3::from_euler_angles(0.02, 0.03, -0.01),
    );
    let matches = matches_for(pose);
    let fundamental = eight_point::EightPoint::new()
        .from_matches(matches.iter().copied())
        .expect("didn't get any fundamental matrix");
    let expected = EssentialMatrix::from(pose)
        .to_fundamental(&intrinsics(), &intrinsics())
        .unwrap()
        .normalize();
    let difference = (fundamental.0 - expected.0)
        .norm()
        .min((fundamental.0 + expected.0).norm());
    assert!(difference < 1e-8, "difference: {}", difference);
    for m in &matches {
        assert!(fundamental.residual(m).abs() < 1e-10);
    }
}

fn run_round() -> bool {
    let mut success = true;
    let matches = matches_for(random_pose());
    let eight_point = eight_point::EightPoint::new();
    let fundamental = eight_point
        .from_matches(matches.iter().copied())
        .expect("didn't get any fundamental matrix");
    for m in &matches {
        if fundamental.residual(m).abs() > RESIDUAL_THRESHOLD {
            success = false;
            eprintln!("failed residual check: {}", fundamental.residual(m).abs());
        }
    }
    success
}

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::from_vertical_fov(1280.0, 720.0, 1.2)
}

/// A random relative pose with a small rotation.
fn random_pose() -> CameraToCamera {
    CameraToCamera(IsometryMatrix3::from_parts(
        (Vector3::new_random() - Vector3::repeat(0.5)).into(),
        Rotation3::new((Vector3::new_random() - Vector3::repeat(0.5)) * 2.0 * ROT_MAGNITUDE),
    ))
}

/// Gets the pixel matches of random points in front of camera A as seen by both cameras.
fn matches_for(relative_pose: CameraToCamera) -> Vec<FeatureMatch<KeyPoint>> {
    let intrinsics = intrinsics();
    (0..SAMPLE_POINTS)
        .filter_map(|_| {
            let mut a = Point3::from(Vector3::new_random() * POINT_BOX_SIZE);
            a.x -= 0.5 * POINT_BOX_SIZE;
            a.y -= 0.5 * POINT_BOX_SIZE;
            a.z += POINT_DISTANCE;
            let a = CameraPoint::from_point(a);
            let b = relative_pose.transform(a);
            Some(FeatureMatch(intrinsics.project(a)?, intrinsics.project(b)?))
        })
        .collect()
}
