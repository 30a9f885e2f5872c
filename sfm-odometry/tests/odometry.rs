use approx::assert_relative_eq;
use rand::{rngs::SmallRng, seq::SliceRandom, Rng, SeedableRng};
use sfm_core::nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use sfm_core::{Feature, Pose, WorldToCamera};
use sfm_geom::LinearEigenTriangulator;
use sfm_odometry::{
    Descriptor, DistanceMetric, Frame, MatchError, MetricKind, TrackingError, TrackingState,
    ViewHandle, VisualOdometry, VoSettings,
};
use sfm_pinhole::{Camera, CameraIntrinsics};

const NUM_POINTS: usize = 100;
const NUM_CAMERAS: usize = 20;
const DESCRIPTOR_LEN: usize = 64;
const EPSILON_APPROX: f64 = 1e-6;

type Odometry = VisualOdometry<LinearEigenTriangulator, SmallRng>;

fn init_logging() {
    let _ = pretty_env_logger::try_init_timed();
}

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::from_vertical_fov(1920.0, 1080.0, std::f64::consts::FRAC_PI_2)
}

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

/// Random points around the origin seen by cameras on an arc looking at it.
struct Scene {
    points: Vec<Point3<f64>>,
    descriptors: Vec<Descriptor>,
    cameras: Vec<Camera>,
}

impl Scene {
    fn new(seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let points = (0..NUM_POINTS)
            .map(|_| {
                Point3::new(
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(-2.0..2.0),
                )
            })
            .collect();
        let descriptors = (0..NUM_POINTS)
            .map(|_| {
                Descriptor::Real(
                    (0..DESCRIPTOR_LEN)
                        .map(|_| rng.gen_range(-1.0..1.0))
                        .collect(),
                )
            })
            .collect();
        let cameras = (0..NUM_CAMERAS)
            .map(|i| {
                let angle = -0.5 + 0.05 * i as f64;
                let center = Point3::new(
                    8.0 * angle.sin(),
                    0.5 + 0.2 * (0.7 * i as f64).sin(),
                    -8.0 * angle.cos(),
                );
                Camera::new(intrinsics(), look_at(center, Point3::origin()))
            })
            .collect();
        Self {
            points,
            descriptors,
            cameras,
        }
    }

    /// The projections of the points for which `visible` holds, in a random order.
    fn frame(&self, camera: usize, visible: impl Fn(usize) -> bool, rng: &mut SmallRng) -> Frame {
        let mut pairs: Vec<(Feature, Descriptor)> = (0..self.points.len())
            .filter(|&ix| visible(ix))
            .filter_map(|ix| {
                let keypoint = self.cameras[camera].world_to_image(self.points[ix])?;
                Some((Feature::from(keypoint), self.descriptors[ix].clone()))
            })
            .collect();
        pairs.shuffle(rng);
        pairs.into_iter().collect()
    }

    /// Maps world coordinates into the frame of the first camera scaled to a unit first
    /// baseline, which is the frame the odometry reconstructs in.
    fn to_reconstruction(&self, point: Point3<f64>) -> Point3<f64> {
        let first = self.cameras[0];
        let baseline = (self.cameras[1].optical_center() - first.optical_center()).norm();
        (first.pose.0 * point) / baseline
    }

    /// The point whose descriptor is `descriptor` after the metric normalized both.
    fn point_with_descriptor(&self, metric: &DistanceMetric, descriptor: &Descriptor) -> usize {
        let mut normalized = self.descriptors.clone();
        metric.normalize(&mut normalized);
        normalized
            .iter()
            .position(|d| d == descriptor)
            .expect("landmark descriptor belongs to no point")
    }
}

fn settings() -> VoSettings {
    VoSettings {
        metric: DistanceMetric::new(MetricKind::ScaledL2),
        perform_bundle_adjustment: false,
        ..Default::default()
    }
}

fn odometry(settings: VoSettings) -> Odometry {
    VisualOdometry::new(
        intrinsics(),
        settings,
        LinearEigenTriangulator::new(),
        SmallRng::seed_from_u64(7),
    )
}

fn assert_reconstructs(scene: &Scene, vo: &Odometry, epsilon: f64) {
    for (view, center) in vo.trajectory().into_iter().enumerate() {
        assert_relative_eq!(
            center,
            scene.to_reconstruction(scene.cameras[view].optical_center()),
            epsilon = epsilon
        );
    }
    let map = vo.map();
    for landmark in map.landmark_handles() {
        let landmark = map.landmark(landmark).unwrap();
        if landmark.observations.len() < 2 {
            continue;
        }
        let descriptor = landmark.descriptor.as_ref().unwrap();
        let point = scene.point_with_descriptor(&vo.settings.metric, descriptor);
        assert_relative_eq!(
            landmark.position,
            scene.to_reconstruction(scene.points[point]),
            epsilon = epsilon
        );
    }
}

#[test]
fn reconstructs_every_point_along_an_arc() {
    init_logging();
    let scene = Scene::new(0);
    let mut rng = SmallRng::seed_from_u64(1);
    let mut vo = odometry(settings());

    for camera in 0..NUM_CAMERAS {
        let report = vo.update(scene.frame(camera, |_| true, &mut rng)).unwrap();
        match camera {
            0 => assert_eq!(report.state, TrackingState::Bootstrapping),
            1 => {
                assert_eq!(report.state, TrackingState::Tracking);
                assert_eq!(report.view, Some(ViewHandle(1)));
                assert_eq!(report.num_new_landmarks, NUM_POINTS);
            }
            _ => {
                assert_eq!(report.view, Some(ViewHandle(camera)));
                assert_eq!(report.num_inliers, NUM_POINTS);
                assert_eq!(report.num_incorporated, NUM_POINTS);
                assert_eq!(report.num_new_landmarks, 0);
            }
        }
    }

    assert_eq!(vo.map().num_views(), NUM_CAMERAS);
    assert_eq!(vo.map().num_landmarks(), NUM_POINTS);
    assert_reconstructs(&scene, &vo, EPSILON_APPROX);
}

#[test]
fn seeds_landmarks_for_points_that_appear_later() {
    init_logging();
    let scene = Scene::new(2);
    let mut rng = SmallRng::seed_from_u64(3);
    let mut vo = odometry(settings());
    let late = |ix: usize| ix >= 80;

    for camera in 0..NUM_CAMERAS {
        let visible = |ix: usize| camera >= 3 || !late(ix);
        let report = vo.update(scene.frame(camera, visible, &mut rng)).unwrap();
        if camera == 4 {
            assert_eq!(report.num_new_landmarks, 20);
        }
    }

    assert_eq!(vo.map().num_landmarks(), NUM_POINTS);
    for landmark in vo.map().landmark_handles() {
        let views = vo.map().landmark_views(landmark).count();
        let source = vo.map().source_view(landmark).unwrap();
        let descriptor = vo.map().landmark(landmark).unwrap().descriptor.clone().unwrap();
        if late(scene.point_with_descriptor(&vo.settings.metric, &descriptor)) {
            assert_eq!(source, ViewHandle(3));
            assert_eq!(views, NUM_CAMERAS - 3);
        } else {
            assert_eq!(source, ViewHandle(0));
            assert_eq!(views, NUM_CAMERAS);
        }
    }
    assert_reconstructs(&scene, &vo, EPSILON_APPROX);
}

#[test]
fn failed_frame_changes_nothing() {
    init_logging();
    let scene = Scene::new(4);
    let mut rng = SmallRng::seed_from_u64(5);
    let mut vo = odometry(settings());
    for camera in 0..3 {
        vo.update(scene.frame(camera, |_| true, &mut rng)).unwrap();
    }
    let views = vo.map().num_views();
    let observations = vo.map().num_observations();
    let landmarks = vo.map().num_landmarks();

    let sparse = scene.frame(3, |ix| ix < 5, &mut rng);
    assert_eq!(
        vo.update(sparse),
        Err(TrackingError::Match(MatchError::InsufficientMatches {
            found: 5,
            required: 8
        }))
    );
    assert_eq!(vo.state(), TrackingState::Tracking);
    assert_eq!(vo.map().num_views(), views);
    assert_eq!(vo.map().num_observations(), observations);
    assert_eq!(vo.map().num_landmarks(), landmarks);

    let report = vo.update(scene.frame(3, |_| true, &mut rng)).unwrap();
    assert_eq!(report.view, Some(ViewHandle(views)));
    assert_reconstructs(&scene, &vo, EPSILON_APPROX);
}

#[test]
fn failed_bootstrap_keeps_baseline() {
    init_logging();
    let scene = Scene::new(6);
    let mut rng = SmallRng::seed_from_u64(7);
    let mut vo = odometry(settings());
    vo.update(scene.frame(0, |_| true, &mut rng)).unwrap();

    assert!(vo.update(scene.frame(1, |ix| ix < 4, &mut rng)).is_err());
    assert_eq!(vo.state(), TrackingState::Bootstrapping);
    assert_eq!(vo.map().num_views(), 0);

    // The baseline is still the first camera, so the second camera bootstraps as usual.
    let report = vo.update(scene.frame(1, |_| true, &mut rng)).unwrap();
    assert_eq!(report.state, TrackingState::Tracking);
    assert_reconstructs(&scene, &vo, EPSILON_APPROX);
}

#[test]
fn bootstrap_without_landmarks_keeps_baseline() {
    init_logging();
    let scene = Scene::new(12);
    let mut rng = SmallRng::seed_from_u64(13);
    let mut settings = settings();
    // No triangulated point can reproject within a negative error.
    settings.pnp_ransac.acceptable_error = -1.0;
    let mut vo = odometry(settings);
    vo.update(scene.frame(0, |_| true, &mut rng)).unwrap();

    assert_eq!(
        vo.update(scene.frame(1, |_| true, &mut rng)),
        Err(TrackingError::NoLandmarks)
    );
    assert_eq!(vo.state(), TrackingState::Bootstrapping);
    assert_eq!(vo.map().num_views(), 0);
    assert_eq!(vo.map().num_landmarks(), 0);
}

#[test]
fn mismatched_frame_is_rejected() {
    init_logging();
    let scene = Scene::new(14);
    let mut rng = SmallRng::seed_from_u64(15);
    let mut vo = odometry(settings());

    let mut frame = scene.frame(0, |_| true, &mut rng);
    frame.descriptors.pop();
    assert_eq!(
        vo.update(frame),
        Err(TrackingError::MismatchedFrame {
            features: NUM_POINTS,
            descriptors: NUM_POINTS - 1,
        })
    );
    assert_eq!(vo.state(), TrackingState::Uninitialized);

    vo.update(scene.frame(0, |_| true, &mut rng)).unwrap();
    assert_eq!(vo.state(), TrackingState::Bootstrapping);
}

#[test]
fn reset_starts_a_new_session() {
    init_logging();
    let scene = Scene::new(8);
    let mut rng = SmallRng::seed_from_u64(9);
    let mut vo = odometry(settings());
    for camera in 0..4 {
        vo.update(scene.frame(camera, |_| true, &mut rng)).unwrap();
    }

    vo.reset();
    assert_eq!(vo.state(), TrackingState::Uninitialized);
    assert_eq!(vo.map().num_views(), 0);
    assert_eq!(vo.map().num_landmarks(), 0);
    assert!(!vo.map().is_valid_view(ViewHandle(0)));

    for camera in 0..3 {
        vo.update(scene.frame(camera, |_| true, &mut rng)).unwrap();
    }
    assert_eq!(vo.map().num_views(), 3);
    assert_reconstructs(&scene, &vo, EPSILON_APPROX);
}

#[test]
fn bundle_adjustment_keeps_exact_reconstruction() {
    init_logging();
    let scene = Scene::new(10);
    let mut rng = SmallRng::seed_from_u64(11);
    let mut vo = odometry(VoSettings {
        perform_bundle_adjustment: true,
        annotate: true,
        ..settings()
    });

    for camera in 0..8 {
        let report = vo.update(scene.frame(camera, |_| true, &mut rng)).unwrap();
        if camera >= 2 {
            let annotation = report.annotation.unwrap();
            assert_eq!(annotation.features.len(), NUM_POINTS);
            assert_eq!(annotation.inliers.len(), NUM_POINTS);
            assert_eq!(annotation.projections.len(), NUM_POINTS);
        }
    }
    assert_reconstructs(&scene, &vo, EPSILON_APPROX);
}
