use crate::{
    estimate_pose, estimate_relative_pose, match_features, match_landmarks, Descriptor,
    IncorporationError, LandmarkHandle, Map, ObservationHandle, TrackingError, ViewHandle,
    VoSettings,
};
use itertools::Itertools;
use log::*;
use rand::Rng;
use sfm_core::{
    nalgebra::Point3, Feature, FeatureMatch, FeatureWorldMatch, KeyPoint, Pose,
    TriangulatorObservations, WorldToCamera,
};
use sfm_optimize::{BundleAdjuster, BundleAdjustError, BundleObservation};
use sfm_pinhole::{Camera, CameraIntrinsics};
use std::collections::HashMap;
use std::iter::FromIterator;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The features detected in one image and their descriptors, index aligned.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub features: Vec<Feature>,
    pub descriptors: Vec<Descriptor>,
}

impl Frame {
    /// Panics if there is not exactly one descriptor per feature. Frames assembled by hand are
    /// checked again by [`VisualOdometry::update`].
    pub fn new(features: Vec<Feature>, descriptors: Vec<Descriptor>) -> Self {
        assert_eq!(
            features.len(),
            descriptors.len(),
            "every feature needs exactly one descriptor"
        );
        Self {
            features,
            descriptors,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    fn keypoint(&self, feature: usize) -> KeyPoint {
        self.features[feature].keypoint
    }
}

impl FromIterator<(Feature, Descriptor)> for Frame {
    fn from_iter<I: IntoIterator<Item = (Feature, Descriptor)>>(iter: I) -> Self {
        let (features, descriptors) = iter.into_iter().unzip();
        Self {
            features,
            descriptors,
        }
    }
}

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingState {
    /// Waiting for the first frame.
    Uninitialized,
    /// Holding the first frame until a second one can be registered against it.
    Bootstrapping,
    /// Localizing every frame against the landmarks of the sliding window.
    Tracking,
}

/// What a frame looked like to the tracker, for drawing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Annotation {
    /// Every feature of the frame.
    pub features: Vec<KeyPoint>,
    /// Features that now support a landmark.
    pub inliers: Vec<(KeyPoint, LandmarkHandle)>,
    /// Where the landmarks of the window project into the new view.
    pub projections: Vec<(LandmarkHandle, KeyPoint)>,
}

/// The outcome of a successful [`VisualOdometry::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// The state after the frame.
    pub state: TrackingState,
    /// The view created for the frame, if any.
    pub view: Option<ViewHandle>,
    pub num_matches: usize,
    pub num_inliers: usize,
    /// Observations added to existing landmarks.
    pub num_incorporated: usize,
    pub num_new_landmarks: usize,
    pub bundle_adjusted: bool,
    pub annotation: Option<Annotation>,
}

impl FrameReport {
    fn new(state: TrackingState) -> Self {
        Self {
            state,
            view: None,
            num_matches: 0,
            num_inliers: 0,
            num_incorporated: 0,
            num_new_landmarks: 0,
            bundle_adjusted: false,
            annotation: None,
        }
    }
}

/// Monocular visual odometry over a stream of frames from one camera.
///
/// The first two frames bootstrap the map from their relative pose, which fixes the world frame
/// to the first camera and the scale to a unit baseline. Every later frame is localized against
/// the landmarks of the sliding window, its inlier observations are incorporated into their
/// landmarks, unmatched features seen by the two newest views become new landmarks, and the
/// window is optionally bundle adjusted.
///
/// A frame that fails leaves the session as it was.
pub struct VisualOdometry<T, R> {
    pub settings: VoSettings,
    intrinsics: CameraIntrinsics,
    map: Map,
    state: TrackingState,
    baseline: Option<Frame>,
    triangulator: T,
    rng: R,
}

impl<T, R> VisualOdometry<T, R>
where
    T: TriangulatorObservations,
    R: Rng,
{
    pub fn new(
        intrinsics: CameraIntrinsics,
        settings: VoSettings,
        triangulator: T,
        rng: R,
    ) -> Self {
        Self {
            settings,
            intrinsics,
            map: Map::new(),
            state: TrackingState::Uninitialized,
            baseline: None,
            triangulator,
            rng,
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn map(&self) -> &Map {
        &self.map
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Changes the intrinsics used for frames from now on.
    pub fn set_intrinsics(&mut self, intrinsics: CameraIntrinsics) {
        self.intrinsics = intrinsics;
    }

    /// The optical center of every view, oldest first.
    pub fn trajectory(&self) -> Vec<Point3<f64>> {
        self.map
            .view_handles()
            .filter_map(|view| self.map.view(view))
            .map(|view| view.camera.optical_center())
            .collect()
    }

    /// Forgets every view and landmark and waits for a new first frame.
    pub fn reset(&mut self) {
        self.map.reset();
        self.baseline = None;
        self.state = TrackingState::Uninitialized;
    }

    /// Processes the next frame.
    pub fn update(&mut self, mut frame: Frame) -> Result<FrameReport, TrackingError> {
        if frame.features.len() != frame.descriptors.len() {
            return Err(TrackingError::MismatchedFrame {
                features: frame.features.len(),
                descriptors: frame.descriptors.len(),
            });
        }
        self.settings.metric.normalize(&mut frame.descriptors);
        match self.state {
            TrackingState::Uninitialized => {
                info!("storing baseline frame with {} features", frame.len());
                self.baseline = Some(frame);
                self.state = TrackingState::Bootstrapping;
                Ok(FrameReport::new(self.state))
            }
            TrackingState::Bootstrapping => self.bootstrap(frame),
            TrackingState::Tracking => self.track(frame),
        }
    }

    fn bootstrap(&mut self, frame: Frame) -> Result<FrameReport, TrackingError> {
        let baseline = match self.baseline.take() {
            Some(baseline) => baseline,
            None => {
                // Without a baseline this frame becomes one.
                self.baseline = Some(frame);
                return Ok(FrameReport::new(self.state));
            }
        };
        match self.initialize(&baseline, &frame) {
            Ok(report) => Ok(report),
            Err(e) => {
                info!("bootstrapping failed, keeping baseline: {}", e);
                self.baseline = Some(baseline);
                Err(e)
            }
        }
    }

    fn initialize(
        &mut self,
        baseline: &Frame,
        frame: &Frame,
    ) -> Result<FrameReport, TrackingError> {
        let matches = match_features(
            &self.settings.metric,
            &self.settings.matcher,
            &baseline.descriptors,
            &frame.descriptors,
        )?;
        let pixel_matches = matches
            .iter()
            .map(|m| FeatureMatch(baseline.keypoint(m.a), frame.keypoint(m.b)))
            .collect_vec();
        let solution = estimate_relative_pose(
            &pixel_matches,
            &self.intrinsics,
            &self.intrinsics,
            &self.settings.fundamental_ransac,
            self.settings.min_points_visible_ratio,
            &self.triangulator,
            &mut self.rng,
        )?;

        let (first, first_observations) =
            self.add_view(Camera::new(self.intrinsics, WorldToCamera::identity()), baseline);
        let (second, second_observations) =
            self.add_view(Camera::new(self.intrinsics, solution.pose.into()), frame);
        let mut inliers = vec![];
        for &ix in &solution.inliers {
            let m = matches[ix];
            match self.landmark_from_pair(first_observations[m.a], second_observations[m.b]) {
                Ok(landmark) => inliers.push((frame.keypoint(m.b), landmark)),
                Err(e) => trace!("bootstrap match {:?} not triangulated: {}", m, e),
            }
        }
        if inliers.is_empty() {
            // The map holds nothing but this pair while bootstrapping.
            self.map.reset();
            return Err(TrackingError::NoLandmarks);
        }
        info!(
            "bootstrapped views {} and {} with {} landmarks from {} matches",
            first,
            second,
            inliers.len(),
            matches.len()
        );
        self.state = TrackingState::Tracking;

        let mut report = FrameReport::new(self.state);
        report.view = Some(second);
        report.num_matches = matches.len();
        report.num_inliers = solution.inliers.len();
        report.num_new_landmarks = inliers.len();
        if self.settings.annotate {
            report.annotation = Some(self.annotation(second, frame, inliers));
        }
        Ok(report)
    }

    fn track(&mut self, frame: Frame) -> Result<FrameReport, TrackingError> {
        let window = self.map.recent_views(self.settings.sliding_window_length);
        let candidates = self.window_landmarks(&window);
        let landmark_descriptors = candidates
            .iter()
            .filter_map(|&landmark| {
                Some((landmark, self.map.landmark(landmark)?.descriptor.as_ref()?))
            })
            .collect_vec();
        let matches = match_landmarks(
            &self.settings.metric,
            &self.settings.matcher,
            &frame.descriptors,
            &landmark_descriptors,
        )?;
        let (matches, correspondences): (Vec<_>, Vec<_>) = matches
            .into_iter()
            .filter_map(|m| {
                let landmark = self.map.landmark(m.landmark)?;
                Some((
                    m,
                    FeatureWorldMatch(frame.keypoint(m.feature), landmark.world_point()),
                ))
            })
            .unzip();
        debug!(
            "matched {} of {} features to {} window landmarks",
            matches.len(),
            frame.len(),
            candidates.len()
        );

        let solution = estimate_pose(
            &correspondences,
            &self.intrinsics,
            &self.settings.pnp_ransac,
            &mut self.rng,
        )?;

        let (view, observations) = self.add_view(solution.camera, &frame);
        let metric = self.settings.metric;
        let mut inliers = vec![];
        for &ix in &solution.inliers {
            let m = matches[ix];
            if self.map.has_observed_landmark(view, m.landmark) {
                continue;
            }
            match self.map.incorporate_observation(
                m.landmark,
                observations[m.feature],
                true,
                &metric,
                &self.triangulator,
            ) {
                Ok(()) => inliers.push((frame.keypoint(m.feature), m.landmark)),
                Err(e) => debug!(
                    "dropping match of feature {} to landmark {}: {}",
                    m.feature, m.landmark, e
                ),
            }
        }
        let num_new_landmarks = self.seed_landmarks();
        info!(
            "tracked view {} with {} inliers, {} incorporated, {} new landmarks",
            view,
            solution.inliers.len(),
            inliers.len(),
            num_new_landmarks
        );

        let bundle_adjusted = self.settings.perform_bundle_adjustment
            && match self.bundle_adjust() {
                Ok(()) => true,
                Err(e) => {
                    warn!("keeping unadjusted window: {}", e);
                    false
                }
            };

        let mut report = FrameReport::new(self.state);
        report.view = Some(view);
        report.num_matches = matches.len();
        report.num_inliers = solution.inliers.len();
        report.num_incorporated = inliers.len();
        report.num_new_landmarks = num_new_landmarks;
        report.bundle_adjusted = bundle_adjusted;
        if self.settings.annotate {
            report.annotation = Some(self.annotation(view, &frame, inliers));
        }
        Ok(report)
    }

    /// Creates a view with one observation per feature of the frame.
    fn add_view(&mut self, camera: Camera, frame: &Frame) -> (ViewHandle, Vec<ObservationHandle>) {
        let view = self.map.create_view(camera);
        let observations = frame
            .features
            .iter()
            .zip(&frame.descriptors)
            .map(|(&feature, descriptor)| {
                self.map.add_observation(view, feature, descriptor.clone())
            })
            .collect();
        (view, observations)
    }

    /// Landmarks observed from the window that have been triangulated from at least two views.
    fn window_landmarks(&self, window: &[ViewHandle]) -> Vec<LandmarkHandle> {
        window
            .iter()
            .flat_map(|&view| self.map.observed_landmarks(view))
            .filter(|&landmark| {
                self.map
                    .landmark(landmark)
                    .map_or(false, |l| l.observations.len() >= 2)
            })
            .sorted()
            .dedup()
            .collect()
    }

    /// Makes a landmark out of two unincorporated observations from different views.
    ///
    /// The point is triangulated from the known cameras and must reproject within the pose
    /// consensus error in both views.
    fn landmark_from_pair(
        &mut self,
        older: ObservationHandle,
        newer: ObservationHandle,
    ) -> Result<LandmarkHandle, IncorporationError> {
        let metric = self.settings.metric;
        if metric.has_cutoff() {
            let descriptor = |observation| {
                self.map
                    .observation(observation)
                    .map(|o| &o.descriptor)
                    .ok_or(IncorporationError::InvalidObservation(observation))
            };
            let distance = metric.normalized_distance(descriptor(older)?, descriptor(newer)?);
            if !metric.accepts(distance) {
                return Err(IncorporationError::DescriptorMismatch {
                    distance,
                    max: metric.max_distance,
                });
            }
        }

        let rays = [older, newer]
            .iter()
            .map(|&observation| {
                self.map
                    .observation_ray(observation)
                    .ok_or(IncorporationError::InvalidObservation(observation))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let point = self
            .triangulator
            .triangulate_observations(rays.into_iter())
            .ok_or(IncorporationError::TriangulationFailed)?;
        let max_error = self.settings.pnp_ransac.acceptable_error;
        let consistent = [older, newer].iter().all(|&observation| {
            self.map
                .observation_reprojection_error(observation, point)
                .map_or(false, |error| error <= max_error)
        });
        if !consistent {
            return Err(IncorporationError::TriangulationFailed);
        }

        let landmark = self.map.create_landmark();
        self.map
            .incorporate_observation(landmark, older, false, &metric, &self.triangulator)?;
        self.map
            .incorporate_observation(landmark, newer, true, &metric, &self.triangulator)?;
        Ok(landmark)
    }

    /// Turns features of the newest two views that support no landmark yet into landmarks when
    /// they match each other.
    fn seed_landmarks(&mut self) -> usize {
        let views = self.map.recent_views(2);
        let (older, newer) = match views[..] {
            [older, newer] => (older, newer),
            _ => return 0,
        };
        let older = self.map.unincorporated_observations(older);
        let newer = self.map.unincorporated_observations(newer);
        let descriptors = |observations: &[ObservationHandle]| -> Vec<Descriptor> {
            observations
                .iter()
                .filter_map(|&o| Some(self.map.observation(o)?.descriptor.clone()))
                .collect()
        };
        let matches = match match_features(
            &self.settings.metric,
            &self.settings.matcher,
            &descriptors(&older),
            &descriptors(&newer),
        ) {
            Ok(matches) => matches,
            Err(e) => {
                debug!("no new landmarks: {}", e);
                return 0;
            }
        };
        matches
            .iter()
            .filter(|m| self.landmark_from_pair(older[m.a], newer[m.b]).is_ok())
            .count()
    }

    /// Refines the poses of the window and the landmarks they observe.
    fn bundle_adjust(&mut self) -> Result<(), BundleAdjustError> {
        let window = self.map.recent_views(self.settings.sliding_window_length);
        let landmarks = self.window_landmarks(&window);
        let point_indices: HashMap<LandmarkHandle, usize> = landmarks
            .iter()
            .enumerate()
            .map(|(ix, &landmark)| (landmark, ix))
            .collect();

        let views = window
            .iter()
            .filter_map(|&handle| Some((handle, self.map.view(handle)?)))
            .collect_vec();
        let poses = views.iter().map(|(_, view)| view.camera.pose).collect_vec();
        let mut observations = vec![];
        for (view_ix, (_, view)) in views.iter().enumerate() {
            let intrinsics = view.camera.intrinsics;
            for &handle in &view.observations {
                let observation = match self.map.observation(handle) {
                    Some(observation) => observation,
                    None => continue,
                };
                if let Some(&point) = observation
                    .landmark
                    .and_then(|landmark| point_indices.get(&landmark))
                {
                    observations.push(BundleObservation {
                        view: view_ix,
                        point,
                        keypoint: intrinsics.normalize(observation.keypoint()),
                        scale: intrinsics.mean_focal(),
                    });
                }
            }
        }
        let points = landmarks
            .iter()
            .filter_map(|&landmark| Some(self.map.landmark(landmark)?.position))
            .collect_vec();

        let fixed_views = self.settings.bundle_adjustment.fixed_views;
        let handles = views.iter().map(|&(handle, _)| handle).collect_vec();
        let (poses, points) = BundleAdjuster::new(poses, points, observations, fixed_views)
            .adjust(&self.settings.bundle_adjustment)?;
        for (view, pose) in handles.into_iter().zip(poses) {
            self.map.set_view_pose(view, pose);
        }
        for (&landmark, position) in landmarks.iter().zip(points) {
            self.map.set_landmark_position(landmark, position);
        }
        debug!(
            "bundle adjusted {} views and {} landmarks",
            window.len(),
            landmarks.len()
        );
        Ok(())
    }

    fn annotation(
        &self,
        view: ViewHandle,
        frame: &Frame,
        inliers: Vec<(KeyPoint, LandmarkHandle)>,
    ) -> Annotation {
        let window = self.map.recent_views(self.settings.sliding_window_length);
        let projections = match self.map.view(view) {
            Some(view) => self
                .window_landmarks(&window)
                .into_iter()
                .filter_map(|landmark| {
                    let position = self.map.landmark(landmark)?.position;
                    Some((landmark, view.camera.world_to_image(position)?))
                })
                .collect(),
            None => vec![],
        };
        Annotation {
            features: frame.features.iter().map(|f| f.keypoint).collect(),
            inliers,
            projections,
        }
    }
}
