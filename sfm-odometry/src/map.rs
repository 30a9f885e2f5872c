//! The session arena.
//!
//! Views, observations and landmarks live in append-only tables owned by a [`Map`] and refer to
//! each other by index handles. Handles are assigned in creation order starting at zero and are
//! never reused until [`Map::reset`] empties every table.

use crate::{Descriptor, DistanceMetric, IncorporationError};
use derive_more::{Display, From, Into};
use log::*;
use sfm_core::{
    nalgebra::{Point3, UnitVector3},
    Feature, KeyPoint, Projective, TriangulatorObservations, WorldPoint, WorldToCamera,
};
use sfm_pinhole::Camera;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct ViewHandle(pub usize);

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct LandmarkHandle(pub usize);

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct ObservationHandle(pub usize);

/// One processed frame.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct View {
    pub camera: Camera,
    /// One observation per feature of the frame, in the order the features were given.
    pub observations: Vec<ObservationHandle>,
}

/// A feature detected in a view.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct Observation {
    pub view: ViewHandle,
    pub feature: Feature,
    pub descriptor: Descriptor,
    /// Set once, the first time the observation is incorporated into a landmark.
    pub landmark: Option<LandmarkHandle>,
}

impl Observation {
    pub fn keypoint(&self) -> KeyPoint {
        self.feature.keypoint
    }
}

/// A 3d point supported by observations from several views.
///
/// The position and descriptor only carry meaning once the landmark has observations. The
/// descriptor is that of the first observation.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct Landmark {
    pub position: Point3<f64>,
    pub descriptor: Option<Descriptor>,
    pub observations: Vec<ObservationHandle>,
}

impl Landmark {
    fn new() -> Self {
        Self {
            position: Point3::origin(),
            descriptor: None,
            observations: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn world_point(&self) -> WorldPoint {
        WorldPoint::from_point(self.position)
    }
}

/// The views, observations and landmarks of one session.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct Map {
    views: Vec<View>,
    observations: Vec<Observation>,
    landmarks: Vec<Landmark>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empties every table. Handle assignment starts over at zero.
    pub fn reset(&mut self) {
        info!(
            "resetting map with {} views and {} landmarks",
            self.views.len(),
            self.landmarks.len()
        );
        self.views.clear();
        self.observations.clear();
        self.landmarks.clear();
    }

    pub fn create_view(&mut self, camera: Camera) -> ViewHandle {
        self.views.push(View {
            camera,
            observations: vec![],
        });
        ViewHandle(self.views.len() - 1)
    }

    /// Records a feature detected in `view`.
    ///
    /// Panics if the view does not exist.
    pub fn add_observation(
        &mut self,
        view: ViewHandle,
        feature: Feature,
        descriptor: Descriptor,
    ) -> ObservationHandle {
        let handle = ObservationHandle(self.observations.len());
        self.views[view.0].observations.push(handle);
        self.observations.push(Observation {
            view,
            feature,
            descriptor,
            landmark: None,
        });
        handle
    }

    /// Creates a landmark without observations.
    pub fn create_landmark(&mut self) -> LandmarkHandle {
        self.landmarks.push(Landmark::new());
        LandmarkHandle(self.landmarks.len() - 1)
    }

    pub fn is_valid_view(&self, view: ViewHandle) -> bool {
        view.0 < self.views.len()
    }

    pub fn is_valid_landmark(&self, landmark: LandmarkHandle) -> bool {
        landmark.0 < self.landmarks.len()
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    pub fn num_landmarks(&self) -> usize {
        self.landmarks.len()
    }

    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    pub fn view(&self, view: ViewHandle) -> Option<&View> {
        self.views.get(view.0)
    }

    pub fn observation(&self, observation: ObservationHandle) -> Option<&Observation> {
        self.observations.get(observation.0)
    }

    pub fn landmark(&self, landmark: LandmarkHandle) -> Option<&Landmark> {
        self.landmarks.get(landmark.0)
    }

    /// Views in creation order.
    pub fn view_handles(&self) -> impl Iterator<Item = ViewHandle> + Clone {
        (0..self.views.len()).map(ViewHandle)
    }

    /// Landmarks in creation order.
    pub fn landmark_handles(&self) -> impl Iterator<Item = LandmarkHandle> + Clone {
        (0..self.landmarks.len()).map(LandmarkHandle)
    }

    /// The newest `count` views, oldest first.
    pub fn recent_views(&self, count: usize) -> Vec<ViewHandle> {
        let start = self.views.len().saturating_sub(count);
        (start..self.views.len()).map(ViewHandle).collect()
    }

    pub(crate) fn set_view_pose(&mut self, view: ViewHandle, pose: WorldToCamera) {
        if let Some(view) = self.views.get_mut(view.0) {
            view.camera.pose = pose;
        }
    }

    pub(crate) fn set_landmark_position(
        &mut self,
        landmark: LandmarkHandle,
        position: Point3<f64>,
    ) {
        if let Some(landmark) = self.landmarks.get_mut(landmark.0) {
            landmark.position = position;
        }
    }

    /// The view that made the first observation of a landmark.
    pub fn source_view(&self, landmark: LandmarkHandle) -> Option<ViewHandle> {
        let first = *self.landmark(landmark)?.observations.first()?;
        Some(self.observations[first.0].view)
    }

    /// The views whose observations support a landmark, in incorporation order.
    pub fn landmark_views(
        &self,
        landmark: LandmarkHandle,
    ) -> impl Iterator<Item = ViewHandle> + '_ {
        self.landmark(landmark)
            .into_iter()
            .flat_map(|landmark| landmark.observations.iter())
            .map(move |observation| self.observations[observation.0].view)
    }

    /// Whether at least `n` distinct views among `views` observed the landmark.
    pub fn seen_by_at_least_n_views(
        &self,
        landmark: LandmarkHandle,
        views: &[ViewHandle],
        n: usize,
    ) -> bool {
        let mut seen: Vec<ViewHandle> = self
            .landmark_views(landmark)
            .filter(|view| views.contains(view))
            .collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len() >= n
    }

    /// Whether any observation of `view` supports `landmark`.
    pub fn has_observed_landmark(&self, view: ViewHandle, landmark: LandmarkHandle) -> bool {
        self.landmark_views(landmark).any(|v| v == view)
    }

    /// The landmarks supported by observations of `view`.
    pub fn observed_landmarks(
        &self,
        view: ViewHandle,
    ) -> impl Iterator<Item = LandmarkHandle> + '_ {
        self.view(view)
            .into_iter()
            .flat_map(|view| view.observations.iter())
            .filter_map(move |observation| self.observations[observation.0].landmark)
    }

    /// The observations of `view` that do not support a landmark yet.
    pub fn unincorporated_observations(&self, view: ViewHandle) -> Vec<ObservationHandle> {
        self.view(view)
            .map(|view| {
                view.observations
                    .iter()
                    .copied()
                    .filter(|observation| self.observations[observation.0].landmark.is_none())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The camera pose and bearing of an observation, as consumed by triangulators.
    pub fn observation_ray(
        &self,
        observation: ObservationHandle,
    ) -> Option<(WorldToCamera, UnitVector3<f64>)> {
        let observation = self.observation(observation)?;
        let camera = &self.view(observation.view)?.camera;
        Some(camera.pose_bearing(observation.keypoint()))
    }

    /// The reprojection error in pixels of `point` in the view of the observation.
    pub fn observation_reprojection_error(
        &self,
        observation: ObservationHandle,
        point: WorldPoint,
    ) -> Option<f64> {
        let observation = self.observation(observation)?;
        let camera = &self.view(observation.view)?.camera;
        camera.reprojection_error(observation.keypoint(), point)
    }

    /// Triangulates the observations of a landmark together with an optional extra observation.
    pub fn triangulate<T>(
        &self,
        triangulator: &T,
        landmark: LandmarkHandle,
        extra: Option<ObservationHandle>,
    ) -> Option<WorldPoint>
    where
        T: TriangulatorObservations,
    {
        let rays = self
            .landmark(landmark)?
            .observations
            .iter()
            .copied()
            .chain(extra)
            .map(|observation| self.observation_ray(observation))
            .collect::<Option<Vec<_>>>()?;
        triangulator.triangulate_observations(rays.into_iter())
    }

    /// Adds an observation to the support of a landmark.
    ///
    /// The first observation of a landmark is always accepted and fixes its descriptor. Later
    /// observations must be within the metric's cutoff of that descriptor when one is set. With
    /// `retriangulate` the position is recomputed from all observations including the new one,
    /// and a failed triangulation rejects the observation. Rejections leave the map unchanged.
    pub fn incorporate_observation<T>(
        &mut self,
        landmark: LandmarkHandle,
        observation: ObservationHandle,
        retriangulate: bool,
        metric: &DistanceMetric,
        triangulator: &T,
    ) -> Result<(), IncorporationError>
    where
        T: TriangulatorObservations,
    {
        let existing = self
            .landmark(landmark)
            .ok_or(IncorporationError::InvalidLandmark(landmark))?;
        let candidate = self
            .observation(observation)
            .ok_or(IncorporationError::InvalidObservation(observation))?;
        if candidate.landmark.is_some() {
            return Err(IncorporationError::AlreadyIncorporated(observation));
        }

        if existing.is_empty() {
            let descriptor = candidate.descriptor.clone();
            self.attach(landmark, observation);
            self.landmarks[landmark.0].descriptor = Some(descriptor);
            trace!("landmark {} founded by observation {}", landmark, observation);
            return Ok(());
        }

        if metric.has_cutoff() {
            if let Some(descriptor) = &existing.descriptor {
                let distance = metric.normalized_distance(descriptor, &candidate.descriptor);
                if !metric.accepts(distance) {
                    return Err(IncorporationError::DescriptorMismatch {
                        distance,
                        max: metric.max_distance,
                    });
                }
            }
        }

        let position = if retriangulate {
            let point = self
                .triangulate(triangulator, landmark, Some(observation))
                .and_then(|point| point.point())
                .ok_or(IncorporationError::TriangulationFailed)?;
            Some(point)
        } else {
            None
        };

        self.attach(landmark, observation);
        if let Some(position) = position {
            self.landmarks[landmark.0].position = position;
        }
        Ok(())
    }

    fn attach(&mut self, landmark: LandmarkHandle, observation: ObservationHandle) {
        self.landmarks[landmark.0].observations.push(observation);
        self.observations[observation.0].landmark = Some(landmark);
    }
}
