use crate::{LandmarkHandle, ObservationHandle};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    #[error("found {found} matches but at least {required} are required")]
    InsufficientMatches { found: usize, required: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TwoViewError {
    #[error("two-view geometry needs at least {required} matches, got {found}")]
    TooFewMatches { found: usize, required: usize },
    #[error("no fundamental matrix had at least {required} inliers")]
    InsufficientInliers { required: usize },
    #[error("the essential matrix could not be decomposed into a pose")]
    DegenerateEssential,
    #[error("only {visible} points were in front of both cameras, {required} required")]
    Ambiguous { visible: usize, required: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoseError {
    #[error("pose estimation needs at least {required} correspondences, got {found}")]
    InsufficientCorrespondences { found: usize, required: usize },
    #[error("no pose had at least {required} inliers")]
    InsufficientInliers { required: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IncorporationError {
    #[error("descriptor distance {distance} exceeds the maximum of {max}")]
    DescriptorMismatch { distance: f64, max: f64 },
    #[error("observations of the landmark could not be triangulated")]
    TriangulationFailed,
    #[error("landmark {0:?} does not exist")]
    InvalidLandmark(LandmarkHandle),
    #[error("observation {0:?} does not exist")]
    InvalidObservation(ObservationHandle),
    #[error("observation {0:?} already supports a landmark")]
    AlreadyIncorporated(ObservationHandle),
}

/// Why a frame could not be processed.
///
/// The session keeps its state from before the frame in every case.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackingError {
    #[error("matching failed: {0}")]
    Match(#[from] MatchError),
    #[error("bootstrapping failed: {0}")]
    TwoView(#[from] TwoViewError),
    #[error("localization failed: {0}")]
    Pose(#[from] PoseError),
    #[error("frame has {features} features but {descriptors} descriptors")]
    MismatchedFrame { features: usize, descriptors: usize },
    #[error("bootstrap pair produced no landmarks")]
    NoLandmarks,
}
