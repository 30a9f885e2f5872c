use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::Point2;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Allows the retrieval of the point on the image the feature came from.
pub trait ImagePoint {
    /// Retrieves the point on the image
    fn image_point(&self) -> Point2<f64>;
}

/// A point on an image frame in pixel coordinates.
///
/// The keypoint is neither undistorted nor normalized. Use a camera model to convert it
/// into a bearing or a normalized image coordinate.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct KeyPoint(pub Point2<f64>);

impl KeyPoint {
    pub fn new(u: f64, v: f64) -> Self {
        Self(Point2::new(u, v))
    }
}

impl ImagePoint for KeyPoint {
    fn image_point(&self) -> Point2<f64> {
        self.0
    }
}

/// A detected feature: its pixel location plus the optional scale and orientation
/// reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Feature {
    pub keypoint: KeyPoint,
    pub scale: Option<f64>,
    /// Orientation in radians.
    pub orientation: Option<f64>,
}

impl Feature {
    /// Creates a feature at pixel `(u, v)` with no scale or orientation.
    pub fn new(u: f64, v: f64) -> Self {
        Self {
            keypoint: KeyPoint::new(u, v),
            scale: None,
            orientation: None,
        }
    }

    #[must_use]
    pub fn with_scale(self, scale: f64) -> Self {
        Self {
            scale: Some(scale),
            ..self
        }
    }

    #[must_use]
    pub fn with_orientation(self, orientation: f64) -> Self {
        Self {
            orientation: Some(orientation),
            ..self
        }
    }

    pub fn u(&self) -> f64 {
        self.keypoint.x
    }

    pub fn v(&self) -> f64 {
        self.keypoint.y
    }
}

impl From<KeyPoint> for Feature {
    fn from(keypoint: KeyPoint) -> Self {
        Self {
            keypoint,
            scale: None,
            orientation: None,
        }
    }
}

impl ImagePoint for Feature {
    fn image_point(&self) -> Point2<f64> {
        self.keypoint.0
    }
}
