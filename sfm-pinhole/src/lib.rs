//! Pinhole cameras for the structure-from-motion crates.
//!
//! [`CameraIntrinsics`] converts between pixel coordinates and normalized image coordinates (and
//! therefore bearings), handling lens [`Distortion`] and image bounds. A [`Camera`] pairs intrinsics
//! with a [`WorldToCamera`](sfm_core::WorldToCamera) pose and can project world points into its
//! image. [`FundamentalMatrix`] and [`EssentialMatrix`] encode the epipolar constraint between two
//! images in pixel and normalized coordinates respectively.

mod camera;
mod distortion;
mod essential;
mod fundamental;

pub use camera::*;
pub use distortion::*;
pub use essential::*;
pub use fundamental::*;

use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use num_traits::Float;
use sfm_core::nalgebra::{Matrix3, Point2, Point3, UnitVector3, Vector2};
use sfm_core::{CameraModel, CameraPoint, ImagePoint, KeyPoint, Projective};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A point in normalized image coordinates. This keypoint has been corrected
/// for distortion and normalized based on the camera intrinsic matrix, so it lies on
/// the virtual image plane at `z = 1` in front of the optical center.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct NormalizedKeyPoint(pub Point2<f64>);

impl NormalizedKeyPoint {
    /// Tries to convert the [`CameraPoint`] into a [`NormalizedKeyPoint`], but it may fail
    /// in extreme conditions, in which case `None` is returned.
    pub fn from_camera_point(point: CameraPoint) -> Option<Self> {
        Point2::from_homogeneous(point.point()?.coords).map(Self)
    }

    /// Creates the keypoint where the bearing pierces the virtual image plane.
    pub fn from_bearing(bearing: UnitVector3<f64>) -> Option<Self> {
        Point2::from_homogeneous(bearing.into_inner()).map(Self)
    }

    /// The [`CameraPoint`] on this keypoint's ray at the given depth along the optical axis.
    pub fn with_depth(self, depth: f64) -> CameraPoint {
        (self.coords * depth).push(depth).to_homogeneous().into()
    }

    /// The point formed on the virtual image plane at a depth 1.0 in front of the camera.
    pub fn virtual_image_point(self) -> Point3<f64> {
        self.coords.push(1.0).into()
    }

    /// The unit bearing through this keypoint.
    pub fn bearing(self) -> UnitVector3<f64> {
        UnitVector3::new_normalize(self.coords.push(1.0))
    }
}

/// A rectangular region of the image that contains valid pixels.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ImageBounds {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ImageBounds {
    /// Bounds of an image of the given size with its origin at the top-left pixel.
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            width,
            height,
        }
    }

    pub fn contains(&self, point: Point2<f64>) -> bool {
        point.x >= self.left
            && point.x < self.left + self.width
            && point.y >= self.top
            && point.y < self.top + self.height
    }
}

/// This contains intrinsic camera parameters as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters),
/// along with the lens distortion and the image bounds.
///
/// Intrinsics are supplied once per session and shared by every view unless explicitly changed.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
    pub distortion: Distortion,
    /// When present, projections outside these bounds are not visible.
    pub bounds: Option<ImageBounds>,
}

impl CameraIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic matrix.
    /// This would imply that the pixel positions have an origin at `0,0`,
    /// the pixel distance unit is the focal length, pixels are square,
    /// and there is no skew, distortion, or bounds.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            skew: 0.0,
            principal_point: Point2::new(0.0, 0.0),
            distortion: Distortion::none(),
            bounds: None,
        }
    }

    /// Square-pixel intrinsics for an image of `width` by `height` pixels with the given vertical
    /// field of view in radians. The principal point is the image center.
    ///
    /// ```
    /// use sfm_pinhole::CameraIntrinsics;
    /// let intrinsics = CameraIntrinsics::from_vertical_fov(1920.0, 1080.0, std::f64::consts::FRAC_PI_2);
    /// assert!((intrinsics.focals.y - 540.0).abs() < 1e-9);
    /// assert_eq!(intrinsics.focals.x, intrinsics.focals.y);
    /// ```
    pub fn from_vertical_fov(width: f64, height: f64, fov: f64) -> Self {
        let focal = 0.5 * height / Float::tan(0.5 * fov);
        Self::identity()
            .focal(focal)
            .principal_point(Point2::new(0.5 * width, 0.5 * height))
            .bounds(ImageBounds::new(width, height))
    }

    #[must_use]
    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    #[must_use]
    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    #[must_use]
    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    #[must_use]
    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    #[must_use]
    pub fn distortion(self, distortion: Distortion) -> Self {
        Self { distortion, ..self }
    }

    #[must_use]
    pub fn bounds(self, bounds: ImageBounds) -> Self {
        Self {
            bounds: Some(bounds),
            ..self
        }
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  self.skew,      self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }

    /// Mean of the two focal lengths, used to express normalized errors in pixels.
    pub fn mean_focal(&self) -> f64 {
        0.5 * (self.focals.x + self.focals.y)
    }

    /// Whether the pixel lies inside the image bounds. Always true without bounds.
    pub fn contains(&self, keypoint: KeyPoint) -> bool {
        self.bounds.map_or(true, |bounds| bounds.contains(keypoint.0))
    }

    /// Converts a pixel into a [`NormalizedKeyPoint`], removing lens distortion.
    ///
    /// ```
    /// use sfm_core::KeyPoint;
    /// use sfm_pinhole::CameraIntrinsics;
    /// use sfm_core::nalgebra::{Vector2, Point2};
    /// let intrinsics = CameraIntrinsics::identity()
    ///     .focals(Vector2::new(800.0, 900.0))
    ///     .principal_point(Point2::new(500.0, 600.0))
    ///     .skew(1.7);
    /// let kp = KeyPoint(Point2::new(471.0, 322.0));
    /// let nkp = intrinsics.normalize(kp);
    /// let distance = (kp.to_homogeneous() - intrinsics.matrix() * nkp.to_homogeneous()).norm();
    /// assert!(distance < 0.1);
    /// ```
    pub fn normalize(&self, point: impl ImagePoint) -> NormalizedKeyPoint {
        let centered = point.image_point() - self.principal_point;
        let y = centered.y / self.focals.y;
        let x = (centered.x - self.skew * y) / self.focals.x;
        NormalizedKeyPoint(self.distortion.undistort(Vector2::new(x, y)).into())
    }

    /// Converts a [`NormalizedKeyPoint`] back into pixel coordinates, applying lens distortion.
    ///
    /// ```
    /// use sfm_core::KeyPoint;
    /// use sfm_pinhole::{CameraIntrinsics, Distortion};
    /// use sfm_core::nalgebra::{Vector2, Point2};
    /// let intrinsics = CameraIntrinsics::identity()
    ///     .focals(Vector2::new(800.0, 900.0))
    ///     .principal_point(Point2::new(500.0, 600.0))
    ///     .distortion(Distortion::new(-0.164624, 0.0, 0.0, 0.0, 0.0));
    /// let kp = KeyPoint(Point2::new(471.0, 322.0));
    /// let ukp = intrinsics.denormalize(intrinsics.normalize(kp));
    /// assert!((kp.0 - ukp.0).norm() < 1e-6);
    /// ```
    pub fn denormalize(&self, projection: NormalizedKeyPoint) -> KeyPoint {
        let distorted = self.distortion.distort(projection.coords);
        let y = distorted.y * self.focals.y;
        let x = distorted.x * self.focals.x + self.skew * distorted.y;
        KeyPoint(Point2::new(x, y) + self.principal_point.coords)
    }

    /// Removes lens distortion while staying in pixel units.
    ///
    /// Epipolar geometry on pixels (the fundamental matrix) only holds for undistorted pixels.
    pub fn undistort(&self, point: impl ImagePoint) -> KeyPoint {
        let NormalizedKeyPoint(normalized) = self.normalize(point);
        KeyPoint((self.matrix() * normalized.to_homogeneous()).xy().into())
    }
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self::identity()
    }
}

impl CameraModel for CameraIntrinsics {
    fn calibrate<P>(&self, point: P) -> UnitVector3<f64>
    where
        P: ImagePoint,
    {
        self.normalize(point).bearing()
    }

    fn uncalibrate(&self, bearing: UnitVector3<f64>) -> Option<KeyPoint> {
        if bearing.z <= 0.0 {
            return None;
        }
        let normalized = bearing.into_inner();
        let projection = NormalizedKeyPoint((normalized.xy() / normalized.z).into());
        Some(self.denormalize(projection))
    }
}
