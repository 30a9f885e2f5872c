use crate::{CameraPoint, Projective, Skew3, WorldPoint};
use derive_more::{AsMut, AsRef, From, Into};
use nalgebra::{IsometryMatrix3, Matrix3x4, Point3, Rotation3, Vector3, Vector6};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A rigid transform between two of the coordinate frames used in a reconstruction.
///
/// The frame a pose maps from and to is part of its type: [`WorldToCamera`] is the extrinsic
/// part of a camera, [`CameraToWorld`] its inverse, and [`CameraToCamera`] relates two cameras.
pub trait Pose: From<IsometryMatrix3<f64>> + Clone + Copy {
    type InputPoint: Projective;
    type OutputPoint: Projective;
    type Inverse: Pose;

    fn isometry(self) -> IsometryMatrix3<f64>;

    fn identity() -> Self {
        IsometryMatrix3::identity().into()
    }

    fn inverse(self) -> Self::Inverse {
        self.isometry().inverse().into()
    }

    /// Builds the pose `x -> R x + t`.
    fn from_parts(translation: Vector3<f64>, rotation: Rotation3<f64>) -> Self {
        IsometryMatrix3::from_parts(translation.into(), rotation).into()
    }

    /// The `[R | t]` block, which is the projection matrix of a camera with unit intrinsics.
    fn matrix3x4(self) -> Matrix3x4<f64> {
        self.isometry().to_homogeneous().fixed_slice::<3, 4>(0, 0).into_owned()
    }

    /// Six free parameters: the translation followed by the rotation vector.
    fn se3(self) -> Vector6<f64> {
        let isometry = self.isometry();
        let t = isometry.translation.vector;
        let w = Skew3::from(isometry.rotation).0;
        Vector6::new(t.x, t.y, t.z, w.x, w.y, w.z)
    }

    /// Inverse of [`Pose::se3`].
    fn from_se3(se3: Vector6<f64>) -> Self {
        let rotation = Skew3(se3.fixed_rows::<3>(3).into_owned()).into();
        Self::from_parts(se3.xyz(), rotation)
    }

    fn transform(self, input: Self::InputPoint) -> Self::OutputPoint {
        (self.isometry().to_homogeneous() * input.homogeneous()).into()
    }
}

/// The pose of the world relative to the camera. This maps [`WorldPoint`] into [`CameraPoint`],
/// and is the extrinsic part of a camera.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldToCamera(pub IsometryMatrix3<f64>);

impl WorldToCamera {
    /// The position of the optical center in the world.
    pub fn optical_center(self) -> Point3<f64> {
        self.inverse().0.translation.vector.into()
    }

    /// Checks the cheirality constraint for a world point.
    pub fn is_in_front(self, point: WorldPoint) -> bool {
        self.transform(point)
            .depth()
            .map_or(false, |depth| depth > 0.0)
    }
}

impl Pose for WorldToCamera {
    type InputPoint = WorldPoint;
    type OutputPoint = CameraPoint;
    type Inverse = CameraToWorld;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

/// The pose of the camera relative to the world. This transforms camera points (with depth as `z`)
/// into world coordinates, so its translation is where the camera sits in the world.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraToWorld(pub IsometryMatrix3<f64>);

impl Pose for CameraToWorld {
    type InputPoint = CameraPoint;
    type OutputPoint = WorldPoint;
    type Inverse = WorldToCamera;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

/// A relative pose that transforms the [`CameraPoint`] of camera `A` into the
/// corresponding [`CameraPoint`] of camera `B`.
///
/// When camera `A` is taken as the world origin, this is exactly the [`WorldToCamera`] of camera `B`.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraToCamera(pub IsometryMatrix3<f64>);

impl Pose for CameraToCamera {
    type InputPoint = CameraPoint;
    type OutputPoint = CameraPoint;
    type Inverse = CameraToCamera;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

impl From<CameraToCamera> for WorldToCamera {
    fn from(pose: CameraToCamera) -> Self {
        Self(pose.0)
    }
}
