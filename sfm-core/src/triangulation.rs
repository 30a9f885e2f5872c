use crate::{CameraPoint, CameraToCamera, Pose, WorldPoint, WorldToCamera};
use nalgebra::UnitVector3;

/// Triangulates a point from two or more observations.
///
/// Each observation is the [`WorldToCamera`] pose of the observing camera and the bearing
/// (in that camera's space) at which the point was seen.
pub trait TriangulatorObservations {
    fn triangulate_observations(
        &self,
        pairs: impl Iterator<Item = (WorldToCamera, UnitVector3<f64>)> + Clone,
    ) -> Option<WorldPoint>;
}

/// Triangulates a point from the relative pose between cameras `A` and `B` and a bearing out of each.
///
/// The point is returned in the space of camera `A`.
pub trait TriangulatorRelative {
    fn triangulate_relative(
        &self,
        relative_pose: CameraToCamera,
        a: UnitVector3<f64>,
        b: UnitVector3<f64>,
    ) -> Option<CameraPoint>;
}

impl<T> TriangulatorRelative for T
where
    T: TriangulatorObservations,
{
    fn triangulate_relative(
        &self,
        relative_pose: CameraToCamera,
        a: UnitVector3<f64>,
        b: UnitVector3<f64>,
    ) -> Option<CameraPoint> {
        use core::iter::once;

        // Camera A is the world, so the second camera's world pose is the relative pose itself.
        self.triangulate_observations(
            once((WorldToCamera::identity(), a)).chain(once((relative_pose.into(), b))),
        )
        .map(|p| CameraPoint(p.0))
    }
}
