use crate::CameraIntrinsics;
use sfm_core::nalgebra::{Matrix3x4, Point3, UnitVector3};
use sfm_core::sample_consensus::Model;
use sfm_core::{
    CameraModel, FeatureWorldMatch, ImagePoint, KeyPoint, Pose, Projective, WorldPoint,
    WorldToCamera,
};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A calibrated camera placed in the world: intrinsics plus the [`WorldToCamera`] extrinsics.
///
/// ```
/// use sfm_core::nalgebra::Point3;
/// use sfm_core::WorldToCamera;
/// use sfm_core::Pose;
/// use sfm_pinhole::{Camera, CameraIntrinsics};
/// let camera = Camera::new(
///     CameraIntrinsics::from_vertical_fov(640.0, 480.0, 1.0),
///     WorldToCamera::identity(),
/// );
/// // The principal ray lands on the principal point.
/// let kp = camera.world_to_image(Point3::new(0.0, 0.0, 5.0)).unwrap();
/// assert!((kp.x - 320.0).abs() < 1e-9 && (kp.y - 240.0).abs() < 1e-9);
/// // Points behind the camera are never imaged.
/// assert!(camera.world_to_image(Point3::new(0.0, 0.0, -5.0)).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Camera {
    pub intrinsics: CameraIntrinsics,
    pub pose: WorldToCamera,
}

impl Camera {
    pub fn new(intrinsics: CameraIntrinsics, pose: WorldToCamera) -> Self {
        Self { intrinsics, pose }
    }

    /// Projects a world position onto the image.
    ///
    /// Fails when the point is behind the camera or lands outside the image bounds.
    pub fn world_to_image(&self, point: Point3<f64>) -> Option<KeyPoint> {
        let keypoint = self.project(WorldPoint::from_point(point))?;
        self.intrinsics.contains(keypoint).then(|| keypoint)
    }

    /// Projects a homogeneous world point onto the (unbounded) image plane.
    pub fn project(&self, point: WorldPoint) -> Option<KeyPoint> {
        self.intrinsics.project(self.pose.transform(point))
    }

    /// The bearing of a pixel in this camera's space.
    pub fn image_to_bearing(&self, point: impl ImagePoint) -> UnitVector3<f64> {
        self.intrinsics.calibrate(point)
    }

    /// The world-space ray (origin, direction) that a pixel back-projects to.
    pub fn image_to_world_ray(&self, point: impl ImagePoint) -> (Point3<f64>, UnitVector3<f64>) {
        let camera_to_world = self.pose.inverse();
        let bearing = self.image_to_bearing(point).into_inner();
        let direction = camera_to_world.0.rotation * bearing;
        (
            self.optical_center(),
            UnitVector3::new_normalize(direction),
        )
    }

    /// The pose and camera-space bearing of a pixel, as consumed by triangulators.
    pub fn pose_bearing(&self, point: impl ImagePoint) -> (WorldToCamera, UnitVector3<f64>) {
        (self.pose, self.image_to_bearing(point))
    }

    pub fn is_in_front(&self, point: Point3<f64>) -> bool {
        self.pose.is_in_front(WorldPoint::from_point(point))
    }

    pub fn optical_center(&self) -> Point3<f64> {
        self.pose.optical_center()
    }

    /// The `3x4` projection matrix `K[R|t]`. Lens distortion is not part of it.
    pub fn projection_matrix(&self) -> Matrix3x4<f64> {
        self.intrinsics.matrix() * self.pose.matrix3x4()
    }

    /// Distance in pixels between an observed keypoint and the projection of a world point.
    ///
    /// Returns `None` when the point does not project (behind the camera or at infinity).
    pub fn reprojection_error(&self, keypoint: KeyPoint, point: WorldPoint) -> Option<f64> {
        let projection = self.project(point)?;
        Some((projection.0 - keypoint.0).norm())
    }
}

impl Model<FeatureWorldMatch<KeyPoint>> for Camera {
    fn residual(&self, data: &FeatureWorldMatch<KeyPoint>) -> f64 {
        let &FeatureWorldMatch(keypoint, point) = data;
        self.reprojection_error(keypoint, point)
            .unwrap_or(f64::INFINITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Distortion;
    use approx::assert_relative_eq;
    use sfm_core::nalgebra::{Rotation3, Vector3};

    fn camera() -> Camera {
        Camera::new(
            CameraIntrinsics::from_vertical_fov(1920.0, 1080.0, std::f64::consts::FRAC_PI_2)
                .distortion(Distortion::new(0.01, -0.002, 0.0005, -0.0003, 0.0)),
            WorldToCamera::from_parts(
                Vector3::new(0.3, -0.2, 4.0),
                Rotation3::from_euler_angles(0.05, -0.1, 0.2),
            ),
        )
    }

    #[test]
    fn world_ray_passes_through_point() {
        let camera = camera();
        let point = Point3::new(0.4, 0.7, -0.5);
        let keypoint = camera.world_to_image(point).unwrap();
        let (origin, direction) = camera.image_to_world_ray(keypoint);
        let expected = (point - origin).normalize();
        assert_relative_eq!(direction.into_inner(), expected, epsilon = 1e-8);
    }

    #[test]
    fn projection_matrix_agrees_without_distortion() {
        let mut camera = camera();
        camera.intrinsics.distortion = Distortion::none();
        let point = Point3::new(-0.3, 0.2, 0.9);
        let keypoint = camera.world_to_image(point).unwrap();
        let projected = camera.projection_matrix() * point.to_homogeneous();
        assert_relative_eq!(keypoint.x, projected.x / projected.z, epsilon = 1e-9);
        assert_relative_eq!(keypoint.y, projected.y / projected.z, epsilon = 1e-9);
    }

    #[test]
    fn out_of_bounds_is_not_imaged() {
        let camera = Camera::new(
            CameraIntrinsics::from_vertical_fov(640.0, 480.0, 0.5),
            WorldToCamera::identity(),
        );
        assert!(camera.world_to_image(Point3::new(10.0, 0.0, 1.0)).is_none());
        assert!(camera.project(WorldPoint::from_point(Point3::new(10.0, 0.0, 1.0))).is_some());
    }

    #[test]
    fn residual_is_reprojection_error() {
        let camera = camera();
        let point = WorldPoint::from_point(Point3::new(0.1, 0.1, 0.1));
        let keypoint = camera.project(point).unwrap();
        let shifted = KeyPoint::new(keypoint.x + 3.0, keypoint.y - 4.0);
        assert_relative_eq!(
            camera.residual(&FeatureWorldMatch(shifted, point)),
            5.0,
            epsilon = 1e-9
        );
        assert!(camera.is_in_front(Point3::new(0.1, 0.1, 0.1)));
    }
}
