use crate::{CameraPoint, ImagePoint, KeyPoint, Projective};
use nalgebra::UnitVector3;

/// A camera model converts between pixels and bearings out of the optical center.
///
/// Bearings use camera space: X right, Y down, Z forwards. Pixels use the image frame with X right
/// and Y down.
pub trait CameraModel {
    /// Back-projects a pixel into the bearing of the ray that produced it.
    fn calibrate<P>(&self, point: P) -> UnitVector3<f64>
    where
        P: ImagePoint;

    /// Projects a bearing onto the image.
    ///
    /// Returns `None` when the bearing cannot be imaged (for a pinhole, when it points behind the camera).
    fn uncalibrate(&self, bearing: UnitVector3<f64>) -> Option<KeyPoint>;

    /// Projects a point given in this camera's space onto the image.
    ///
    /// Points with non-positive depth are rejected.
    fn project(&self, point: CameraPoint) -> Option<KeyPoint> {
        if point.depth()? <= 0.0 {
            return None;
        }
        self.uncalibrate(point.bearing())
    }
}
