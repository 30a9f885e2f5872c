use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Point3, Unit, Vector3, Vector4};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A 3d point stored as a homogeneous 4-vector so that points at infinity are representable.
pub trait Projective: From<Vector4<f64>> + Clone + Copy {
    /// The raw 4-vector. It is neither normalized nor guaranteed to have a positive `w`.
    fn homogeneous(self) -> Vector4<f64>;

    /// Divides through by `w`, which is `None` at infinity.
    fn point(self) -> Option<Point3<f64>> {
        Point3::from_homogeneous(self.homogeneous())
    }

    fn from_point(point: Point3<f64>) -> Self {
        point.to_homogeneous().into()
    }

    /// Unit direction from the origin of the frame towards the point.
    fn bearing(self) -> Unit<Vector3<f64>> {
        Unit::new_normalize(self.bearing_unnormalized())
    }

    /// Same direction as [`Projective::bearing`] without the normalization. A negative `w`
    /// flips the sign so the direction still points at the point.
    fn bearing_unnormalized(self) -> Vector3<f64> {
        let h = self.homogeneous();
        if h.w.is_sign_negative() {
            -h.xyz()
        } else {
            h.xyz()
        }
    }
}

/// A point in the frame of a camera: `x` right, `y` down and `z` along the optical axis.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraPoint(pub Vector4<f64>);

impl CameraPoint {
    /// The depth of the point along the optical axis, or `None` for a point at infinity.
    pub fn depth(self) -> Option<f64> {
        self.point().map(|p| p.z)
    }
}

impl Projective for CameraPoint {
    fn homogeneous(self) -> Vector4<f64> {
        self.into()
    }
}

/// A point in "world" coordinates.
///
/// For monocular reconstruction the unit of distance is unknown: the whole world can be scaled by
/// any factor without changing a single image coordinate. The scale of a reconstruction is fixed by
/// the baseline chosen when two views are first related, and every later point and pose shares it.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldPoint(pub Vector4<f64>);

impl Projective for WorldPoint {
    fn homogeneous(self) -> Vector4<f64> {
        self.into()
    }
}
