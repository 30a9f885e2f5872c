use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Matrix3, Rotation3, Unit, Vector3};
use num_traits::Float;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A member of the lie algebra so(3): a rotation vector whose direction is the axis and whose
/// norm is the angle in radians.
///
/// This gives three unconstrained parameters for a rotation, which is what the optimizer wants.
/// Everywhere else rotations are kept as [`Rotation3`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Skew3(pub Vector3<f64>);

impl Skew3 {
    pub fn rotation(self) -> Rotation3<f64> {
        self.into()
    }

    /// The cross product matrix `[w]x`.
    pub fn hat(self) -> Matrix3<f64> {
        self.0.cross_matrix()
    }
}

/// Exponential map. Below machine epsilon the first order `I + [w]x` is used.
impl From<Skew3> for Rotation3<f64> {
    fn from(w: Skew3) -> Self {
        let theta2 = w.0.norm_squared();
        if theta2 <= f64::epsilon() {
            Rotation3::from_matrix(&(Matrix3::identity() + w.hat()))
        } else {
            let theta = theta2.sqrt();
            let axis = Unit::new_unchecked(w.0 / theta);
            Self::from_axis_angle(&axis, theta)
        }
    }
}

/// Log map. A rotation whose axis is undefined maps to zero.
impl From<Rotation3<f64>> for Skew3 {
    fn from(r: Rotation3<f64>) -> Self {
        let skew3 = r.scaled_axis();
        if skew3.iter().any(|n| n.is_nan()) {
            Self(Vector3::zeros())
        } else {
            Self(skew3)
        }
    }
}
