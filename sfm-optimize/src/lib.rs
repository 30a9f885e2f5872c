//! Bundle adjustment over a window of views.
//!
//! [`BundleAdjuster`] is a [`levenberg_marquardt::LeastSquaresProblem`] whose parameters are the
//! se(3) poses of the free views and the positions of the landmarks they observe, and whose
//! residuals are the reprojection errors (in pixels) of every observation. The first
//! [`BundleAdjustmentOptions::fixed_views`] poses are held constant to pin down the gauge. A
//! solve that does not lower the cost is reported as [`BundleAdjustError::NoImprovement`] so that
//! callers keep their estimates.

mod bundle_adjuster;

pub use bundle_adjuster::*;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convergence settings for [`BundleAdjuster::adjust`].
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BundleAdjustmentOptions {
    /// Caps the work of the solver. The solver may evaluate the residuals at most
    /// `max_num_iterations * (num_parameters + 1)` times.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_max_num_iterations")
    )]
    pub max_num_iterations: usize,
    /// Relative reduction of the sum of squares below which the solver stops.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_function_tolerance")
    )]
    pub function_tolerance: f64,
    /// Orthogonality between the residuals and the jacobian columns below which the solver stops.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_gradient_tolerance")
    )]
    pub gradient_tolerance: f64,
    /// The number of oldest views in the window whose poses are held constant.
    ///
    /// Two fixed views pin both the rigid frame and the scale of a monocular window. With fewer,
    /// the solution is only determined up to a similarity.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_fixed_views"))]
    pub fixed_views: usize,
}

impl Default for BundleAdjustmentOptions {
    fn default() -> Self {
        Self {
            max_num_iterations: default_max_num_iterations(),
            function_tolerance: default_function_tolerance(),
            gradient_tolerance: default_gradient_tolerance(),
            fixed_views: default_fixed_views(),
        }
    }
}

fn default_max_num_iterations() -> usize {
    50
}

fn default_function_tolerance() -> f64 {
    1e-16
}

fn default_gradient_tolerance() -> f64 {
    1e-16
}

fn default_fixed_views() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BundleAdjustError {
    #[error("bundle adjustment was given no observations or no free parameters")]
    NothingToOptimize,
    #[error("bundle adjustment did not converge: {0}")]
    DidNotConverge(String),
    #[error("bundle adjustment did not reduce the cost below {initial} (final {last})")]
    NoImprovement { initial: f64, last: f64 },
}
