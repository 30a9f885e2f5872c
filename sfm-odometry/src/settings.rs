use crate::DistanceMetric;
use sfm_optimize::BundleAdjustmentOptions;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The settings for the visual odometry process.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoSettings {
    /// How descriptors are compared, and the cutoff beyond which two descriptors never match
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub metric: DistanceMetric,
    /// The matcher used for every 2D-2D and 2D-3D association
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub matcher: MatcherOptions,
    /// The sample consensus used to fit the fundamental matrix while bootstrapping
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_fundamental_ransac")
    )]
    pub fundamental_ransac: RansacOptions,
    /// The sample consensus used to fit the pose of each tracked frame
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_pnp_ransac"))]
    pub pnp_ransac: RansacOptions,
    /// The fraction of bootstrap matches that must triangulate in front of both cameras
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_points_visible_ratio")
    )]
    pub min_points_visible_ratio: f64,
    /// The number of most recent views whose landmarks are tracked and adjusted
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_sliding_window_length")
    )]
    pub sliding_window_length: usize,
    /// Bundle adjust the sliding window after every tracked frame
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_perform_bundle_adjustment")
    )]
    pub perform_bundle_adjustment: bool,
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub bundle_adjustment: BundleAdjustmentOptions,
    /// Attach an [`crate::Annotation`] to every frame report
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub annotate: bool,
}

impl Default for VoSettings {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::default(),
            matcher: MatcherOptions::default(),
            fundamental_ransac: default_fundamental_ransac(),
            pnp_ransac: default_pnp_ransac(),
            min_points_visible_ratio: default_min_points_visible_ratio(),
            sliding_window_length: default_sliding_window_length(),
            perform_bundle_adjustment: default_perform_bundle_adjustment(),
            bundle_adjustment: BundleAdjustmentOptions::default(),
            annotate: false,
        }
    }
}

fn default_fundamental_ransac() -> RansacOptions {
    RansacOptions {
        iterations: 50,
        acceptable_error: 1e-1,
        minimum_num_inliers: 35,
        num_samples: 8,
    }
}

fn default_pnp_ransac() -> RansacOptions {
    RansacOptions {
        iterations: 100,
        acceptable_error: 1.0,
        minimum_num_inliers: 5,
        num_samples: 6,
    }
}

fn default_min_points_visible_ratio() -> f64 {
    0.5
}

fn default_sliding_window_length() -> usize {
    3
}

fn default_perform_bundle_adjustment() -> bool {
    true
}

/// Controls which candidate pairs survive descriptor matching.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatcherOptions {
    /// Only accept a match clearly better than the runner-up
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_use_lowes_ratio")
    )]
    pub use_lowes_ratio: bool,
    /// The best distance must be below `lowes_ratio²` times the second best
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_lowes_ratio"))]
    pub lowes_ratio: f64,
    /// Keep a match only if it is also the best match in the opposite direction
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_require_symmetric_matches")
    )]
    pub require_symmetric_matches: bool,
    /// Fewer surviving matches than this is a failure
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_num_feature_matches")
    )]
    pub min_num_feature_matches: usize,
    /// Truncate the output to the `num_best_matches` closest matches
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_only_keep_best_matches")
    )]
    pub only_keep_best_matches: bool,
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_num_best_matches")
    )]
    pub num_best_matches: usize,
}

impl Default for MatcherOptions {
    fn default() -> Self {
        Self {
            use_lowes_ratio: default_use_lowes_ratio(),
            lowes_ratio: default_lowes_ratio(),
            require_symmetric_matches: default_require_symmetric_matches(),
            min_num_feature_matches: default_min_num_feature_matches(),
            only_keep_best_matches: default_only_keep_best_matches(),
            num_best_matches: default_num_best_matches(),
        }
    }
}

fn default_use_lowes_ratio() -> bool {
    true
}

fn default_lowes_ratio() -> f64 {
    0.85
}

fn default_require_symmetric_matches() -> bool {
    true
}

fn default_min_num_feature_matches() -> usize {
    8
}

fn default_only_keep_best_matches() -> bool {
    true
}

fn default_num_best_matches() -> usize {
    100
}

/// Sample consensus parameters.
///
/// The unit of `acceptable_error` is whatever the fitted model reports as its residual: squared
/// pixels of Sampson distance for a fundamental matrix, pixels of reprojection error for a pose.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RansacOptions {
    pub iterations: usize,
    pub acceptable_error: f64,
    pub minimum_num_inliers: usize,
    /// Raised to the minimum sample of the estimator when smaller
    pub num_samples: usize,
}
