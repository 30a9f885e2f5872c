use crate::{PoseError, Ransac, RansacOptions};
use dlt_pnp::DltPnp;
use log::*;
use rand::Rng;
use sfm_core::{sample_consensus::Consensus, FeatureWorldMatch, KeyPoint};
use sfm_pinhole::{Camera, CameraIntrinsics};

const MIN_CORRESPONDENCES: usize = 6;

/// A camera localized against known landmarks.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSolution {
    pub camera: Camera,
    /// Indices of the correspondences that reproject within the acceptable error.
    pub inliers: Vec<usize>,
}

/// Estimates the camera of a frame from pixel to world point correspondences with RANSAC over
/// the direct linear transform.
pub fn estimate_pose<R>(
    correspondences: &[FeatureWorldMatch<KeyPoint>],
    intrinsics: &CameraIntrinsics,
    options: &RansacOptions,
    rng: &mut R,
) -> Result<PoseSolution, PoseError>
where
    R: Rng,
{
    let required = options.num_samples.max(MIN_CORRESPONDENCES);
    if correspondences.len() < required {
        return Err(PoseError::InsufficientCorrespondences {
            found: correspondences.len(),
            required,
        });
    }

    let (camera, inliers) = Ransac::new(*options, rng)
        .model_inliers(&DltPnp::new(*intrinsics), correspondences.iter().copied())
        .ok_or(PoseError::InsufficientInliers {
            required: options.minimum_num_inliers,
        })?;
    info!(
        "pose has {} inliers out of {} correspondences",
        inliers.len(),
        correspondences.len()
    );
    Ok(PoseSolution { camera, inliers })
}
