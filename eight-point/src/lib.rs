//! The normalized eight-point algorithm for the fundamental matrix of two uncalibrated images.
//!
//! Matches are pixel coordinates with lens distortion already removed. Before solving, the points
//! of each image are translated to their centroid and scaled so their mean distance from it is
//! `√2`, which keeps the linear system well conditioned for pixel-sized coordinates.

use sfm_core::{
    nalgebra::{DMatrix, Matrix3, Point2, Vector2, SVD},
    sample_consensus::Estimator,
    FeatureMatch, KeyPoint,
};
use sfm_pinhole::FundamentalMatrix;

const MIN_MATCHES: usize = 8;

/// Similarity transform that moves the points to their centroid and scales them to a mean
/// distance of `√2`.
fn normalization(points: impl Iterator<Item = Point2<f64>> + Clone) -> Option<Matrix3<f64>> {
    let count = points.clone().count() as f64;
    let centroid = points.clone().map(|p| p.coords).sum::<Vector2<f64>>() / count;
    let mean_distance = points.map(|p| (p.coords - centroid).norm()).sum::<f64>() / count;
    if mean_distance <= 0.0 || !mean_distance.is_finite() {
        return None;
    }
    let scale = std::f64::consts::SQRT_2 / mean_distance;
    #[rustfmt::skip]
    let transform = Matrix3::new(
        scale, 0.0,   -scale * centroid.x,
        0.0,   scale, -scale * centroid.y,
        0.0,   0.0,   1.0,
    );
    Some(transform)
}

/// Stacks one row of the epipolar constraint `x'ᵗ F x = 0` per match, with `F` flattened in
/// row-major order. Rows of zeros pad the system to at least nine rows so the SVD returns the
/// full right singular basis.
fn design_matrix(
    matches: impl Iterator<Item = FeatureMatch<KeyPoint>> + Clone,
    first: &Matrix3<f64>,
    second: &Matrix3<f64>,
) -> DMatrix<f64> {
    let rows = matches.clone().count().max(9);
    let mut out = DMatrix::zeros(rows, 9);
    for (ix, FeatureMatch(a, b)) in matches.enumerate() {
        let a = first * a.to_homogeneous();
        let b = second * b.to_homogeneous();
        for i in 0..3 {
            out.fixed_slice_mut::<1, 3>(ix, 3 * i)
                .copy_from(&(b[i] * a).transpose());
        }
    }
    out
}

/// Performs the
/// [eight-point algorithm](https://en.wikipedia.org/wiki/Eight-point_algorithm)
/// by Richard Hartley and Andrew Zisserman, with Hartley's normalization.
///
/// The result is forced to rank 2 and scaled to unit Frobenius norm.
#[derive(Copy, Clone, Debug)]
pub struct EightPoint {
    pub epsilon: f64,
    pub iterations: usize,
}

impl EightPoint {
    pub fn new() -> Self {
        Default::default()
    }

    /// Estimates the fundamental matrix from eight or more matches.
    ///
    /// Returns `None` with fewer than eight matches, when either image has all of its points in
    /// one spot, or when a decomposition does not converge.
    pub fn from_matches<I>(&self, data: I) -> Option<FundamentalMatrix>
    where
        I: Iterator<Item = FeatureMatch<KeyPoint>> + Clone,
    {
        if data.clone().count() < MIN_MATCHES {
            return None;
        }
        let first = normalization(data.clone().map(|FeatureMatch(a, _)| a.0))?;
        let second = normalization(data.clone().map(|FeatureMatch(_, b)| b.0))?;

        let design = design_matrix(data, &first, &second);
        let svd = SVD::try_new(design, false, true, self.epsilon, self.iterations)?;
        let v_t = svd.v_t?;
        let null_vector = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| float_ord::FloatOrd(n))
            .map(|(ix, _)| v_t.row(ix).transpose())?;
        let normalized = Matrix3::from_row_slice(null_vector.as_slice());

        // Enforce the rank 2 constraint. Singular values are sorted in descending order.
        let mut svd = SVD::try_new(normalized, true, true, self.epsilon, self.iterations)?;
        svd.singular_values[2] = 0.0;
        let normalized = svd.recompose().ok()?;

        Some(FundamentalMatrix(second.transpose() * normalized * first).normalize())
    }
}

impl Default for EightPoint {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
        }
    }
}

impl Estimator<FeatureMatch<KeyPoint>> for EightPoint {
    type Model = FundamentalMatrix;
    type ModelIter = Option<FundamentalMatrix>;
    const MIN_SAMPLES: usize = MIN_MATCHES;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureMatch<KeyPoint>> + Clone,
    {
        self.from_matches(data)
    }
}
