//! Descriptor matching.
//!
//! [`match_descriptors`] is the single matching routine. [`match_features`] and
//! [`match_landmarks`] adapt its indices back to features of two frames and to landmarks.

use crate::{Descriptor, DistanceMetric, LandmarkHandle, MatchError, MatcherOptions};
use float_ord::FloatOrd;
use log::*;

/// A match between index `a` of the first descriptor set and index `b` of the second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorMatch {
    pub a: usize,
    pub b: usize,
    pub distance: f64,
}

/// A match between a feature of a frame and a landmark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkMatch {
    pub feature: usize,
    pub landmark: LandmarkHandle,
    pub distance: f64,
}

/// For every descriptor of `from`, the closest and second closest descriptors of `to` within the
/// cutoff. The second is `None` if there was only one candidate.
fn nearest_two(
    metric: &DistanceMetric,
    from: &Descriptor,
    to: &[&Descriptor],
) -> Option<((usize, f64), Option<f64>)> {
    let mut best: Option<(usize, f64)> = None;
    let mut second: Option<f64> = None;
    for (ix, candidate) in to.iter().enumerate() {
        let distance = metric.distance(from, candidate);
        if !metric.accepts(distance) {
            continue;
        }
        match best {
            Some((_, best_distance)) if distance >= best_distance => {
                if second.map_or(true, |second| distance < second) {
                    second = Some(distance);
                }
            }
            _ => {
                second = best.map(|(_, best_distance)| best_distance);
                best = Some((ix, distance));
            }
        }
    }
    best.map(|best| (best, second))
}

/// The accepted one-way match of every descriptor in `from`.
fn one_way(
    metric: &DistanceMetric,
    options: &MatcherOptions,
    from: &[&Descriptor],
    to: &[&Descriptor],
) -> Vec<Option<(usize, f64)>> {
    let ratio_squared = options.lowes_ratio * options.lowes_ratio;
    from.iter()
        .map(|descriptor| {
            let (best, second) = nearest_two(metric, descriptor, to)?;
            let second = second.unwrap_or(f64::INFINITY);
            if options.use_lowes_ratio && best.1 >= ratio_squared * second {
                None
            } else {
                Some(best)
            }
        })
        .collect()
}

/// Matches every descriptor of `a` against the descriptors of `b`.
///
/// Candidates beyond the metric's cutoff are discarded before ranking. With the ratio test the
/// best candidate is kept only if its distance is below `lowes_ratio²` times the second best.
/// With symmetric matching a pair survives only if each side is the other's best. Fewer than
/// `min_num_feature_matches` survivors is an error. The result is ordered by index in `a`, or by
/// distance when only the best matches are kept.
pub fn match_descriptors(
    metric: &DistanceMetric,
    options: &MatcherOptions,
    a: &[&Descriptor],
    b: &[&Descriptor],
) -> Result<Vec<DescriptorMatch>, MatchError> {
    let forward = one_way(metric, options, a, b);
    let backward = options
        .require_symmetric_matches
        .then(|| one_way(metric, options, b, a));
    let mut matches: Vec<DescriptorMatch> = forward
        .into_iter()
        .enumerate()
        .filter_map(|(a_ix, found)| {
            let (b_ix, distance) = found?;
            if let Some(backward) = &backward {
                if backward[b_ix].map(|(ix, _)| ix) != Some(a_ix) {
                    return None;
                }
            }
            Some(DescriptorMatch {
                a: a_ix,
                b: b_ix,
                distance,
            })
        })
        .collect();
    trace!(
        "{} of {} descriptors matched against {}",
        matches.len(),
        a.len(),
        b.len()
    );

    if matches.len() < options.min_num_feature_matches {
        return Err(MatchError::InsufficientMatches {
            found: matches.len(),
            required: options.min_num_feature_matches,
        });
    }

    if options.only_keep_best_matches {
        // Stable, so equal distances stay in index order.
        matches.sort_by_key(|m| FloatOrd(m.distance));
        matches.truncate(options.num_best_matches);
    }
    Ok(matches)
}

/// Matches the features of two frames by their descriptors.
pub fn match_features(
    metric: &DistanceMetric,
    options: &MatcherOptions,
    a: &[Descriptor],
    b: &[Descriptor],
) -> Result<Vec<DescriptorMatch>, MatchError> {
    let a: Vec<&Descriptor> = a.iter().collect();
    let b: Vec<&Descriptor> = b.iter().collect();
    match_descriptors(metric, options, &a, &b)
}

/// Matches the features of a frame to landmarks by their representative descriptors.
pub fn match_landmarks(
    metric: &DistanceMetric,
    options: &MatcherOptions,
    features: &[Descriptor],
    landmarks: &[(LandmarkHandle, &Descriptor)],
) -> Result<Vec<LandmarkMatch>, MatchError> {
    let features: Vec<&Descriptor> = features.iter().collect();
    let candidates: Vec<&Descriptor> = landmarks.iter().map(|&(_, d)| d).collect();
    Ok(match_descriptors(metric, options, &features, &candidates)?
        .into_iter()
        .map(|m| LandmarkMatch {
            feature: m.a,
            landmark: landmarks[m.b].0,
            distance: m.distance,
        })
        .collect())
}
