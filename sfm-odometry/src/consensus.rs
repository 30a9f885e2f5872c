use crate::RansacOptions;
use log::*;
use rand::{seq::index, Rng};
use sfm_core::sample_consensus::{Consensus, Estimator, Model};

/// Random sample consensus with a fixed number of iterations.
///
/// Each iteration fits the estimator to a random minimal sample and counts the data within
/// `acceptable_error` of every returned model. The model with the most inliers (the first found
/// on ties) is refit to all of its inliers, and the refit is kept if it explains at least as many.
#[derive(Debug, Clone)]
pub struct Ransac<R> {
    options: RansacOptions,
    rng: R,
}

impl<R> Ransac<R>
where
    R: Rng,
{
    pub fn new(options: RansacOptions, rng: R) -> Self {
        Self { options, rng }
    }

    pub fn options(&self) -> &RansacOptions {
        &self.options
    }

    fn inliers<M, Data>(&self, model: &M, data: &[Data]) -> Vec<usize>
    where
        M: Model<Data>,
    {
        data.iter()
            .enumerate()
            .filter(|(_, datum)| model.residual(datum) <= self.options.acceptable_error)
            .map(|(ix, _)| ix)
            .collect()
    }

    fn best_of<M, Data>(
        &self,
        models: impl IntoIterator<Item = M>,
        data: &[Data],
    ) -> Option<(M, Vec<usize>)>
    where
        M: Model<Data>,
    {
        let mut best: Option<(M, Vec<usize>)> = None;
        for model in models {
            let inliers = self.inliers(&model, data);
            if best
                .as_ref()
                .map_or(true, |(_, best_inliers)| inliers.len() > best_inliers.len())
            {
                best = Some((model, inliers));
            }
        }
        best
    }
}

impl<E, Data, R> Consensus<E, Data> for Ransac<R>
where
    E: Estimator<Data>,
    Data: Clone,
    R: Rng,
{
    type Inliers = Vec<usize>;

    fn model<I>(&mut self, estimator: &E, data: I) -> Option<E::Model>
    where
        I: Iterator<Item = Data> + Clone,
    {
        self.model_inliers(estimator, data).map(|(model, _)| model)
    }

    fn model_inliers<I>(&mut self, estimator: &E, data: I) -> Option<(E::Model, Self::Inliers)>
    where
        I: Iterator<Item = Data> + Clone,
    {
        let data: Vec<Data> = data.collect();
        let sample_size = self.options.num_samples.max(E::MIN_SAMPLES);
        if data.len() < sample_size {
            return None;
        }

        let mut best: Option<(E::Model, Vec<usize>)> = None;
        for _ in 0..self.options.iterations {
            let sample = index::sample(&mut self.rng, data.len(), sample_size).into_vec();
            let models = estimator.estimate(sample.iter().map(|&ix| data[ix].clone()));
            if let Some((model, inliers)) = self.best_of(models, &data) {
                if best
                    .as_ref()
                    .map_or(true, |(_, best_inliers)| inliers.len() > best_inliers.len())
                {
                    best = Some((model, inliers));
                }
            }
        }

        let (model, inliers) = best?;
        debug!(
            "best of {} hypotheses has {} of {} inliers",
            self.options.iterations,
            inliers.len(),
            data.len()
        );
        if inliers.len() < self.options.minimum_num_inliers {
            return None;
        }

        let refit = estimator.estimate(inliers.iter().map(|&ix| data[ix].clone()));
        match self.best_of(refit, &data) {
            Some((refit, refit_inliers)) if refit_inliers.len() >= inliers.len() => {
                Some((refit, refit_inliers))
            }
            _ => Some((model, inliers)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, SeedableRng};

    /// A line `y = slope * x` fit through the origin.
    struct Slope(f64);

    impl Model<(f64, f64)> for Slope {
        fn residual(&self, &(x, y): &(f64, f64)) -> f64 {
            (y - self.0 * x).abs()
        }
    }

    struct SlopeEstimator;

    impl Estimator<(f64, f64)> for SlopeEstimator {
        type Model = Slope;
        type ModelIter = Option<Slope>;
        const MIN_SAMPLES: usize = 1;

        fn estimate<I>(&self, data: I) -> Self::ModelIter
        where
            I: Iterator<Item = (f64, f64)> + Clone,
        {
            let (xy, xx) = data.fold((0.0, 0.0), |(xy, xx), (x, y)| (xy + x * y, xx + x * x));
            (xx > 0.0).then(|| Slope(xy / xx))
        }
    }

    fn options() -> RansacOptions {
        RansacOptions {
            iterations: 20,
            acceptable_error: 0.01,
            minimum_num_inliers: 5,
            num_samples: 1,
        }
    }

    fn data() -> Vec<(f64, f64)> {
        (1..=10)
            .map(|i| (i as f64, 2.0 * i as f64))
            .chain([(1.0, 7.0), (2.0, -3.0), (5.0, 0.0)])
            .collect()
    }

    #[test]
    fn finds_line_among_outliers() {
        let mut ransac = Ransac::new(options(), SmallRng::seed_from_u64(0));
        let (model, inliers) = ransac
            .model_inliers(&SlopeEstimator, data().into_iter())
            .unwrap();
        assert!((model.0 - 2.0).abs() < 1e-12);
        assert_eq!(inliers, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn too_few_inliers() {
        let options = RansacOptions {
            minimum_num_inliers: 11,
            ..options()
        };
        let mut ransac = Ransac::new(options, SmallRng::seed_from_u64(0));
        assert!(ransac.model(&SlopeEstimator, data().into_iter()).is_none());
    }

    #[test]
    fn too_little_data() {
        let options = RansacOptions {
            num_samples: 4,
            ..options()
        };
        let mut ransac = Ransac::new(options, SmallRng::seed_from_u64(0));
        let data = vec![(1.0, 2.0), (2.0, 4.0), (3.0, 6.0)];
        assert!(ransac.model(&SlopeEstimator, data.into_iter()).is_none());
    }
}
