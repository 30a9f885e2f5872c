use bitarray::{BitArray, Hamming};
use space::Metric;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Size in bytes of a [`Descriptor::Binary`], enough for the 486 bits of an AKAZE descriptor.
pub const BINARY_DESCRIPTOR_BYTES: usize = 64;

/// A feature descriptor.
///
/// Binary descriptors (ORB, BRIEF, AKAZE) are compared by Hamming distance and real-valued
/// descriptors (SIFT, learned) by the squared L2 distance of their unit-normalized vectors.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Binary(BitArray<BINARY_DESCRIPTOR_BYTES>),
    Real(Vec<f64>),
}

impl Descriptor {
    /// A binary descriptor from its leading bytes. The rest are zero, which leaves Hamming
    /// distances between equally short descriptors unchanged.
    ///
    /// Panics with more than [`BINARY_DESCRIPTOR_BYTES`] bytes.
    pub fn binary(bytes: &[u8]) -> Self {
        let mut array = BitArray::zeros();
        array.bytes_mut()[..bytes.len()].copy_from_slice(bytes);
        Self::Binary(array)
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Binary(bytes) => bytes.bytes().len(),
            Self::Real(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Number of differing bits between two [`Descriptor::Binary`].
    Hamming,
    /// Squared euclidean distance between two unit-length [`Descriptor::Real`], in `[0, 4]`.
    ScaledL2,
}

/// Compares descriptors and decides which distances are close enough to ever match.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceMetric {
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_kind"))]
    pub kind: MetricKind,
    /// Distances strictly above this never match. Infinite disables the cutoff.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_distance"))]
    pub max_distance: f64,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            max_distance: default_max_distance(),
        }
    }
}

fn default_kind() -> MetricKind {
    MetricKind::Hamming
}

fn default_max_distance() -> f64 {
    f64::INFINITY
}

impl DistanceMetric {
    pub fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            max_distance: f64::INFINITY,
        }
    }

    #[must_use]
    pub fn max_distance(self, max_distance: f64) -> Self {
        Self {
            max_distance,
            ..self
        }
    }

    /// Whether a finite cutoff is configured.
    pub fn has_cutoff(&self) -> bool {
        self.max_distance.is_finite()
    }

    /// Whether `distance` is within the cutoff.
    pub fn accepts(&self, distance: f64) -> bool {
        distance <= self.max_distance
    }

    /// Whether descriptors must be normalized before [`DistanceMetric::distance`] is meaningful.
    pub fn requires_normalization(&self) -> bool {
        self.kind == MetricKind::ScaledL2
    }

    /// Rescales real descriptors to unit length for [`MetricKind::ScaledL2`].
    ///
    /// Binary descriptors and zero vectors are left alone, so normalizing twice changes nothing.
    pub fn normalize(&self, descriptors: &mut [Descriptor]) {
        if !self.requires_normalization() {
            return;
        }
        for descriptor in descriptors {
            if let Descriptor::Real(values) = descriptor {
                let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
                if norm > 0.0 {
                    values.iter_mut().for_each(|v| *v /= norm);
                }
            }
        }
    }

    /// The distance between two descriptors, lower is closer.
    ///
    /// Panics if either descriptor is not the variant this metric compares or if their lengths
    /// differ.
    pub fn distance(&self, a: &Descriptor, b: &Descriptor) -> f64 {
        assert_eq!(a.len(), b.len(), "descriptors have different lengths");
        match (self.kind, a, b) {
            (MetricKind::Hamming, Descriptor::Binary(a), Descriptor::Binary(b)) => {
                Hamming.distance(a, b) as f64
            }
            (MetricKind::ScaledL2, Descriptor::Real(a), Descriptor::Real(b)) => a
                .iter()
                .zip(b)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>(),
            (kind, _, _) => panic!("{:?} metric cannot compare these descriptors", kind),
        }
    }

    /// [`DistanceMetric::distance`] of the normalized descriptors, leaving the inputs untouched.
    pub fn normalized_distance(&self, a: &Descriptor, b: &Descriptor) -> f64 {
        if !self.requires_normalization() {
            return self.distance(a, b);
        }
        let mut pair = [a.clone(), b.clone()];
        self.normalize(&mut pair);
        self.distance(&pair[0], &pair[1])
    }
}
