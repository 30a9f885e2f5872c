use crate::WorldPoint;

/// A correspondence between a point in image A and a point in image B.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct FeatureMatch<P>(pub P, pub P);

/// A correspondence between an image point and a known world point.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct FeatureWorldMatch<P>(pub P, pub WorldPoint);
