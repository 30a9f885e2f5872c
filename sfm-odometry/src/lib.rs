//! Incremental monocular visual odometry.
//!
//! [`VisualOdometry`] consumes one [`Frame`] of detected features and descriptors at a time:
//!
//! 1. The first frame is kept as a baseline.
//! 2. The second frame is matched against it, the relative pose is recovered from the essential
//!    matrix, and the matches are triangulated into the first landmarks. The world frame is the
//!    first camera and the distance between the first two cameras is one.
//! 3. Every later frame is matched against the landmarks of the sliding window, localized with
//!    RANSAC PnP, and its inlier observations are incorporated into their landmarks with
//!    retriangulation. Features that the two newest views agree on become new landmarks, and
//!    the window is bundle adjusted if enabled.
//!
//! All state lives in the session's [`Map`], an arena of views, observations and landmarks
//! addressed by index handles.

mod consensus;
mod error;
mod map;
mod matcher;
mod metric;
mod odometry;
mod pnp;
mod settings;
mod two_view;

pub use consensus::*;
pub use error::*;
pub use map::*;
pub use matcher::*;
pub use metric::*;
pub use odometry::*;
pub use pnp::*;
pub use settings::*;
pub use two_view::*;

pub use sfm_optimize::BundleAdjustmentOptions;
