//! # SfM Core
//!
//! Common abstractions and types shared by every crate of the incremental structure-from-motion
//! workspace. This includes keypoints and features, homogeneous camera and world points, poses,
//! correspondences, the camera model trait, and the triangulation traits.
//!
//! The crate is kept small so that the estimators (`eight-point`, `dlt-pnp`), the camera model
//! (`sfm-pinhole`), the geometry (`sfm-geom`), the optimizer (`sfm-optimize`) and the odometry engine
//! (`sfm-odometry`) can all speak the same types. It re-exports [`nalgebra`] and [`sample_consensus`]
//! so that downstream crates pick up exactly the same versions.
//!
//! ## Coordinate frames
//!
//! Camera space for a given camera is defined as:
//!
//! * Origin is the optical center
//! * Positive z axis is forwards
//! * Positive y axis is down
//! * Positive x axis is right
//!
//! A [`WorldToCamera`] pose maps a [`WorldPoint`] into the [`CameraPoint`] of one view. A point is in
//! front of a camera when its camera-space `z` is positive (the cheirality constraint).
//!
//! ## Triangulation
//!
//! [`TriangulatorObservations`] intersects the bearings of one feature seen from any number of
//! posed cameras. [`TriangulatorRelative`] does the same for two cameras related by a
//! [`CameraToCamera`] pose and returns the point in the frame of the first. Noisy bearings never
//! meet exactly, so each triangulator minimizes its own error.

mod camera;
mod keypoint;
mod matches;
mod point;
mod pose;
mod so3;
mod triangulation;

pub use camera::*;
pub use keypoint::*;
pub use matches::*;
pub use nalgebra;
pub use point::*;
pub use pose::*;
pub use sample_consensus;
pub use so3::*;
pub use triangulation::*;
