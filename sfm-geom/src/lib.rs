//! Computational geometry for the structure-from-motion crates.
//!
//! ## Triangulation
//!
//! In this problem we know the pose of every camera and the bearing of the same feature
//! observed in each camera frame. We want to find the point of intersection from all cameras.
//!
//! - `p` the point we are trying to triangulate
//! - `a` the normalized keypoint on camera A
//! - `b` the normalized keypoint on camera B
//! - `O` the optical center of a camera
//! - `@` the virtual image plane
//!
//! ```text
//!                        @
//!                        @
//!               p--------b--------O
//!              /         @
//!             /          @
//!            /           @
//!           /            @
//!   @@@@@@@a@@@@@
//!         /
//!        /
//!       /
//!      O
//! ```
//!
//! Two things make the problem unsolvable: cameras that share an optical center (the rays never
//! separate, so depth is unobservable) and solutions that sit behind any of the cameras. Triangulators
//! in this crate return `None` in both cases.

pub mod triangulation;

pub use triangulation::LinearEigenTriangulator;
