//! Core types for grid correspondence matching.
//!
//! This crate is intentionally small and purely geometric: validated image
//! points with their two lexicographic orderings, integer lattice
//! coordinates, pinhole camera parameters and a grayscale image view. It has
//! no knowledge of spacing estimation or calibration.

mod camera;
mod grid;
mod image;
mod logger;
mod point;

pub use camera::{CameraMatrix, CameraModelError, DistortionCoeffs, ImageSize};
pub use grid::{GridOffset, GridPoint};
pub use image::{GrayImage, GrayImageView};
pub use point::{sort_points, validate_points, ImagePoint, PointError, PointOrder, YxKey};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
