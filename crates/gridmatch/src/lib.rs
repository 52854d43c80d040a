//! Recover a regular lattice from detected blob centres and turn it into a
//! camera calibration problem.
//!
//! The pipeline, leaf first:
//! - [`spacing`]: median neighbour spacing and tolerance windows per axis,
//! - [`builder`]: propagate integer grid coordinates along both walk orders,
//! - [`store`]: the deduplicated [`GridMatcher`] and its dense lookup grid,
//! - [`sampler`]: cross-shaped sub-image views over the lookup grid,
//! - [`calibrate`]: hand the views to an external [`CalibrationSolver`].
//!
//! [`MatchGridStage`] ties these together against named upstream results and
//! reports every failure as a string instead of returning an error.
//!
//! ```
//! use gridmatch::{match_grid, MatchGridParams};
//!
//! let pts: Vec<[f32; 2]> = (0..3)
//!     .flat_map(|r| (0..3).map(move |c| [10.0 * c as f32, 10.0 * r as f32]))
//!     .collect();
//! let matched = match_grid(&pts, &MatchGridParams::default()).unwrap();
//! assert_eq!(matched.store.len(), 9);
//! ```

pub mod builder;
pub mod calibrate;
mod error;
pub mod io;
mod params;
pub mod sampler;
pub mod spacing;
pub mod stage;
pub mod store;
pub mod undistort;

pub use builder::{CorrespondenceBuilder, WalkStats};
pub use calibrate::{
    CalibrationOrchestrator, CalibrationReport, CalibrationSolver, CalibrationView, SolverError,
    SolverOutput,
};
pub use error::MatchGridError;
pub use io::{ConfigError, IoError, MatchGridConfig, MatchGridReport, MatchedRect, SpacingReport};
pub use params::MatchGridParams;
pub use sampler::{SamplingPolicy, SubImageSampler};
pub use spacing::{AxisEstimates, SpacingAxis, SpacingError, SpacingEstimate, SpacingFailure};
pub use stage::{match_grid, GridMatch, MatchGridStage, SortedPoints};
pub use store::{GridMatcher, GridStoreError, LookupGrid, SubImageSubset, SubImageWindow};
pub use undistort::{
    RemapUndistorter, UndistortConfig, UndistortError, UndistortParams, Undistorter,
};
