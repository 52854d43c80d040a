use gridmatch_core::PointError;

use crate::io::ConfigError;
use crate::spacing::SpacingFailure;
use crate::store::GridStoreError;

/// Errors produced by the grid matching pipeline.
#[derive(thiserror::Error, Debug)]
pub enum MatchGridError {
    #[error("Expected array of at least 2 rects to match")]
    TooFewPoints { got: usize },

    #[error("image size is required for calibration")]
    MissingImageSize,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Point(#[from] PointError),

    #[error(transparent)]
    Spacing(#[from] SpacingFailure),

    #[error(transparent)]
    GridStore(#[from] GridStoreError),
}
