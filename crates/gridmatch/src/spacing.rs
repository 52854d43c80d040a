//! Robust neighbour spacing along one walk order.
//!
//! Points are walked in a lexicographic order and the signed delta
//! `previous - current` is taken along the walk's measuring axis:
//! - columns: `YX` order (row-major), `x` deltas,
//! - rows: `XY` order (column-major), `y` deltas.
//!
//! The median delta seeds a tolerance window. Adjacent pairs inside the
//! window (level 1) and pairs two apart inside the doubled window (level 2)
//! are averaged; the level-2 displacement, halved, gives the pixel length of
//! one lattice step and, divided by the physical separation, the grid scale.

use gridmatch_core::{ImagePoint, PointOrder};
use log::debug;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Which lattice direction a walk measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpacingAxis {
    /// Column spacing (`x` deltas along the `YX` walk).
    Columns,
    /// Row spacing (`y` deltas along the `XY` walk).
    Rows,
}

impl SpacingAxis {
    /// Walk order used for this axis.
    pub fn order(self) -> PointOrder {
        match self {
            SpacingAxis::Columns => PointOrder::YX,
            SpacingAxis::Rows => PointOrder::XY,
        }
    }

    /// Component of a displacement measured along this axis.
    #[inline]
    pub fn component(self, v: Vector2<f32>) -> f32 {
        match self {
            SpacingAxis::Columns => v.x,
            SpacingAxis::Rows => v.y,
        }
    }

    /// Short diagnostic prefix (`dx` / `dy`).
    pub fn label(self) -> &'static str {
        match self {
            SpacingAxis::Columns => "dx",
            SpacingAxis::Rows => "dy",
        }
    }
}

impl fmt::Display for SpacingAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpacingAxis::Columns => "columns",
            SpacingAxis::Rows => "rows",
        })
    }
}

/// Closed interval of accepted signed deltas.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToleranceWindow {
    pub min: f32,
    pub max: f32,
}

impl ToleranceWindow {
    /// Window `nominal * (1 ± tolerance)` with bounds ordered for either sign
    /// of `nominal`.
    pub fn around(nominal: f32, tolerance: f32) -> Self {
        let (lo, hi) = if nominal < 0.0 {
            (1.0 + tolerance, 1.0 - tolerance)
        } else {
            (1.0 - tolerance, 1.0 + tolerance)
        };
        Self {
            min: nominal * lo,
            max: nominal * hi,
        }
    }

    #[inline]
    pub fn contains(&self, delta: f32) -> bool {
        self.min <= delta && delta <= self.max
    }
}

/// Spacing estimation failure for one axis.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SpacingError {
    #[error("need at least 2 points to estimate {axis} spacing, got {got}")]
    TooFewPoints { axis: SpacingAxis, got: usize },
    #[error("No grid points matched within tolerance (level 1) {}Count1:0", .axis.label())]
    NoLevel1Pairs { axis: SpacingAxis },
    #[error("No grid points matched within tolerance (level 2) {}Count2:0", .axis.label())]
    NoLevel2Pairs { axis: SpacingAxis },
    #[error("degenerate {axis} grid scale {scale}")]
    DegenerateScale { axis: SpacingAxis, scale: f32 },
}

/// One or both axes failed; displays as the `"; "`-joined messages.
#[derive(Debug, Clone, PartialEq)]
pub struct SpacingFailure {
    pub errors: Vec<SpacingError>,
}

impl fmt::Display for SpacingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SpacingFailure {}

impl From<SpacingError> for SpacingFailure {
    fn from(err: SpacingError) -> Self {
        Self { errors: vec![err] }
    }
}

/// Spacing statistics for one axis.
#[derive(Clone, Debug, PartialEq)]
pub struct SpacingEstimate {
    pub axis: SpacingAxis,
    /// Median signed one-step delta (`previous - current`).
    pub median: f32,
    pub level1: ToleranceWindow,
    pub level2: ToleranceWindow,
    pub count1: usize,
    pub count2: usize,
    /// Sum of accepted one-step displacements (`previous - current`).
    pub total1: Vector2<f32>,
    /// Sum of accepted two-step displacements.
    pub total2: Vector2<f32>,
    /// Physical separation the scale is normalized against.
    pub separation: f32,
}

impl SpacingEstimate {
    /// Mean accepted one-step displacement.
    pub fn avg1(&self) -> Option<Vector2<f32>> {
        (self.count1 > 0).then(|| self.total1 / self.count1 as f32)
    }

    /// Mean accepted two-step displacement, halved to one step.
    pub fn avg2(&self) -> Option<Vector2<f32>> {
        (self.count2 > 0).then(|| self.total2 / self.count2 as f32 / 2.0)
    }

    /// Pixels per physical unit along this axis.
    pub fn grid_scale(&self) -> Result<f32, SpacingError> {
        if self.count1 == 0 {
            return Err(SpacingError::NoLevel1Pairs { axis: self.axis });
        }
        let Some(avg2) = self.avg2() else {
            return Err(SpacingError::NoLevel2Pairs { axis: self.axis });
        };
        let scale = avg2.norm() / self.separation;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(SpacingError::DegenerateScale {
                axis: self.axis,
                scale,
            });
        }
        Ok(scale)
    }

    /// Classify a signed one-step delta.
    #[inline]
    pub fn accepts_step(&self, delta: f32) -> bool {
        self.level1.contains(delta)
    }
}

/// Column and row estimates for one point set.
#[derive(Clone, Debug, PartialEq)]
pub struct AxisEstimates {
    pub columns: SpacingEstimate,
    pub rows: SpacingEstimate,
}

impl AxisEstimates {
    /// Pixel length of one grid cell along `x` and `y`.
    ///
    /// Failures of both axes are collected, columns first.
    pub fn grid_unit(&self) -> Result<Vector2<f32>, SpacingFailure> {
        match (self.columns.grid_scale(), self.rows.grid_scale()) {
            (Ok(gx), Ok(gy)) => Ok(Vector2::new(
                gx * self.columns.separation,
                gy * self.rows.separation,
            )),
            (x, y) => Err(SpacingFailure {
                errors: [x.err(), y.err()].into_iter().flatten().collect(),
            }),
        }
    }
}

/// Median of the signed one-step deltas (upper median for even counts).
pub fn median_step(sorted: &[ImagePoint], axis: SpacingAxis) -> Option<f32> {
    let mut deltas: Vec<f32> = sorted
        .windows(2)
        .map(|w| axis.component(w[0].delta(&w[1])))
        .collect();
    if deltas.is_empty() {
        return None;
    }
    deltas.sort_by(|a, b| a.total_cmp(b));
    Some(deltas[deltas.len() / 2])
}

/// Estimate spacing statistics for points already sorted by `axis.order()`.
///
/// Only fails when there are fewer than two points; level-1/level-2 failures
/// are reported by [`SpacingEstimate::grid_scale`] so that partial
/// diagnostics stay available.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(sorted), fields(n = sorted.len()))
)]
pub fn estimate_spacing(
    sorted: &[ImagePoint],
    axis: SpacingAxis,
    tolerance: f32,
    separation: f32,
) -> Result<SpacingEstimate, SpacingError> {
    let Some(median) = median_step(sorted, axis) else {
        return Err(SpacingError::TooFewPoints {
            axis,
            got: sorted.len(),
        });
    };
    let level1 = ToleranceWindow::around(median, tolerance);
    let level2 = ToleranceWindow::around(2.0 * median, tolerance);

    let mut est = SpacingEstimate {
        axis,
        median,
        level1,
        level2,
        count1: 0,
        count2: 0,
        total1: Vector2::zeros(),
        total2: Vector2::zeros(),
        separation,
    };

    for (n, cur) in sorted.iter().enumerate().skip(1) {
        let d1 = sorted[n - 1].delta(cur);
        if level1.contains(axis.component(d1)) {
            est.total1 += d1;
            est.count1 += 1;
        }
        if n > 1 {
            let d2 = sorted[n - 2].delta(cur);
            if level2.contains(axis.component(d2)) {
                est.total2 += d2;
                est.count2 += 1;
            }
        }
    }

    debug!(
        "{axis} spacing: median {median:.3} window [{:.3}, {:.3}] count1 {} count2 {}",
        level1.min, level1.max, est.count1, est.count2
    );
    Ok(est)
}
