//! The `matchGrid` stage: raw points to grid correspondences, published rects
//! and an optional calibration.

use gridmatch_core::{sort_points, validate_points, ImagePoint, ImageSize, PointOrder};
use log::{info, warn};
use nalgebra::Vector2;
use serde_json::Value;
use std::sync::Arc;

use crate::builder::{CorrespondenceBuilder, WalkStats};
use crate::calibrate::{CalibrationOrchestrator, CalibrationSolver};
use crate::error::MatchGridError;
use crate::io::{extract_rects, MatchGridConfig, MatchGridReport, MatchedRect, SpacingReport};
use crate::params::MatchGridParams;
use crate::sampler::SubImageSampler;
use crate::spacing::{estimate_spacing, AxisEstimates, SpacingAxis, SpacingFailure};
use crate::store::{GridMatcher, GridStoreError, SubImageSubset};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Input points in both walk orders.
#[derive(Clone, Debug, PartialEq)]
pub struct SortedPoints {
    /// Row-major, walked for column spacing.
    pub yx: Vec<ImagePoint>,
    /// Column-major, walked for row spacing.
    pub xy: Vec<ImagePoint>,
}

impl SortedPoints {
    pub fn new(points: &[ImagePoint]) -> Self {
        Self {
            yx: sort_points(points, PointOrder::YX),
            xy: sort_points(points, PointOrder::XY),
        }
    }

    pub fn along(&self, axis: SpacingAxis) -> &[ImagePoint] {
        match axis {
            SpacingAxis::Columns => &self.yx,
            SpacingAxis::Rows => &self.xy,
        }
    }
}

/// Spacing statistics for both axes. Fails only with fewer than two points.
pub fn estimate_axes(
    sorted: &SortedPoints,
    params: &MatchGridParams,
) -> Result<AxisEstimates, SpacingFailure> {
    let columns = estimate_spacing(
        sorted.along(SpacingAxis::Columns),
        SpacingAxis::Columns,
        params.tolerance,
        params.sep_x,
    )?;
    let rows = estimate_spacing(
        sorted.along(SpacingAxis::Rows),
        SpacingAxis::Rows,
        params.tolerance,
        params.sep_y,
    )?;
    Ok(AxisEstimates { columns, rows })
}

/// Walk the column order, then the row order, into one store.
pub fn build_correspondences(
    sorted: &SortedPoints,
    estimates: &AxisEstimates,
    unit: Vector2<f32>,
) -> (GridMatcher, WalkStats) {
    let mut store = GridMatcher::new();
    let mut builder = CorrespondenceBuilder::new(&mut store, unit);
    let columns = builder.walk(
        sorted.along(SpacingAxis::Columns),
        SpacingAxis::Columns,
        &estimates.columns.level1,
    );
    let rows = builder.walk(
        sorted.along(SpacingAxis::Rows),
        SpacingAxis::Rows,
        &estimates.rows.level1,
    );
    let stats = columns.merge(rows);
    if stats.conflicts > 0 {
        warn!(
            "{} points got a different grid coordinate from the row walk; kept the column walk's",
            stats.conflicts
        );
    }
    (store, stats)
}

/// Outcome of matching one point set.
#[derive(Clone, Debug)]
pub struct GridMatch {
    pub estimates: AxisEstimates,
    /// Pixel length of one grid cell along `x` and `y`.
    pub unit: Vector2<f32>,
    pub store: GridMatcher,
    pub stats: WalkStats,
}

impl GridMatch {
    /// Stored correspondences with physical coordinates centred on the grid
    /// centroid.
    pub fn rects(&self, params: &MatchGridParams) -> Result<Vec<MatchedRect>, GridStoreError> {
        let centroid = self.store.grid_centroid()?;
        Ok(self
            .store
            .correspondences()
            .map(|(p, g)| MatchedRect {
                x: p.x(),
                y: p.y(),
                obj_x: params.sep_x * (g.col as f64 - centroid.x) as f32,
                obj_y: params.sep_y * (g.row as f64 - centroid.y) as f32,
                obj_z: params.obj_z,
            })
            .collect())
    }
}

/// Match raw `(x, y)` points to integer grid coordinates.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(raw, params), fields(n = raw.len()))
)]
pub fn match_grid(raw: &[[f32; 2]], params: &MatchGridParams) -> Result<GridMatch, MatchGridError> {
    if raw.len() < 2 {
        return Err(MatchGridError::TooFewPoints { got: raw.len() });
    }
    let points = validate_points(raw)?;
    let sorted = SortedPoints::new(&points);
    let estimates = estimate_axes(&sorted, params)?;
    let unit = estimates.grid_unit()?;
    let (store, stats) = build_correspondences(&sorted, &estimates, unit);
    info!(
        "matched {} of {} points, grid unit ({:.3}, {:.3}) px",
        store.len(),
        points.len(),
        unit.x,
        unit.y
    );
    Ok(GridMatch {
        estimates,
        unit,
        store,
        stats,
    })
}

/// Configured `matchGrid` stage with an optional calibration solver.
#[derive(Clone)]
pub struct MatchGridStage {
    config: MatchGridConfig,
    orchestrator: Option<CalibrationOrchestrator>,
}

impl MatchGridStage {
    pub fn new(config: MatchGridConfig) -> Self {
        Self {
            config,
            orchestrator: None,
        }
    }

    /// Calibrate with `solver` after matching, using the configured sampling
    /// policy and timeout.
    pub fn with_solver(mut self, solver: Arc<dyn CalibrationSolver>) -> Self {
        self.orchestrator = Some(
            CalibrationOrchestrator::new(solver)
                .with_policy(self.config.sampling.clone())
                .with_timeout(self.config.solver_timeout()),
        );
        self
    }

    pub fn config(&self) -> &MatchGridConfig {
        &self.config
    }

    /// Run against named upstream results. Never fails: every problem is
    /// appended to the report's `errors`.
    ///
    /// `size` overrides the configured image size.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, models), fields(model = %self.config.model))
    )]
    pub fn run(&self, models: &Value, size: Option<ImageSize>) -> MatchGridReport {
        let mut report = MatchGridReport::default();
        if let Err(err) = self.run_into(models, size, &mut report) {
            warn!("matchGrid({}) failed: {err}", self.config.model);
            report.push_error(err);
        }
        report
    }

    /// Match and sample views without calling a solver.
    pub fn sample_views(
        &self,
        models: &Value,
        size: Option<ImageSize>,
    ) -> Result<Vec<SubImageSubset>, MatchGridError> {
        let params = &self.config.params;
        let raw = extract_rects(models, &self.config.model)?;
        let matched = match_grid(&raw, params)?;
        let size = size
            .or(self.config.image_size)
            .ok_or(MatchGridError::MissingImageSize)?;
        let sampler = SubImageSampler::new(self.config.sampling.clone());
        let lookup =
            matched
                .store
                .build_lookup_grid(size, matched.unit, sampler.policy.lookup_margin)?;
        Ok(sampler.sample(&matched.store, &lookup, params.separation())?)
    }

    fn run_into(
        &self,
        models: &Value,
        size: Option<ImageSize>,
        report: &mut MatchGridReport,
    ) -> Result<(), MatchGridError> {
        let params = &self.config.params;
        let raw = extract_rects(models, &self.config.model)?;
        if raw.len() < 2 {
            return Err(MatchGridError::TooFewPoints { got: raw.len() });
        }
        let points = validate_points(&raw)?;
        let sorted = SortedPoints::new(&points);

        let estimates = estimate_axes(&sorted, params)?;
        report.columns = Some(SpacingReport::from(&estimates.columns));
        report.rows = Some(SpacingReport::from(&estimates.rows));
        let unit = estimates.grid_unit()?;

        let (store, stats) = build_correspondences(&sorted, &estimates, unit);
        let matched = GridMatch {
            estimates,
            unit,
            store,
            stats,
        };
        report.pass_conflicts = matched.stats.conflicts;
        report.rects = matched.rects(params)?;

        let Some(orchestrator) = &self.orchestrator else {
            return Ok(());
        };
        let size = size
            .or(self.config.image_size)
            .ok_or(MatchGridError::MissingImageSize)?;
        let calibration =
            orchestrator.calibrate(&matched.store, size, matched.unit, params.separation())?;
        if let Some(err) = &calibration.error {
            report.push_error(err);
        }
        report.calibrate = Some(calibration);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrate::{CalibrationView, SolverError, SolverOutput};
    use serde_json::json;

    fn lattice_json(cols: usize, rows: usize, step: f32) -> Value {
        let rects: Vec<Value> = (0..rows)
            .flat_map(|r| {
                (0..cols).map(move |c| json!({"x": 40.0 + c as f32 * step, "y": 40.0 + r as f32 * step}))
            })
            .collect();
        json!({"blobs": {"rects": rects}})
    }

    fn config() -> MatchGridConfig {
        MatchGridConfig {
            model: "blobs".into(),
            ..MatchGridConfig::default()
        }
    }

    #[test]
    fn match_grid_requires_two_points() {
        let err = match_grid(&[[1.0, 1.0]], &MatchGridParams::default()).unwrap_err();
        assert!(matches!(err, MatchGridError::TooFewPoints { got: 1 }));
    }

    #[test]
    fn match_grid_rejects_nan() {
        let err = match_grid(&[[1.0, 1.0], [f32::NAN, 2.0]], &MatchGridParams::default())
            .unwrap_err();
        assert!(matches!(err, MatchGridError::Point(_)));
    }

    #[test]
    fn stage_publishes_centred_rects() {
        let report = MatchGridStage::new(config()).run(&lattice_json(3, 3, 10.0), None);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.rects.len(), 9);
        let sum_x: f32 = report.rects.iter().map(|r| r.obj_x).sum();
        let sum_y: f32 = report.rects.iter().map(|r| r.obj_y).sum();
        assert!(sum_x.abs() < 1e-4 && sum_y.abs() < 1e-4);
        let max_x = report.rects.iter().map(|r| r.obj_x).fold(f32::MIN, f32::max);
        assert!((max_x - 5.0).abs() < 1e-4);
        assert_eq!(report.columns.as_ref().and_then(|c| c.grid_scale), Some(2.0));
        assert!(report.calibrate.is_none());
    }

    #[test]
    fn single_row_reports_both_axes() {
        // Two points: each axis has one step but nothing two steps apart.
        let models = json!({"blobs": {"rects": [{"x": 0, "y": 0}, {"x": 10, "y": 0}]}});
        let report = MatchGridStage::new(config()).run(&models, None);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(
            report.errors[0],
            "No grid points matched within tolerance (level 2) dxCount2:0; \
             No grid points matched within tolerance (level 2) dyCount2:0"
        );
        let columns = report.columns.expect("diagnostics");
        assert_eq!(columns.count1, 1);
        assert!(columns.avg1.is_some());
        assert!(columns.avg2.is_none());
        assert!(report.rects.is_empty());
    }

    struct Failing;

    impl CalibrationSolver for Failing {
        fn solve(
            &self,
            _: &[CalibrationView],
            _: ImageSize,
        ) -> Result<SolverOutput, SolverError> {
            Err(SolverError::Failed("singular".into()))
        }
    }

    #[test]
    fn solver_failure_is_a_stage_error() {
        let report = MatchGridStage::new(config())
            .with_solver(Arc::new(Failing))
            .run(&lattice_json(3, 3, 10.0), Some(ImageSize::new(130, 130)));
        assert_eq!(report.errors, vec!["calibrateImage(FAILED) singular".to_string()]);
        let calibrate = report.calibrate.as_ref().expect("calibration attempted");
        assert_eq!(calibrate.error.as_deref(), Some("calibrateImage(FAILED) singular"));
        assert_eq!(report.rects.len(), 9);
        assert!(!report.is_ok());
    }

    #[test]
    fn missing_model_is_reported() {
        let report = MatchGridStage::new(config()).run(&json!({}), None);
        assert_eq!(report.errors, vec!["Named stage is not in model".to_string()]);
    }
}
