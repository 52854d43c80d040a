//! Calibration orchestration around an external solver.
//!
//! The orchestrator builds the lookup grid, samples sub-image views and hands
//! them to a [`CalibrationSolver`]. Solver failures never escape: they are
//! folded into [`CalibrationReport::error`]. Only store invariant breaks
//! (out-of-bounds coordinates, stale lookup) abort with an error.

use gridmatch_core::{CameraMatrix, DistortionCoeffs, ImageSize};
use log::{info, warn};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::error::MatchGridError;
use crate::sampler::{SamplingPolicy, SubImageSampler};
use crate::store::{GridMatcher, SubImageSubset};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// One planar view: object points in physical units and their image points.
pub type CalibrationView = SubImageSubset;

/// What a solver reports on success.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverOutput {
    pub camera_matrix: CameraMatrix,
    pub dist_coeffs: DistortionCoeffs,
    pub rms_error: f64,
    /// Per-view rotation vectors, if the solver provides them.
    pub rvecs: Option<Vec<[f64; 3]>>,
    /// Per-view translation vectors, if the solver provides them.
    pub tvecs: Option<Vec<[f64; 3]>>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("no sub-image views to calibrate")]
    NoViews,
    #[error("solver did not finish within {0:?}")]
    Timeout(Duration),
    #[error("solver panicked")]
    Panicked,
    #[error("{0}")]
    Failed(String),
}

/// External nonlinear least-squares camera calibration.
pub trait CalibrationSolver: Send + Sync {
    fn solve(
        &self,
        views: &[CalibrationView],
        size: ImageSize,
    ) -> Result<SolverOutput, SolverError>;
}

/// Published calibration result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationReport {
    /// Number of views handed to the solver.
    pub images: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_matrix: Option<CameraMatrix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist_coeffs: Option<DistortionCoeffs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rms_error: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rvecs: Option<Vec<[f64; 3]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tvecs: Option<Vec<[f64; 3]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CalibrationReport {
    pub fn set_output(&mut self, out: SolverOutput) {
        self.camera_matrix = Some(out.camera_matrix);
        self.dist_coeffs = Some(out.dist_coeffs);
        self.rms_error = Some(out.rms_error);
        self.rvecs = out.rvecs;
        self.tvecs = out.tvecs;
        self.error = None;
    }

    pub fn set_error(&mut self, err: SolverError) {
        self.error = Some(format!("calibrateImage(FAILED) {err}"));
    }
}

/// Samples the store and drives the solver.
#[derive(Clone)]
pub struct CalibrationOrchestrator {
    solver: Arc<dyn CalibrationSolver>,
    sampler: SubImageSampler,
    timeout: Option<Duration>,
}

impl CalibrationOrchestrator {
    pub fn new(solver: Arc<dyn CalibrationSolver>) -> Self {
        Self {
            solver,
            sampler: SubImageSampler::default(),
            timeout: None,
        }
    }

    pub fn with_policy(mut self, policy: SamplingPolicy) -> Self {
        self.sampler = SubImageSampler::new(policy);
        self
    }

    /// Bound the solver call; `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn policy(&self) -> &SamplingPolicy {
        &self.sampler.policy
    }

    /// Build the lookup grid, sample views and run the solver.
    ///
    /// `unit` is the pixel length of one grid cell, `separation` the physical
    /// lattice spacing used for object points.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, store), fields(n = store.len()))
    )]
    pub fn calibrate(
        &self,
        store: &GridMatcher,
        size: ImageSize,
        unit: Vector2<f32>,
        separation: Vector2<f32>,
    ) -> Result<CalibrationReport, MatchGridError> {
        let lookup = store.build_lookup_grid(size, unit, self.sampler.policy.lookup_margin)?;
        let views = self.sampler.sample(store, &lookup, separation)?;

        let mut report = CalibrationReport {
            images: views.len(),
            ..CalibrationReport::default()
        };
        match self.run_solver(views, size) {
            Ok(out) => {
                info!(
                    "calibrated {} views, rms error {:.4}",
                    report.images, out.rms_error
                );
                report.set_output(out);
            }
            Err(err) => {
                warn!("calibration failed: {err}");
                report.set_error(err);
            }
        }
        Ok(report)
    }

    /// Invoke the solver, on a worker thread when a timeout is set. A solver
    /// panic becomes [`SolverError::Panicked`] either way.
    pub fn run_solver(
        &self,
        views: Vec<CalibrationView>,
        size: ImageSize,
    ) -> Result<SolverOutput, SolverError> {
        if views.is_empty() {
            return Err(SolverError::NoViews);
        }
        let Some(timeout) = self.timeout else {
            return catch_unwind(AssertUnwindSafe(|| self.solver.solve(&views, size)))
                .unwrap_or(Err(SolverError::Panicked));
        };

        let (tx, rx) = mpsc::channel();
        let solver = Arc::clone(&self.solver);
        thread::spawn(move || {
            let _ = tx.send(solver.solve(&views, size));
        });
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(SolverError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SolverError::Panicked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmatch_core::{GridPoint, ImagePoint};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<usize>>,
    }

    impl CalibrationSolver for Recording {
        fn solve(
            &self,
            views: &[CalibrationView],
            size: ImageSize,
        ) -> Result<SolverOutput, SolverError> {
            self.calls.lock().expect("lock").push(views.len());
            Ok(SolverOutput {
                camera_matrix: CameraMatrix::centered(size),
                dist_coeffs: DistortionCoeffs::zero(),
                rms_error: 0.25,
                rvecs: None,
                tvecs: None,
            })
        }
    }

    struct Failing;

    impl CalibrationSolver for Failing {
        fn solve(&self, _: &[CalibrationView], _: ImageSize) -> Result<SolverOutput, SolverError> {
            Err(SolverError::Failed("singular".into()))
        }
    }

    struct Slow;

    impl CalibrationSolver for Slow {
        fn solve(&self, _: &[CalibrationView], _: ImageSize) -> Result<SolverOutput, SolverError> {
            thread::sleep(Duration::from_millis(500));
            Err(SolverError::Failed("late".into()))
        }
    }

    struct Panicking;

    impl CalibrationSolver for Panicking {
        fn solve(&self, _: &[CalibrationView], _: ImageSize) -> Result<SolverOutput, SolverError> {
            panic!("solver blew up");
        }
    }

    fn block_store() -> GridMatcher {
        let mut store = GridMatcher::new();
        for r in 4..7 {
            for c in 4..7 {
                let pt = ImagePoint::new(c as f32 * 10.0, r as f32 * 10.0).expect("finite");
                store.add(pt, GridPoint::new(c, r));
            }
        }
        store
    }

    fn calibrate_with(orch: &CalibrationOrchestrator) -> CalibrationReport {
        orch.calibrate(
            &block_store(),
            ImageSize::new(130, 130),
            Vector2::new(10.0, 10.0),
            Vector2::new(5.0, 5.0),
        )
        .expect("store is consistent")
    }

    #[test]
    fn solver_receives_sampled_views() {
        let solver = Arc::new(Recording::default());
        let orch = CalibrationOrchestrator::new(solver.clone());
        let report = calibrate_with(&orch);

        let calls = solver.calls.lock().expect("lock").clone();
        assert_eq!(calls.len(), 1);
        assert!(calls[0] >= 1);
        assert_eq!(report.images, calls[0]);
        assert_eq!(report.rms_error, Some(0.25));
        assert!(report.error.is_none());
    }

    #[test]
    fn solver_failure_is_reported_not_raised() {
        let orch = CalibrationOrchestrator::new(Arc::new(Failing));
        let report = calibrate_with(&orch);
        assert_eq!(
            report.error.as_deref(),
            Some("calibrateImage(FAILED) singular")
        );
        assert!(report.camera_matrix.is_none());
    }

    #[test]
    fn zero_views_never_reach_the_solver() {
        let solver = Arc::new(Recording::default());
        let orch = CalibrationOrchestrator::new(solver.clone()).with_policy(SamplingPolicy {
            min_points: 100,
            ..SamplingPolicy::default()
        });
        let report = calibrate_with(&orch);
        assert_eq!(report.images, 0);
        assert!(solver.calls.lock().expect("lock").is_empty());
        assert_eq!(
            report.error.as_deref(),
            Some("calibrateImage(FAILED) no sub-image views to calibrate")
        );
    }

    #[test]
    fn slow_solver_times_out() {
        let orch = CalibrationOrchestrator::new(Arc::new(Slow))
            .with_timeout(Some(Duration::from_millis(20)));
        let report = calibrate_with(&orch);
        let err = report.error.expect("timeout reported");
        assert!(err.starts_with("calibrateImage(FAILED) solver did not finish"), "{err}");
    }

    #[test]
    fn panicking_solver_is_contained_without_timeout() {
        let orch = CalibrationOrchestrator::new(Arc::new(Panicking));
        let report = calibrate_with(&orch);
        assert_eq!(
            report.error.as_deref(),
            Some("calibrateImage(FAILED) solver panicked")
        );
        assert!(report.camera_matrix.is_none());
    }

    #[test]
    fn panicking_solver_is_contained_with_timeout() {
        let orch = CalibrationOrchestrator::new(Arc::new(Panicking))
            .with_timeout(Some(Duration::from_secs(5)));
        let report = calibrate_with(&orch);
        assert_eq!(
            report.error.as_deref(),
            Some("calibrateImage(FAILED) solver panicked")
        );
    }

    #[test]
    fn report_serializes_camel_case() {
        let mut report = CalibrationReport {
            images: 2,
            ..CalibrationReport::default()
        };
        report.set_output(SolverOutput {
            camera_matrix: CameraMatrix::centered(ImageSize::new(10, 10)),
            dist_coeffs: DistortionCoeffs::zero(),
            rms_error: 1.5,
            rvecs: None,
            tvecs: None,
        });
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["images"], 2);
        assert_eq!(json["rmsError"], 1.5);
        assert_eq!(json["cameraMatrix"].as_array().map(|a| a.len()), Some(9));
        assert!(json.get("error").is_none());
    }
}
