//! JSON configuration, upstream model input and report types.

use gridmatch_core::ImageSize;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fs, path::Path, time::Duration};

use crate::calibrate::CalibrationReport;
use crate::params::MatchGridParams;
use crate::sampler::SamplingPolicy;
use crate::spacing::SpacingEstimate;

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Problems with the stage input model.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("matchGrid model: expected name of stage with rects")]
    MissingModelName,
    #[error("Named stage is not in model")]
    ModelNotFound { model: String },
    #[error("Expected array of rects to match")]
    RectsNotArray,
    #[error("Expected array of at least 2 rects to match")]
    TooFewRects { got: usize },
}

/// Configuration of one `matchGrid` stage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchGridConfig {
    /// Name of the upstream stage holding `rects`.
    #[serde(default)]
    pub model: String,
    #[serde(flatten)]
    pub params: MatchGridParams,
    #[serde(default)]
    pub sampling: SamplingPolicy,
    /// Upper bound on the solver call, in milliseconds.
    #[serde(default)]
    pub solver_timeout_ms: Option<u64>,
    /// Image dimensions; required for calibration.
    #[serde(default)]
    pub image_size: Option<ImageSize>,
}

impl MatchGridConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn solver_timeout(&self) -> Option<Duration> {
        self.solver_timeout_ms.map(Duration::from_millis)
    }
}

/// Pull `[x, y]` pairs from `models[model].rects`.
///
/// Records without numeric `x` and `y` are skipped; the minimum-count check
/// applies to the raw array.
pub fn extract_rects(models: &Value, model: &str) -> Result<Vec<[f32; 2]>, ConfigError> {
    if model.is_empty() {
        return Err(ConfigError::MissingModelName);
    }
    let Some(stage) = models.get(model).filter(|m| m.is_object()) else {
        return Err(ConfigError::ModelNotFound {
            model: model.to_string(),
        });
    };
    let Some(rects) = stage.get("rects").and_then(Value::as_array) else {
        return Err(ConfigError::RectsNotArray);
    };
    if rects.len() < 2 {
        return Err(ConfigError::TooFewRects { got: rects.len() });
    }
    Ok(rects
        .iter()
        .filter_map(|r| {
            let x = r.get("x")?.as_f64()?;
            let y = r.get("y")?.as_f64()?;
            Some([x as f32, y as f32])
        })
        .collect())
}

/// Load a JSON file of named upstream stage results.
pub fn load_models(path: impl AsRef<Path>) -> Result<Value, IoError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// One stored correspondence with its centred physical coordinate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedRect {
    pub x: f32,
    pub y: f32,
    pub obj_x: f32,
    pub obj_y: f32,
    pub obj_z: f32,
}

/// Published spacing diagnostics for one axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpacingReport {
    pub median: f32,
    pub count1: usize,
    pub count2: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg1: Option<[f32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg2: Option<[f32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_scale: Option<f32>,
}

impl From<&SpacingEstimate> for SpacingReport {
    fn from(est: &SpacingEstimate) -> Self {
        let scale = est.grid_scale().ok();
        Self {
            median: est.median,
            count1: est.count1,
            count2: est.count2,
            avg1: est.avg1().map(|v| [v.x, v.y]),
            // Only published on full success.
            avg2: scale.and(est.avg2()).map(|v| [v.x, v.y]),
            grid_scale: scale,
        }
    }
}

/// Result of one `matchGrid` stage run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchGridReport {
    #[serde(default)]
    pub rects: Vec<MatchedRect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<SpacingReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<SpacingReport>,
    #[serde(default)]
    pub pass_conflicts: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibrate: Option<CalibrationReport>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl MatchGridReport {
    pub fn push_error(&mut self, err: impl ToString) {
        self.errors.push(err.to_string());
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
            && self
                .calibrate
                .as_ref()
                .is_none_or(|c| c.error.is_none())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_errors_follow_check_order() {
        let models = json!({
            "blobs": {"rects": [{"x": 1, "y": 2}]},
            "noarr": {"rects": 3},
        });
        assert_eq!(extract_rects(&models, ""), Err(ConfigError::MissingModelName));
        assert_eq!(
            extract_rects(&models, "absent").unwrap_err().to_string(),
            "Named stage is not in model"
        );
        assert_eq!(extract_rects(&models, "noarr"), Err(ConfigError::RectsNotArray));
        assert_eq!(
            extract_rects(&models, "blobs"),
            Err(ConfigError::TooFewRects { got: 1 })
        );
    }

    #[test]
    fn non_numeric_records_are_skipped() {
        let models = json!({"blobs": {"rects": [
            {"x": 1.5, "y": 2},
            {"x": "a", "y": 2},
            {"y": 4},
            {"x": 3, "y": 4.25},
        ]}});
        let pts = extract_rects(&models, "blobs").expect("rects");
        assert_eq!(pts, vec![[1.5, 2.0], [3.0, 4.25]]);
    }

    #[test]
    fn config_defaults_fill_missing_keys() {
        let cfg: MatchGridConfig =
            serde_json::from_value(json!({"model": "blobs", "sepX": 2.5})).expect("config");
        assert_eq!(cfg.model, "blobs");
        assert_eq!(cfg.params.sep_x, 2.5);
        assert_eq!(cfg.params.sep_y, 5.0);
        assert_eq!(cfg.params.tolerance, 0.35);
        assert_eq!(cfg.sampling, SamplingPolicy::default());
        assert!(cfg.solver_timeout().is_none());
    }

    #[test]
    fn config_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("match.json");
        let cfg = MatchGridConfig {
            model: "blobs".into(),
            solver_timeout_ms: Some(250),
            image_size: Some(ImageSize::new(640, 480)),
            ..MatchGridConfig::default()
        };
        cfg.write_json(&path).expect("write");
        let back = MatchGridConfig::load_json(&path).expect("load");
        assert_eq!(back, cfg);
        assert_eq!(back.solver_timeout(), Some(Duration::from_millis(250)));
    }
}
