//! Lens undistortion: resolve intrinsics from a prior calibration or explicit
//! values, then remap an image through the distortion model.

use gridmatch_core::{
    CameraMatrix, CameraModelError, DistortionCoeffs, GrayImage, GrayImageView, ImageSize,
};
use log::debug;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum UndistortError {
    #[error("Expected \"calibrate\" JSON object in stage \"{model}\"")]
    MissingCalibrate { model: String },
    #[error(transparent)]
    CameraModel(#[from] CameraModelError),
    #[error("image buffer holds {got} bytes, expected {expected}")]
    BufferSize { expected: usize, got: usize },
}

/// Stage configuration for undistortion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndistortConfig {
    /// Name of a prior stage whose `calibrate` object supplies the intrinsics.
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub camera_matrix: Option<Vec<f64>>,
    #[serde(default)]
    pub dist_coeffs: Option<Vec<f64>>,
}

/// Validated intrinsics for one undistortion.
#[derive(Clone, Debug, PartialEq)]
pub struct UndistortParams {
    pub camera_matrix: CameraMatrix,
    pub dist_coeffs: DistortionCoeffs,
}

impl UndistortParams {
    /// Unit focal length centred on the image, zero distortion.
    pub fn defaults(size: ImageSize) -> Self {
        Self {
            camera_matrix: CameraMatrix::centered(size),
            dist_coeffs: DistortionCoeffs::zero(),
        }
    }

    /// Resolve against the named model in `models` when it exists, else
    /// against the values in `config`. Missing values take the defaults.
    pub fn resolve(
        config: &UndistortConfig,
        models: &Value,
        size: ImageSize,
    ) -> Result<Self, UndistortError> {
        let (cm, dc) = match models.get(&config.model).filter(|m| m.is_object()) {
            Some(model) => {
                let Some(calibrate) = model.get("calibrate").filter(|c| c.is_object()) else {
                    return Err(UndistortError::MissingCalibrate {
                        model: config.model.clone(),
                    });
                };
                (
                    calibrate.get("cameraMatrix").map(numbers),
                    calibrate.get("distCoeffs").map(numbers),
                )
            }
            None => (config.camera_matrix.clone(), config.dist_coeffs.clone()),
        };

        let defaults = Self::defaults(size);
        let camera_matrix = match cm {
            Some(values) => CameraMatrix::from_row_slice(&values)?,
            None => defaults.camera_matrix,
        };
        let dist_coeffs = match dc {
            Some(values) => DistortionCoeffs::new(values)?,
            None => defaults.dist_coeffs,
        };
        Ok(Self {
            camera_matrix,
            dist_coeffs,
        })
    }
}

/// Numeric entries of a JSON array; anything else yields an empty vector so
/// that shape validation rejects it.
fn numbers(value: &Value) -> Vec<f64> {
    value
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default()
}

/// Produces a corrected image of the same size.
pub trait Undistorter {
    fn undistort(
        &self,
        src: &GrayImageView<'_>,
        params: &UndistortParams,
    ) -> Result<GrayImage, UndistortError>;
}

/// Inverse-maps each destination pixel through the distortion model and
/// samples the source bilinearly. The destination uses the same intrinsics.
#[derive(Clone, Copy, Debug, Default)]
pub struct RemapUndistorter;

impl Undistorter for RemapUndistorter {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, src, params), fields(w = src.width, h = src.height))
    )]
    fn undistort(
        &self,
        src: &GrayImageView<'_>,
        params: &UndistortParams,
    ) -> Result<GrayImage, UndistortError> {
        let expected = src.width * src.height;
        if !src.is_consistent() {
            return Err(UndistortError::BufferSize {
                expected,
                got: src.data.len(),
            });
        }
        let k_inv = params.camera_matrix.inverse()?;
        let mut data = Vec::with_capacity(expected);
        for v in 0..src.height {
            for u in 0..src.width {
                let n = k_inv * Vector3::new(u as f64, v as f64, 1.0);
                let xy = [n[0] / n[2], n[1] / n[2]];
                let d = params.dist_coeffs.distort_normalized(xy);
                let [x, y] = params.camera_matrix.project(d);
                data.push(src.sample_u8(x as f32, y as f32));
            }
        }
        debug!(
            "undistorted {}x{} image with {} coefficients",
            src.width,
            src.height,
            params.dist_coeffs.len()
        );
        Ok(GrayImage {
            width: src.width,
            height: src.height,
            data,
        })
    }
}
