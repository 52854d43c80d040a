//! Pinhole camera matrix, distortion coefficients and image size.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CameraModelError {
    #[error("expected cameraMatrix: [v11,v12,v13,v21,v22,v23,v31,v32,v33]")]
    CameraMatrixShape { got: usize },
    #[error("expected distCoeffs of 4, 5, or 8 elements")]
    DistortionShape { got: usize },
    #[error("camera matrix is singular")]
    Singular,
}

/// Image dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// 3×3 intrinsic matrix `K`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct CameraMatrix {
    pub k: Matrix3<f64>,
}

impl CameraMatrix {
    pub fn new(k: Matrix3<f64>) -> Self {
        Self { k }
    }

    /// Unit focal length, principal point at the integer image centre.
    pub fn centered(size: ImageSize) -> Self {
        Self::new(Matrix3::new(
            1.0,
            0.0,
            (size.width / 2) as f64,
            0.0,
            1.0,
            (size.height / 2) as f64,
            0.0,
            0.0,
            1.0,
        ))
    }

    /// Build from 9 row-major values.
    pub fn from_row_slice(values: &[f64]) -> Result<Self, CameraModelError> {
        if values.len() != 9 {
            return Err(CameraModelError::CameraMatrixShape { got: values.len() });
        }
        Ok(Self::new(Matrix3::from_row_slice(values)))
    }

    /// Row-major values.
    pub fn to_row_vec(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(9);
        for r in 0..3 {
            for c in 0..3 {
                out.push(self.k[(r, c)]);
            }
        }
        out
    }

    /// Normalized camera coordinates → pixel.
    pub fn project(&self, xy: [f64; 2]) -> [f64; 2] {
        let v = self.k * Vector3::new(xy[0], xy[1], 1.0);
        [v[0] / v[2], v[1] / v[2]]
    }

    pub fn inverse(&self) -> Result<Matrix3<f64>, CameraModelError> {
        self.k.try_inverse().ok_or(CameraModelError::Singular)
    }
}

impl TryFrom<Vec<f64>> for CameraMatrix {
    type Error = CameraModelError;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        CameraMatrix::from_row_slice(&value)
    }
}

impl From<CameraMatrix> for Vec<f64> {
    fn from(m: CameraMatrix) -> Self {
        m.to_row_vec()
    }
}

/// Distortion coefficients in the `(k1, k2, p1, p2[, k3[, k4, k5, k6]])` layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct DistortionCoeffs {
    coeffs: Vec<f64>,
}

impl DistortionCoeffs {
    /// Zero distortion with four coefficients.
    pub fn zero() -> Self {
        Self {
            coeffs: vec![0.0; 4],
        }
    }

    pub fn new(coeffs: Vec<f64>) -> Result<Self, CameraModelError> {
        match coeffs.len() {
            4 | 5 | 8 => Ok(Self { coeffs }),
            got => Err(CameraModelError::DistortionShape { got }),
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    fn at(&self, i: usize) -> f64 {
        self.coeffs.get(i).copied().unwrap_or(0.0)
    }

    /// Apply the radial-tangential (rational, with 8 coefficients) model to
    /// normalized coordinates.
    pub fn distort_normalized(&self, xy: [f64; 2]) -> [f64; 2] {
        let [x, y] = xy;
        let (k1, k2, p1, p2, k3) = (self.at(0), self.at(1), self.at(2), self.at(3), self.at(4));
        let (k4, k5, k6) = (self.at(5), self.at(6), self.at(7));
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let num = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;
        let den = 1.0 + k4 * r2 + k5 * r4 + k6 * r6;
        let radial = if den.abs() > 1e-12 { num / den } else { num };
        let x_tan = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let y_tan = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        [x * radial + x_tan, y * radial + y_tan]
    }
}

impl Default for DistortionCoeffs {
    fn default() -> Self {
        Self::zero()
    }
}

impl TryFrom<Vec<f64>> for DistortionCoeffs {
    type Error = CameraModelError;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        DistortionCoeffs::new(value)
    }
}

impl From<DistortionCoeffs> for Vec<f64> {
    fn from(d: DistortionCoeffs) -> Self {
        d.coeffs
    }
}
