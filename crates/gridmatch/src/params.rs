use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

fn default_tolerance() -> f32 {
    0.35
}

fn default_separation() -> f32 {
    5.0
}

/// Matching parameters for one `matchGrid` invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchGridParams {
    /// Fractional tolerance window around the median neighbour spacing.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    /// Physical column separation of the target lattice.
    #[serde(default = "default_separation")]
    pub sep_x: f32,
    /// Physical row separation of the target lattice.
    #[serde(default = "default_separation")]
    pub sep_y: f32,
    /// Z value published with every matched point.
    #[serde(default)]
    pub obj_z: f32,
}

impl Default for MatchGridParams {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            sep_x: default_separation(),
            sep_y: default_separation(),
            obj_z: 0.0,
        }
    }
}

impl MatchGridParams {
    pub fn separation(&self) -> Vector2<f32> {
        Vector2::new(self.sep_x, self.sep_y)
    }
}
