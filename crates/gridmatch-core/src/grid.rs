use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// Integer lattice position `(col, row, z)` in grid-cell units.
///
/// `z` is the plane index and is `0` for a single planar target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPoint {
    pub col: i32,
    pub row: i32,
    pub z: i32,
}

impl GridPoint {
    pub const ORIGIN: GridPoint = GridPoint {
        col: 0,
        row: 0,
        z: 0,
    };

    #[inline]
    pub fn new(col: i32, row: i32) -> Self {
        Self { col, row, z: 0 }
    }

    /// Shift by an integer offset.
    #[inline]
    pub fn offset(self, offset: GridOffset) -> GridPoint {
        GridPoint {
            col: self.col + offset.dc,
            row: self.row + offset.dr,
            z: self.z,
        }
    }
}

/// Integer translation between two grid frames: `dst = src + (dc, dr)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridOffset {
    pub dc: i32,
    pub dr: i32,
}

impl GridOffset {
    pub const ZERO: GridOffset = GridOffset { dc: 0, dr: 0 };

    #[inline]
    pub fn new(dc: i32, dr: i32) -> Self {
        Self { dc, dr }
    }

    /// Round a real-valued cell displacement half away from zero on each axis.
    #[inline]
    pub fn round_from(dc: f32, dr: f32) -> Self {
        Self {
            dc: dc.round() as i32,
            dr: dr.round() as i32,
        }
    }

    #[inline]
    pub fn inverse(self) -> GridOffset {
        GridOffset {
            dc: -self.dc,
            dr: -self.dr,
        }
    }
}

impl Add<GridOffset> for GridPoint {
    type Output = GridPoint;

    fn add(self, rhs: GridOffset) -> GridPoint {
        self.offset(rhs)
    }
}

impl Sub for GridPoint {
    type Output = GridOffset;

    fn sub(self, rhs: GridPoint) -> GridOffset {
        GridOffset {
            dc: self.col - rhs.col,
            dr: self.row - rhs.row,
        }
    }
}
