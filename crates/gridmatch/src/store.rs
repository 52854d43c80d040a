//! Deduplicated image/grid correspondences and the dense lookup grid.

use gridmatch_core::{GridPoint, ImagePoint, ImageSize, YxKey};
use log::debug;
use nalgebra::{Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GridStoreError {
    #[error("grid store is empty")]
    Empty,
    #[error(
        "correspondence {index} at grid ({col}, {row}) lies outside the {rows}x{cols} lookup grid"
    )]
    OutOfBounds {
        index: usize,
        col: i32,
        row: i32,
        rows: usize,
        cols: usize,
    },
    #[error("lookup grid was built for {built_for} correspondences, store now holds {len}")]
    Stale { built_for: usize, len: usize },
    #[error("invalid grid unit ({x}, {y})")]
    InvalidUnit { x: f32, y: f32 },
}

/// Dense `rows x cols` map from grid coordinate to correspondence id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupGrid {
    pub rows: usize,
    pub cols: usize,
    cells: Vec<Option<usize>>,
    source_len: usize,
}

impl LookupGrid {
    /// Correspondence id at `(row, col)`; cells outside the grid read as empty.
    #[inline]
    pub fn get(&self, row: i64, col: i64) -> Option<usize> {
        if row < 0 || col < 0 || row as usize >= self.rows || col as usize >= self.cols {
            return None;
        }
        self.cells[row as usize * self.cols + col as usize]
    }

    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }
}

/// A rectangular window over the lookup grid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubImageWindow {
    pub label: String,
    pub row: i64,
    pub col: i64,
    pub rows: usize,
    pub cols: usize,
}

impl SubImageWindow {
    pub fn new(label: impl Into<String>, row: i64, col: i64, rows: usize, cols: usize) -> Self {
        Self {
            label: label.into(),
            row,
            col,
            rows,
            cols,
        }
    }

    /// Grid coordinate of the window centre, `(col, row)`.
    pub fn center(&self) -> Vector2<f32> {
        Vector2::new(
            self.col as f32 + (self.cols as f32 - 1.0) / 2.0,
            self.row as f32 + (self.rows as f32 - 1.0) / 2.0,
        )
    }
}

/// One view handed to the calibration solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubImageSubset {
    pub window: SubImageWindow,
    /// Planar object points in physical units, centred on the window.
    pub object_points: Vec<Point3<f32>>,
    pub image_points: Vec<Point2<f32>>,
}

impl SubImageSubset {
    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }
}

/// The grid store: correspondences indexed by insertion order, unique per
/// image location.
#[derive(Clone, Debug, Default)]
pub struct GridMatcher {
    image_points: Vec<ImagePoint>,
    grid_points: Vec<GridPoint>,
    index: BTreeMap<YxKey, usize>,
    image_total: Vector2<f64>,
    grid_total: Vector2<f64>,
}

impl GridMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a correspondence unless the image point is already stored.
    pub fn add(&mut self, point: ImagePoint, grid: GridPoint) -> bool {
        let key = YxKey(point);
        if self.index.contains_key(&key) {
            return false;
        }
        let id = self.image_points.len();
        self.index.insert(key, id);
        self.image_points.push(point);
        self.grid_points.push(grid);
        self.image_total += Vector2::new(point.x() as f64, point.y() as f64);
        self.grid_total += Vector2::new(grid.col as f64, grid.row as f64);
        true
    }

    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }

    pub fn grid_point_of(&self, point: &ImagePoint) -> Option<GridPoint> {
        self.index
            .get(&YxKey(*point))
            .map(|&id| self.grid_points[id])
    }

    /// Correspondences in insertion (id) order.
    pub fn correspondences(&self) -> impl Iterator<Item = (ImagePoint, GridPoint)> + '_ {
        self.image_points
            .iter()
            .copied()
            .zip(self.grid_points.iter().copied())
    }

    pub fn image_centroid(&self) -> Result<Point2<f64>, GridStoreError> {
        let n = self.nonzero_len()?;
        Ok(Point2::from(self.image_total / n))
    }

    /// Mean grid coordinate as `(col, row)`.
    pub fn grid_centroid(&self) -> Result<Point2<f64>, GridStoreError> {
        let n = self.nonzero_len()?;
        Ok(Point2::from(self.grid_total / n))
    }

    fn nonzero_len(&self) -> Result<f64, GridStoreError> {
        if self.is_empty() {
            Err(GridStoreError::Empty)
        } else {
            Ok(self.len() as f64)
        }
    }

    /// Allocate `(h / unit.y + margin) x (w / unit.x + margin)` cells and
    /// index every correspondence by its grid coordinate.
    ///
    /// `unit` is the pixel length of one grid cell along each axis.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(n = self.len()))
    )]
    pub fn build_lookup_grid(
        &self,
        size: ImageSize,
        unit: Vector2<f32>,
        margin: f32,
    ) -> Result<LookupGrid, GridStoreError> {
        if !(unit.x.is_finite() && unit.y.is_finite() && unit.x > 0.0 && unit.y > 0.0) {
            return Err(GridStoreError::InvalidUnit {
                x: unit.x,
                y: unit.y,
            });
        }
        let rows = (size.height as f32 / unit.y + margin).max(0.0) as usize;
        let cols = (size.width as f32 / unit.x + margin).max(0.0) as usize;
        let mut cells = vec![None; rows * cols];

        for (index, g) in self.grid_points.iter().enumerate() {
            let inside =
                g.row >= 0 && g.col >= 0 && (g.row as usize) < rows && (g.col as usize) < cols;
            if !inside {
                return Err(GridStoreError::OutOfBounds {
                    index,
                    col: g.col,
                    row: g.row,
                    rows,
                    cols,
                });
            }
            cells[g.row as usize * cols + g.col as usize] = Some(index);
        }

        debug!("lookup grid {rows}x{cols} indexes {} points", self.len());
        Ok(LookupGrid {
            rows,
            cols,
            cells,
            source_len: self.len(),
        })
    }

    /// Collect the correspondences inside `window`.
    ///
    /// Object points are scaled by `separation` relative to the window
    /// centre. Returns `Ok(None)` when fewer than `min_points` are found; an
    /// empty window is never a subset, even with `min_points == 0`.
    pub fn extract_subset(
        &self,
        lookup: &LookupGrid,
        window: &SubImageWindow,
        min_points: usize,
        separation: Vector2<f32>,
    ) -> Result<Option<SubImageSubset>, GridStoreError> {
        if lookup.source_len != self.len() {
            return Err(GridStoreError::Stale {
                built_for: lookup.source_len,
                len: self.len(),
            });
        }

        let center = window.center();
        let mut object_points = Vec::new();
        let mut image_points = Vec::new();
        for r in 0..window.rows as i64 {
            for c in 0..window.cols as i64 {
                let Some(id) = lookup.get(window.row + r, window.col + c) else {
                    continue;
                };
                let g = self.grid_points[id];
                object_points.push(Point3::new(
                    separation.x * (g.col as f32 - center.x),
                    separation.y * (g.row as f32 - center.y),
                    0.0,
                ));
                image_points.push(self.image_points[id].position());
            }
        }

        if image_points.len() < min_points.max(1) {
            debug!(
                "sub-image {} ({},{}) rejected: {} points",
                window.label,
                window.row,
                window.col,
                image_points.len()
            );
            return Ok(None);
        }
        debug!(
            "sub-image {} ({},{}) accepted: {} points",
            window.label,
            window.row,
            window.col,
            image_points.len()
        );
        Ok(Some(SubImageSubset {
            window: window.clone(),
            object_points,
            image_points,
        }))
    }
}
