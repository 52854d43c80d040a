//! Correspondence walk: chain in-tolerance neighbours and propagate integer
//! grid coordinates into the shared [`GridMatcher`].

use gridmatch_core::{GridOffset, GridPoint, ImagePoint};
use log::{debug, trace};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::spacing::{SpacingAxis, ToleranceWindow};
use crate::store::GridMatcher;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Counters for one walk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkStats {
    /// Adjacent pairs inside the tolerance window.
    pub accepted: usize,
    /// Adjacent pairs outside it.
    pub gaps: usize,
    /// New correspondences stored by this walk.
    pub inserted: usize,
    /// Points already stored under a different grid coordinate.
    pub conflicts: usize,
}

impl WalkStats {
    pub fn merge(self, other: WalkStats) -> WalkStats {
        WalkStats {
            accepted: self.accepted + other.accepted,
            gaps: self.gaps + other.gaps,
            inserted: self.inserted + other.inserted,
            conflicts: self.conflicts + other.conflicts,
        }
    }
}

/// Walks one sorted point sequence and writes into the store.
pub struct CorrespondenceBuilder<'a> {
    store: &'a mut GridMatcher,
    unit: Vector2<f32>,
}

impl<'a> CorrespondenceBuilder<'a> {
    /// `unit` is the pixel length of one grid cell along `x` and `y`.
    pub fn new(store: &'a mut GridMatcher, unit: Vector2<f32>) -> Self {
        Self { store, unit }
    }

    /// Absolute grid coordinate of a pixel position.
    pub fn seed(&self, point: &ImagePoint) -> GridPoint {
        GridPoint::ORIGIN
            + GridOffset::round_from(point.x() / self.unit.x, point.y() / self.unit.y)
    }

    /// Rounded grid displacement from `from` to `to`.
    pub fn step(&self, from: &ImagePoint, to: &ImagePoint) -> GridOffset {
        let d = to.delta(from);
        GridOffset::round_from(d.x / self.unit.x, d.y / self.unit.y)
    }

    /// Walk `sorted` (ordered by `axis.order()`).
    ///
    /// A cursor holds the last placed point. The first accepted pair seeds
    /// the cursor absolutely; every later accepted pair `(a, b)` moves the
    /// cursor to `a` (if it is not already there) and then to `b`, each move
    /// adding the rounded displacement. Out-of-window pairs place nothing.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, sorted, window), fields(n = sorted.len()))
    )]
    pub fn walk(
        &mut self,
        sorted: &[ImagePoint],
        axis: SpacingAxis,
        window: &ToleranceWindow,
    ) -> WalkStats {
        let mut stats = WalkStats::default();
        let mut cursor: Option<(ImagePoint, GridPoint)> = None;

        for pair in sorted.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let delta = axis.component(a.delta(&b));
            if !window.contains(delta) {
                stats.gaps += 1;
                trace!("{axis} walk gap at ({}, {}) delta {delta:.3}", b.x(), b.y());
                continue;
            }
            stats.accepted += 1;

            let grid_a = match cursor {
                None => {
                    let g = self.seed(&a);
                    debug!("{axis} walk seeded at ({}, {}) -> {g:?}", a.x(), a.y());
                    self.place(a, g, &mut stats);
                    g
                }
                Some((p, g)) if p == a => g,
                Some((p, g)) => {
                    let g = g + self.step(&p, &a);
                    self.place(a, g, &mut stats);
                    g
                }
            };
            let grid_b = grid_a + self.step(&a, &b);
            self.place(b, grid_b, &mut stats);
            cursor = Some((b, grid_b));
        }

        debug!(
            "{axis} walk: accepted {} gaps {} inserted {} conflicts {}",
            stats.accepted, stats.gaps, stats.inserted, stats.conflicts
        );
        stats
    }

    fn place(&mut self, point: ImagePoint, grid: GridPoint, stats: &mut WalkStats) {
        if self.store.add(point, grid) {
            stats.inserted += 1;
            return;
        }
        if let Some(existing) = self.store.grid_point_of(&point) {
            if existing != grid {
                stats.conflicts += 1;
                debug!(
                    "({}, {}) already at {existing:?}, walk derived {grid:?}; keeping first",
                    point.x(),
                    point.y()
                );
            }
        }
    }
}
