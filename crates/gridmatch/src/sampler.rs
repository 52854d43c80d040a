//! Sub-image sampling: a cross of bands through the lattice centre, repeated
//! at lateral offsets, each band becoming one calibration view.

use log::{debug, info};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::store::{GridMatcher, GridStoreError, LookupGrid, SubImageSubset, SubImageWindow};

fn default_major() -> usize {
    6
}

fn default_minor() -> usize {
    3
}

fn default_offsets() -> Vec<usize> {
    vec![1, 2, 3]
}

fn default_min_points() -> usize {
    4
}

fn default_lookup_margin() -> f32 {
    1.5
}

/// Band dimensions, lateral offsets and acceptance threshold for sampling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingPolicy {
    /// Long side of a band, in grid cells.
    #[serde(default = "default_major")]
    pub major: usize,
    /// Short side of a band, in grid cells.
    #[serde(default = "default_minor")]
    pub minor: usize,
    /// Lateral shifts applied to each band, in both directions.
    #[serde(default = "default_offsets")]
    pub offsets: Vec<usize>,
    /// Minimum correspondences for a view to be kept.
    #[serde(default = "default_min_points")]
    pub min_points: usize,
    /// Extra cells added to each lookup grid dimension.
    #[serde(default = "default_lookup_margin")]
    pub lookup_margin: f32,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            major: default_major(),
            minor: default_minor(),
            offsets: default_offsets(),
            min_points: default_min_points(),
            lookup_margin: default_lookup_margin(),
        }
    }
}

/// Enumerates windows and extracts the accepted subsets.
#[derive(Clone, Debug, Default)]
pub struct SubImageSampler {
    pub policy: SamplingPolicy,
}

impl SubImageSampler {
    pub fn new(policy: SamplingPolicy) -> Self {
        Self { policy }
    }

    /// Candidate windows, centre cross first, then each offset in order.
    ///
    /// Bands whose shifted position would leave the grid are clamped to its
    /// first/last valid offset, so duplicates are possible.
    pub fn windows(&self, lookup: &LookupGrid) -> Vec<SubImageWindow> {
        let SamplingPolicy { major, minor, .. } = self.policy;
        let r_last = (lookup.rows as i64 - major as i64).max(0);
        let c_last = (lookup.cols as i64 - major as i64).max(0);
        let rc = r_last / 2;
        let cc = c_last / 2;

        let row_band = |label: String, col: i64| SubImageWindow::new(label, rc, col, minor, major);
        let col_band = |label: String, row: i64| SubImageWindow::new(label, row, cc, major, minor);

        let mut out = vec![
            row_band("row-band".into(), cc),
            col_band("col-band".into(), rc),
        ];
        for &s in &self.policy.offsets {
            let s = s as i64;
            out.push(row_band(format!("row-band-{s}"), (cc - s).max(0)));
            out.push(row_band(format!("row-band+{s}"), (cc + s).min(c_last)));
            out.push(col_band(format!("col-band-{s}"), (rc - s).max(0)));
            out.push(col_band(format!("col-band+{s}"), (rc + s).min(r_last)));
        }
        out
    }

    /// Extract every window holding at least `min_points` correspondences.
    pub fn sample(
        &self,
        store: &GridMatcher,
        lookup: &LookupGrid,
        separation: Vector2<f32>,
    ) -> Result<Vec<SubImageSubset>, GridStoreError> {
        let windows = self.windows(lookup);
        let candidates = windows.len();
        let mut views = Vec::with_capacity(candidates);
        for window in &windows {
            if let Some(subset) =
                store.extract_subset(lookup, window, self.policy.min_points, separation)?
            {
                views.push(subset);
            }
        }
        info!("sampled {} of {candidates} sub-images", views.len());
        if views.is_empty() {
            debug!(
                "no sub-image reached {} points on a {}x{} lookup grid",
                self.policy.min_points, lookup.rows, lookup.cols
            );
        }
        Ok(views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmatch_core::{GridPoint, ImagePoint, ImageSize};

    fn store_with(coords: &[(i32, i32)]) -> GridMatcher {
        let mut store = GridMatcher::new();
        for &(c, r) in coords {
            let pt = ImagePoint::new(c as f32 * 10.0, r as f32 * 10.0).expect("finite");
            store.add(pt, GridPoint::new(c, r));
        }
        store
    }

    #[test]
    fn default_policy_matches_cross_layout() {
        let store = store_with(&[(0, 0)]);
        let lookup = store
            .build_lookup_grid(ImageSize::new(130, 130), Vector2::new(10.0, 10.0), 1.5)
            .expect("lookup");
        assert_eq!((lookup.rows, lookup.cols), (14, 14));

        let sampler = SubImageSampler::default();
        let windows = sampler.windows(&lookup);
        assert_eq!(windows.len(), 14);
        assert_eq!(windows[0], SubImageWindow::new("row-band", 4, 4, 3, 6));
        assert_eq!(windows[1], SubImageWindow::new("col-band", 4, 4, 6, 3));
        assert_eq!(windows[2], SubImageWindow::new("row-band-1", 4, 3, 3, 6));
        assert_eq!(windows[3], SubImageWindow::new("row-band+1", 4, 5, 3, 6));
        assert_eq!(windows[4], SubImageWindow::new("col-band-1", 3, 4, 6, 3));
        assert_eq!(windows[13], SubImageWindow::new("col-band+3", 7, 4, 6, 3));
    }

    #[test]
    fn offsets_clamp_to_grid() {
        let store = store_with(&[(0, 0)]);
        let lookup = store
            .build_lookup_grid(ImageSize::new(60, 60), Vector2::new(10.0, 10.0), 1.5)
            .expect("lookup");
        // 7x7 grid: last band offset is 1, centre offset 0.
        let windows = SubImageSampler::default().windows(&lookup);
        for w in &windows {
            assert!(w.row >= 0 && w.row <= 1, "{w:?}");
            assert!(w.col >= 0 && w.col <= 1, "{w:?}");
        }
        assert_eq!(windows[2].col, 0);
        assert_eq!(windows[3].col, 1);
        assert_eq!(windows[7].col, 1);
    }

    #[test]
    fn small_policy_keeps_only_populated_windows() {
        let coords: Vec<(i32, i32)> = (0..3).flat_map(|r| (0..3).map(move |c| (c, r))).collect();
        let store = store_with(&coords);
        let lookup = store
            .build_lookup_grid(ImageSize::new(30, 30), Vector2::new(10.0, 10.0), 1.5)
            .expect("lookup");
        let policy = SamplingPolicy {
            major: 3,
            minor: 2,
            offsets: vec![1],
            min_points: 4,
            ..SamplingPolicy::default()
        };
        let views = SubImageSampler::new(policy)
            .sample(&store, &lookup, Vector2::new(5.0, 5.0))
            .expect("sample");
        assert!(!views.is_empty());
        assert!(views.iter().all(|v| v.len() >= 4));
    }

    #[test]
    fn zero_min_points_skips_empty_windows() {
        // One point inside the centre cross; outer offsets miss it.
        let store = store_with(&[(5, 5)]);
        let lookup = store
            .build_lookup_grid(ImageSize::new(130, 130), Vector2::new(10.0, 10.0), 1.5)
            .expect("lookup");
        let policy = SamplingPolicy {
            min_points: 0,
            ..SamplingPolicy::default()
        };
        let views = SubImageSampler::new(policy)
            .sample(&store, &lookup, Vector2::new(5.0, 5.0))
            .expect("sample");
        assert!(!views.is_empty());
        assert!(views.len() < 14);
        assert!(views.iter().all(|v| v.len() == 1));
    }

    #[test]
    fn sparse_grid_yields_no_views() {
        let store = store_with(&[(0, 0), (5, 5)]);
        let lookup = store
            .build_lookup_grid(ImageSize::new(100, 100), Vector2::new(10.0, 10.0), 1.5)
            .expect("lookup");
        let views = SubImageSampler::default()
            .sample(&store, &lookup, Vector2::new(5.0, 5.0))
            .expect("sample");
        assert!(views.is_empty());
    }
}
