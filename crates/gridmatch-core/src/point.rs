//! Image-space points and the two lexicographic orderings used to walk them.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Rejected input coordinate.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum PointError {
    #[error("point {index} has a non-finite coordinate ({x}, {y})")]
    NonFinite { index: usize, x: f32, y: f32 },
}

/// A detected feature location in image pixel space.
///
/// Coordinates are guaranteed finite, which makes the orderings below total.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f32; 2]", into = "[f32; 2]")]
pub struct ImagePoint {
    position: Point2<f32>,
}

impl ImagePoint {
    /// Build a point, rejecting NaN and infinite coordinates.
    pub fn new(x: f32, y: f32) -> Result<Self, PointError> {
        Self::at_index(0, x, y)
    }

    fn at_index(index: usize, x: f32, y: f32) -> Result<Self, PointError> {
        if x.is_finite() && y.is_finite() {
            // `+ 0.0` folds -0.0 into 0.0 so `total_cmp` agrees with `==`.
            Ok(Self {
                position: Point2::new(x + 0.0, y + 0.0),
            })
        } else {
            Err(PointError::NonFinite { index, x, y })
        }
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.position.x
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.position.y
    }

    #[inline]
    pub fn position(&self) -> Point2<f32> {
        self.position
    }

    /// `self - other` as a plain vector.
    #[inline]
    pub fn delta(&self, other: &ImagePoint) -> nalgebra::Vector2<f32> {
        self.position - other.position
    }
}

impl TryFrom<[f32; 2]> for ImagePoint {
    type Error = PointError;

    fn try_from(value: [f32; 2]) -> Result<Self, Self::Error> {
        ImagePoint::new(value[0], value[1])
    }
}

impl From<ImagePoint> for [f32; 2] {
    fn from(p: ImagePoint) -> Self {
        [p.x(), p.y()]
    }
}

/// Validate raw `(x, y)` pairs, reporting the first offending index.
pub fn validate_points(raw: &[[f32; 2]]) -> Result<Vec<ImagePoint>, PointError> {
    raw.iter()
        .enumerate()
        .map(|(index, &[x, y])| ImagePoint::at_index(index, x, y))
        .collect()
}

/// Primary axis of a lexicographic point ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointOrder {
    /// Compare by `x`, then by `y`.
    XY,
    /// Compare by `y`, then by `x`.
    YX,
}

impl PointOrder {
    /// Strict total order on `(primary, secondary)`.
    #[inline]
    pub fn compare(self, lhs: &ImagePoint, rhs: &ImagePoint) -> Ordering {
        let (a, b) = match self {
            PointOrder::XY => ((lhs.x(), lhs.y()), (rhs.x(), rhs.y())),
            PointOrder::YX => ((lhs.y(), lhs.x()), (rhs.y(), rhs.x())),
        };
        a.0.total_cmp(&b.0).then_with(|| a.1.total_cmp(&b.1))
    }

    /// Coordinate along the primary axis.
    #[inline]
    pub fn primary(self, p: &ImagePoint) -> f32 {
        match self {
            PointOrder::XY => p.x(),
            PointOrder::YX => p.y(),
        }
    }

    /// Coordinate along the secondary axis.
    #[inline]
    pub fn secondary(self, p: &ImagePoint) -> f32 {
        match self {
            PointOrder::XY => p.y(),
            PointOrder::YX => p.x(),
        }
    }
}

/// Return a copy of `points` sorted under `order` (stable).
pub fn sort_points(points: &[ImagePoint], order: PointOrder) -> Vec<ImagePoint> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| order.compare(a, b));
    sorted
}

/// Set key ordering points row-major (`YX`), used for image-point membership.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct YxKey(pub ImagePoint);

impl Eq for YxKey {}

impl PartialOrd for YxKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for YxKey {
    fn cmp(&self, other: &Self) -> Ordering {
        PointOrder::YX.compare(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f32, y: f32) -> ImagePoint {
        ImagePoint::new(x, y).expect("finite")
    }

    #[test]
    fn rejects_non_finite_coordinates() {
        assert!(ImagePoint::new(f32::NAN, 1.0).is_err());
        assert!(ImagePoint::new(1.0, f32::INFINITY).is_err());

        let err = validate_points(&[[0.0, 0.0], [1.0, 2.0], [f32::NAN, 3.0]]).unwrap_err();
        assert!(matches!(err, PointError::NonFinite { index: 2, .. }));
    }

    #[test]
    fn exactly_one_direction_holds_for_distinct_points() {
        let pts = [p(0.0, 0.0), p(0.0, 1.0), p(1.0, 0.0), p(0.5, 0.5), p(-3.0, 7.25)];
        for order in [PointOrder::XY, PointOrder::YX] {
            for a in &pts {
                for b in &pts {
                    let ab = order.compare(a, b) == Ordering::Less;
                    let ba = order.compare(b, a) == Ordering::Less;
                    if a == b {
                        assert!(!ab && !ba);
                    } else {
                        assert!(ab ^ ba, "{order:?} {a:?} {b:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn orders_by_primary_then_secondary() {
        let a = p(1.0, 5.0);
        let b = p(2.0, 0.0);
        assert_eq!(PointOrder::XY.compare(&a, &b), Ordering::Less);
        assert_eq!(PointOrder::YX.compare(&a, &b), Ordering::Greater);

        let c = p(1.0, 4.0);
        assert_eq!(PointOrder::XY.compare(&c, &a), Ordering::Less);
    }

    #[test]
    fn sorting_is_idempotent() {
        let pts = vec![p(3.0, 1.0), p(1.0, 2.0), p(1.0, 1.0), p(2.0, 9.0), p(0.0, 3.0)];
        for order in [PointOrder::XY, PointOrder::YX] {
            let once = sort_points(&pts, order);
            let twice = sort_points(&once, order);
            assert_eq!(once, twice);
        }
        let xy = sort_points(&pts, PointOrder::XY);
        assert_eq!(xy[0], p(0.0, 3.0));
        assert_eq!(xy[1], p(1.0, 1.0));
        assert_eq!(xy[2], p(1.0, 2.0));
    }

    #[test]
    fn yx_key_deduplicates_in_btree_set() {
        let mut set = std::collections::BTreeSet::new();
        assert!(set.insert(YxKey(p(1.0, 2.0))));
        assert!(!set.insert(YxKey(p(1.0, 2.0))));
        assert!(set.insert(YxKey(p(2.0, 1.0))));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn signed_zero_is_one_location() {
        let neg = p(-0.0, 1.0);
        let pos = p(0.0, 1.0);
        assert!(neg.x().is_sign_positive());
        for order in [PointOrder::XY, PointOrder::YX] {
            assert_eq!(order.compare(&neg, &pos), Ordering::Equal);
        }
        let mut set = std::collections::BTreeSet::new();
        assert!(set.insert(YxKey(pos)));
        assert!(!set.insert(YxKey(neg)));
    }

    #[test]
    fn serializes_as_pair() {
        let json = serde_json::to_string(&p(1.5, -2.0)).expect("serialize");
        assert_eq!(json, "[1.5,-2.0]");
        let back: ImagePoint = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, p(1.5, -2.0));
    }
}
