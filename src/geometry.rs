//! Point and bounding-box types shared by every node kind.

use serde::{Deserialize, Serialize};

/// Opaque 12-byte point identifier. Equality and ordering of [`Point`] is
/// defined purely in terms of this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointId(pub [u8; 12]);

impl PointId {
    pub const fn from_u64(lo: u64) -> Self {
        let b = lo.to_le_bytes();
        PointId([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], 0, 0, 0, 0,
        ])
    }
}

/// A stored point: spatial coordinates, a scalar timestamp, and an opaque
/// identifier. Equality is identifier equality, not coordinate equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub coords: Vec<f32>,
    pub timestamp: f64,
    pub id: PointId,
}

impl Point {
    pub fn new(coords: Vec<f32>, timestamp: f64, id: PointId) -> Self {
        Point {
            coords,
            timestamp,
            id,
        }
    }
}

impl Eq for Point {}

/// Axis-aligned bounding box in the same space as the stored points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub lo: Vec<f32>,
    pub hi: Vec<f32>,
}

impl BBox {
    /// The empty box over `dim` dimensions: `lo > hi` in every coordinate so
    /// that expanding it with the first point/box produces a tight bound.
    pub fn empty(dim: usize) -> Self {
        BBox {
            lo: vec![f32::INFINITY; dim],
            hi: vec![f32::NEG_INFINITY; dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.lo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lo.iter().zip(&self.hi).any(|(l, h)| l > h)
    }

    pub fn contains(&self, p: &Point) -> bool {
        debug_assert_eq!(self.dim(), p.coords.len());
        self.lo
            .iter()
            .zip(&self.hi)
            .zip(&p.coords)
            .all(|((l, h), c)| *l <= *c && *c <= *h)
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        debug_assert_eq!(self.dim(), other.dim());
        self.lo
            .iter()
            .zip(&self.hi)
            .zip(other.lo.iter().zip(&other.hi))
            .all(|((l1, h1), (l2, h2))| *l1 <= *h2 && *l2 <= *h1)
    }

    /// True if `self` lies entirely within `other`.
    pub fn covered_by(&self, other: &BBox) -> bool {
        debug_assert_eq!(self.dim(), other.dim());
        self.lo
            .iter()
            .zip(&self.hi)
            .zip(other.lo.iter().zip(&other.hi))
            .all(|((l1, h1), (l2, h2))| *l1 >= *l2 && *h1 <= *h2)
    }

    pub fn expand_point(&mut self, p: &Point) {
        for ((l, h), c) in self.lo.iter_mut().zip(&mut self.hi).zip(&p.coords) {
            if *c < *l {
                *l = *c;
            }
            if *c > *h {
                *h = *c;
            }
        }
    }

    pub fn expand_box(&mut self, other: &BBox) {
        for ((l, h), (ol, oh)) in self
            .lo
            .iter_mut()
            .zip(&mut self.hi)
            .zip(other.lo.iter().zip(&other.hi))
        {
            if *ol < *l {
                *l = *ol;
            }
            if *oh > *h {
                *h = *oh;
            }
        }
    }

    pub fn of_point(p: &Point) -> Self {
        BBox {
            lo: p.coords.clone(),
            hi: p.coords.clone(),
        }
    }

    /// Minimum bounding box of a non-empty slice of boxes.
    pub fn union_all<'a>(mut boxes: impl Iterator<Item = &'a BBox>) -> Self {
        let first = boxes.next().expect("union_all requires at least one box");
        let mut acc = first.clone();
        for b in boxes {
            acc.expand_box(b);
        }
        acc
    }

    /// Fixed serialized width for `dim` dimensions: two `f32` per dimension.
    pub fn serialized_size(dim: usize) -> usize {
        dim * 2 * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(c: &[f32]) -> Point {
        Point::new(c.to_vec(), 0.0, PointId::from_u64(0))
    }

    #[test]
    fn contains_and_intersects() {
        let q = BBox {
            lo: vec![0.0, 0.0],
            hi: vec![1.0, 1.0],
        };
        assert!(q.contains(&pt(&[0.5, 0.5])));
        assert!(!q.contains(&pt(&[1.5, 0.5])));

        let other = BBox {
            lo: vec![0.5, -1.0],
            hi: vec![2.0, 0.5],
        };
        assert!(q.intersects(&other));
        let disjoint = BBox {
            lo: vec![5.0, 5.0],
            hi: vec![6.0, 6.0],
        };
        assert!(!q.intersects(&disjoint));
    }

    #[test]
    fn covered_by() {
        let inner = BBox {
            lo: vec![0.2, 0.2],
            hi: vec![0.8, 0.8],
        };
        let outer = BBox {
            lo: vec![0.0, 0.0],
            hi: vec![1.0, 1.0],
        };
        assert!(inner.covered_by(&outer));
        assert!(!outer.covered_by(&inner));
    }

    #[test]
    fn expand_from_empty() {
        let mut b = BBox::empty(2);
        b.expand_point(&pt(&[1.0, -2.0]));
        b.expand_point(&pt(&[-1.0, 5.0]));
        assert_eq!(b.lo, vec![-1.0, -2.0]);
        assert_eq!(b.hi, vec![1.0, 5.0]);
    }
}
