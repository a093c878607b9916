//! The Hilbert linearization of a point's coordinates into a totally
//! ordered key. The actual curve computation is treated as an opaque,
//! pure external collaborator (spec §1, §3) — this module only fixes the
//! `Key` type and the [`HilbertComputer`] capability trait it is produced
//! by. Crates embedding this index are expected to supply a real
//! space-filling-curve implementation; [`DefaultHilbertComputer`] is a
//! minimal Morton (bit-interleaved) linearization good enough for tests and
//! small demos, not a true Hilbert curve.

use crate::geometry::Point;
use serde::{Deserialize, Serialize};

/// A fixed-width integer tuple, totally ordered lexicographically. `Vec<u32>`
/// already orders lexicographically, so `Key` derives `Ord` directly from it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(pub Vec<u32>);

impl Key {
    pub fn min(words: usize) -> Self {
        Key(vec![0; words])
    }

    pub fn max(words: usize) -> Self {
        Key(vec![u32::MAX; words])
    }

    pub fn words(&self) -> usize {
        self.0.len()
    }

    pub fn serialized_size(words: usize) -> usize {
        words * 4
    }
}

/// Capability that linearizes a point's coordinates into a [`Key`].
/// `H = ceil(coord_bits / lookup_width)`, independent of the coordinate's own
/// integer width (spec §9, "Hilbert tuple bit-width" open question).
pub trait HilbertComputer: Send + Sync {
    /// Number of `u32` words produced per key.
    fn words(&self) -> usize;

    fn compute(&self, point: &Point) -> Key;
}

/// Bit-interleaved (Morton-order) linearization. Coordinates are mapped into
/// `[0, 2^16)` by a fixed affine transform over `domain`, then interleaved.
/// Placeholder for the real Hilbert computer this index is built against.
pub struct DefaultHilbertComputer {
    domain: Vec<(f32, f32)>,
    words: usize,
}

impl DefaultHilbertComputer {
    pub fn new(domain: Vec<(f32, f32)>) -> Self {
        let dim = domain.len();
        // 16 bits per coordinate interleaved across `dim` dimensions.
        let total_bits = dim * 16;
        let words = (total_bits + 31) / 32;
        DefaultHilbertComputer { domain, words }
    }

    fn quantize(&self, coords: &[f32]) -> Vec<u32> {
        coords
            .iter()
            .zip(&self.domain)
            .map(|(c, (lo, hi))| {
                let span = (hi - lo).max(f32::EPSILON);
                let frac = ((c - lo) / span).clamp(0.0, 1.0);
                (frac * ((1u32 << 16) - 1) as f32) as u32
            })
            .collect()
    }
}

impl HilbertComputer for DefaultHilbertComputer {
    fn words(&self) -> usize {
        self.words
    }

    fn compute(&self, point: &Point) -> Key {
        let q = self.quantize(&point.coords);
        let dim = q.len();
        let total_bits = dim * 16;
        let mut bits = vec![0u8; total_bits];
        for (d, value) in q.iter().enumerate() {
            for b in 0..16 {
                let bit = (value >> b) & 1;
                bits[b * dim + d] = bit as u8;
            }
        }
        let mut words = vec![0u32; self.words];
        for (i, bit) in bits.iter().enumerate() {
            if *bit != 0 {
                let word = i / 32;
                let offset = 31 - (i % 32);
                words[word] |= 1 << offset;
            }
        }
        Key(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PointId;

    #[test]
    fn keys_order_lexicographically() {
        let a = Key(vec![1, 5]);
        let b = Key(vec![1, 6]);
        let c = Key(vec![2, 0]);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn nearby_points_get_nearby_keys_roughly() {
        let comp = DefaultHilbertComputer::new(vec![(0.0, 1.0), (0.0, 1.0)]);
        let p1 = Point::new(vec![0.1, 0.1], 0.0, PointId::from_u64(1));
        let p2 = Point::new(vec![0.9, 0.9], 0.0, PointId::from_u64(2));
        assert!(comp.compute(&p1) < comp.compute(&p2));
    }

    #[test]
    fn sentinels_bound_every_key() {
        let comp = DefaultHilbertComputer::new(vec![(0.0, 1.0), (0.0, 1.0)]);
        let p = Point::new(vec![0.5, 0.5], 0.0, PointId::from_u64(3));
        let k = comp.compute(&p);
        assert!(Key::min(comp.words()) <= k);
        assert!(k <= Key::max(comp.words()));
    }
}
