//! Fixed-width encode/decode for everything that lives in a block.
//!
//! Every serialized type has a fixed byte width (`serialization_size`,
//! mirroring `StaticSize::static_size()` in the teacher's data-management
//! layer). Arrays are encoded as a `u16` length prefix followed by
//! fixed-width elements, so a block always bounds the number of items by
//! `(block_capacity - 2) / element_width` (spec §4.2).

use crate::error::{Error, Result};
use crate::geometry::{BBox, Point, PointId};
use crate::hilbert::Key;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

/// A type with a fixed, context-independent-per-index serialized width.
pub trait FixedWidth {
    /// Byte width of one encoded instance, given the index's dimension and
    /// Hilbert key word count.
    fn serialized_size(dim: usize, hilbert_words: usize) -> usize;
}

pub fn write_point<W: Write>(w: &mut W, p: &Point) -> Result<()> {
    for c in &p.coords {
        w.write_f32::<LittleEndian>(*c)?;
    }
    w.write_f64::<LittleEndian>(p.timestamp)?;
    w.write_all(&p.id.0)?;
    Ok(())
}

pub fn read_point<R: Read>(r: &mut R, dim: usize) -> Result<Point> {
    let mut coords = Vec::with_capacity(dim);
    for _ in 0..dim {
        coords.push(r.read_f32::<LittleEndian>()?);
    }
    let timestamp = r.read_f64::<LittleEndian>()?;
    let mut id = [0u8; 12];
    r.read_exact(&mut id)?;
    Ok(Point {
        coords,
        timestamp,
        id: PointId(id),
    })
}

pub fn point_size(dim: usize) -> usize {
    dim * 4 + 8 + 12
}

pub fn write_bbox<W: Write>(w: &mut W, b: &BBox) -> Result<()> {
    for v in &b.lo {
        w.write_f32::<LittleEndian>(*v)?;
    }
    for v in &b.hi {
        w.write_f32::<LittleEndian>(*v)?;
    }
    Ok(())
}

pub fn read_bbox<R: Read>(r: &mut R, dim: usize) -> Result<BBox> {
    let mut lo = Vec::with_capacity(dim);
    for _ in 0..dim {
        lo.push(r.read_f32::<LittleEndian>()?);
    }
    let mut hi = Vec::with_capacity(dim);
    for _ in 0..dim {
        hi.push(r.read_f32::<LittleEndian>()?);
    }
    Ok(BBox { lo, hi })
}

pub fn write_key<W: Write>(w: &mut W, k: &Key) -> Result<()> {
    for word in &k.0 {
        w.write_u32::<LittleEndian>(*word)?;
    }
    Ok(())
}

pub fn read_key<R: Read>(r: &mut R, words: usize) -> Result<Key> {
    let mut v = Vec::with_capacity(words);
    for _ in 0..words {
        v.push(r.read_u32::<LittleEndian>()?);
    }
    Ok(Key(v))
}

/// Encode a length-prefixed array of fixed-width elements. Fails loudly
/// (`Error::Corrupted`) rather than silently truncating if `items` would not
/// fit in `capacity` bytes, and if the count would overflow the `u16` prefix.
pub fn write_array<W: Write>(
    w: &mut W,
    count: usize,
    capacity: usize,
    element_width: usize,
    mut write_one: impl FnMut(&mut W, usize) -> Result<()>,
) -> Result<()> {
    if count > u16::MAX as usize {
        return Err(Error::Corrupted(format!(
            "array length {count} exceeds u16 length prefix"
        )));
    }
    let needed = 2 + count * element_width;
    if needed > capacity {
        return Err(Error::Corrupted(format!(
            "array of {count} elements ({needed} bytes) exceeds block capacity {capacity}"
        )));
    }
    w.write_u16::<LittleEndian>(count as u16)?;
    for i in 0..count {
        write_one(w, i)?;
    }
    Ok(())
}

/// Decode a length-prefixed array header, validating the count against
/// `capacity` before the caller reads any elements.
pub fn read_array_len<R: Read>(r: &mut R, capacity: usize, element_width: usize) -> Result<usize> {
    let count = r.read_u16::<LittleEndian>()? as usize;
    let needed = 2 + count * element_width;
    if needed > capacity {
        return Err(Error::Corrupted(format!(
            "array length prefix {count} implies {needed} bytes, exceeding block capacity {capacity}"
        )));
    }
    Ok(count)
}

/// Maximum number of fixed-width elements that fit in a length-prefixed
/// array within `capacity` bytes (spec §4.2).
pub fn max_array_len(capacity: usize, element_width: usize) -> usize {
    capacity.saturating_sub(2) / element_width.max(1)
}

/// A fixed-size byte buffer with a cursor, used for reading/writing block
/// contents at fixed offsets without ever touching dynamic lengths.
pub struct BlockCursor<'a> {
    inner: Cursor<&'a mut [u8]>,
}

impl<'a> BlockCursor<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        BlockCursor {
            inner: Cursor::new(buf),
        }
    }

    pub fn seek_to(&mut self, offset: u64) {
        self.inner.set_position(offset);
    }

    pub fn position(&self) -> u64 {
        self.inner.position()
    }
}

impl<'a> Read for BlockCursor<'a> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<'a> Write for BlockCursor<'a> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_round_trip() {
        let p = Point::new(vec![1.0, -2.5, 3.0], 42.0, PointId::from_u64(7));
        let mut buf = vec![0u8; point_size(3)];
        {
            let mut c = BlockCursor::new(&mut buf);
            write_point(&mut c, &p).unwrap();
        }
        let mut c = BlockCursor::new(&mut buf);
        let p2 = read_point(&mut c, 3).unwrap();
        assert_eq!(p, p2);
    }

    #[test]
    fn array_overflow_is_corrupted_not_truncated() {
        let mut buf = vec![0u8; 10];
        let mut c = BlockCursor::new(&mut buf);
        let res = write_array(&mut c, 100, 10, 4, |_, _| Ok(()));
        assert!(matches!(res, Err(Error::Corrupted(_))));
    }

    #[test]
    fn max_array_len_matches_budget() {
        assert_eq!(max_array_len(8192, 40), (8192 - 2) / 40);
    }
}
