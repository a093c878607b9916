//! Fixed-width encode/decode of [`NodeEntry`] (spec §6). Only entries whose
//! locator is a block id can ever be serialized — an `Owned` in-memory
//! locator has no disk representation and indicates a programming error if
//! it reaches this codec.

use super::entry::{Locator, NodeEntry, NodeKind};
use crate::error::{Error, Result};
use crate::serialization::{read_bbox, read_key, write_bbox, write_key};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

pub fn write_entry<W: Write>(w: &mut W, entry: &NodeEntry) -> Result<()> {
    let bid = match &entry.locator {
        Locator::Block(bid) => *bid,
        Locator::Owned(_) => {
            return Err(Error::Corrupted(
                "attempted to serialize an in-memory-owned node entry".into(),
            ))
        }
    };
    w.write_u8(entry.kind as u8)?;
    w.write_u64::<LittleEndian>(entry.subtree_size)?;
    write_bbox(w, &entry.bbox)?;
    w.write_u64::<LittleEndian>(bid)?;
    write_key(w, &entry.min_key)?;
    Ok(())
}

pub fn read_entry<R: Read>(r: &mut R, dim: usize, hilbert_words: usize) -> Result<NodeEntry> {
    let kind_byte = r.read_u8()?;
    let kind = NodeKind::from_u8(kind_byte)
        .ok_or_else(|| Error::Corrupted(format!("unknown node kind byte {kind_byte}")))?;
    let subtree_size = r.read_u64::<LittleEndian>()?;
    let bbox = read_bbox(r, dim)?;
    let bid = r.read_u64::<LittleEndian>()?;
    let min_key = read_key(r, hilbert_words)?;
    Ok(NodeEntry {
        kind,
        bbox,
        subtree_size,
        min_key,
        locator: Locator::Block(bid),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;
    use crate::hilbert::Key;

    #[test]
    fn entry_round_trip() {
        let entry = NodeEntry::on_disk(
            NodeKind::IoLeaf,
            BBox {
                lo: vec![0.0, 0.0],
                hi: vec![1.0, 1.0],
            },
            42,
            Key(vec![1, 2]),
            7,
        );
        let mut buf = vec![0u8; NodeEntry::serialized_size(2, 2)];
        write_entry(&mut buf.as_mut_slice(), &entry).unwrap();
        let decoded = read_entry(&mut buf.as_slice(), 2, 2).unwrap();
        assert_eq!(decoded.kind, entry.kind);
        assert_eq!(decoded.subtree_size, entry.subtree_size);
        assert_eq!(decoded.bbox, entry.bbox);
        assert_eq!(decoded.min_key, entry.min_key);
        match decoded.locator {
            Locator::Block(b) => assert_eq!(b, 7),
            _ => panic!("expected block locator"),
        }
    }
}
