//! The cache file format.
//!
//! A cache file is one header, a shape table, then the point records of
//! every cube grouped by shape. All integers are little-endian and the
//! struct layouts are fixed width, so files are byte-identical across
//! platforms. Points are stored as 3 bytes each; the in-memory 4-byte
//! packing never reaches disk.

use bytes::{Buf, BufMut, BytesMut};

use polycube_core::Shape;

use crate::StoreError;

/// File magic, "PCUB".
pub const MAGIC: u32 = 0x4255_4350;

/// Header width in bytes, padding included.
pub const HEADER_BYTES: usize = 24;

/// Shape table entry width in bytes, padding included.
pub const SHAPE_ENTRY_BYTES: usize = 24;

/// Cache file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Cube size of the level stored in this file.
    pub n: u32,
    /// Number of shape table entries following the header.
    pub num_shapes: u32,
    /// Total number of cubes in the payload.
    pub num_polycubes: u64,
}

impl Header {
    /// Serialises the header, magic and padding included.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(MAGIC);
        buf.put_u32_le(self.n);
        buf.put_u32_le(self.num_shapes);
        buf.put_u32_le(0);
        buf.put_u64_le(self.num_polycubes);
    }

    /// Parses and validates a header.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() < HEADER_BYTES {
            return Err(StoreError::Corrupt(format!(
                "header needs {HEADER_BYTES} bytes, file has {}",
                bytes.len()
            )));
        }
        if bytes.get_u32_le() != MAGIC {
            return Err(StoreError::BadMagic);
        }
        let n = bytes.get_u32_le();
        let num_shapes = bytes.get_u32_le();
        let _reserved = bytes.get_u32_le();
        let num_polycubes = bytes.get_u64_le();
        Ok(Self {
            n,
            num_shapes,
            num_polycubes,
        })
    }
}

/// One shape table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeEntry {
    /// The canonical shape, stored unbiased.
    pub shape: Shape,
    /// Absolute byte offset of this shape's payload.
    pub offset: u64,
    /// Payload length in bytes, a multiple of `n * 3`.
    pub size: u64,
}

impl ShapeEntry {
    /// Serialises the entry, padding included.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.shape.x);
        buf.put_u8(self.shape.y);
        buf.put_u8(self.shape.z);
        buf.put_u8(0);
        buf.put_u32_le(0);
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.size);
    }

    /// Parses one entry.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() < SHAPE_ENTRY_BYTES {
            return Err(StoreError::Corrupt(format!(
                "shape entry needs {SHAPE_ENTRY_BYTES} bytes, {} left",
                bytes.len()
            )));
        }
        let x = bytes.get_u8();
        let y = bytes.get_u8();
        let z = bytes.get_u8();
        let _reserved = bytes.get_u8();
        let _padding = bytes.get_u32_le();
        let offset = bytes.get_u64_le();
        let size = bytes.get_u64_le();
        Ok(Self {
            shape: Shape::new(x, y, z),
            offset,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = Header {
            n: 7,
            num_shapes: 3,
            num_polycubes: 1023,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_BYTES);
        assert_eq!(&buf[0..4], &[0x50, 0x43, 0x55, 0x42]);
        assert_eq!(&buf[4..8], &[7, 0, 0, 0]);
        assert_eq!(Header::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = BytesMut::new();
        Header {
            n: 4,
            num_shapes: 1,
            num_polycubes: 8,
        }
        .encode(&mut buf);
        buf[0] ^= 0xff;
        assert!(matches!(
            Header::decode(&buf),
            Err(StoreError::BadMagic)
        ));
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(matches!(
            Header::decode(&[0u8; 10]),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_shape_entry_roundtrip() {
        let entry = ShapeEntry {
            shape: Shape::new(1, 2, 3),
            offset: 0x1122_3344_5566,
            size: 9 * 3 * 7,
        };
        let mut buf = BytesMut::new();
        entry.encode(&mut buf);
        assert_eq!(buf.len(), SHAPE_ENTRY_BYTES);
        assert_eq!(ShapeEntry::decode(&buf).unwrap(), entry);
    }
}
