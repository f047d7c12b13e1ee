//! Fixed-width compressed cube encoding.
//!
//! A cube is serialised as a stream of 4-bit instructions produced by a
//! depth-first walk: instructions `0..=5` step from the last placed point
//! to a face neighbour, and nibbles with the high bit set accumulate a
//! backwards jump (3 bits at a time) to an already placed point, from
//! which the next direction nibble continues. The blob is a single length
//! byte plus the instruction bytes, padded with `0x88` to a fixed width,
//! so equal cubes encode to bit-identical blobs.

use thiserror::Error;

use crate::cube::Cube;
use crate::point::{Point, FACE_DIRECTIONS, NUM_DIRECTIONS};

/// Total blob width in bytes, length byte included.
pub const ENC_BYTES: usize = 3 * std::mem::size_of::<u64>();

/// Maximum number of instruction bytes a blob can hold.
pub const MAX_DATA_BYTES: usize = ENC_BYTES - 1;

const FILL: u8 = 0x88;
const NO_JUMP: u32 = 0x8000_0000;

/// Errors from encoding a cube.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The point set is not face-connected. Valid cubes are always
    /// connected, so hitting this is a bug in the caller.
    #[error("point set is not face-connected")]
    Unconnected,

    /// The instruction stream does not fit the fixed width; the caller
    /// should fall back to storing raw points.
    #[error("encoding exceeds {MAX_DATA_BYTES} instruction bytes")]
    Overflow,
}

/// A cube in compressed nibble-stream form.
///
/// Equality and hashing compare the whole fixed-width blob, which is
/// well-defined because unused bytes carry a fixed fill pattern.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompressedCube {
    enc: [u8; ENC_BYTES],
}

struct NibbleWriter {
    enc: [u8; ENC_BYTES],
    len: usize,
    pending: Option<u8>,
    count: u32,
}

impl NibbleWriter {
    fn new() -> Self {
        Self {
            enc: [FILL; ENC_BYTES],
            len: 0,
            pending: None,
            count: 0,
        }
    }

    fn push(&mut self, inst: u8) -> Result<(), CodecError> {
        match self.pending.take() {
            None => self.pending = Some(inst & 0xf),
            Some(hi) => {
                if self.len >= MAX_DATA_BYTES {
                    return Err(CodecError::Overflow);
                }
                self.enc[1 + self.len] = (hi << 4) | (inst & 0xf);
                self.len += 1;
            }
        }
        self.count += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<[u8; ENC_BYTES], CodecError> {
        if self.count % 2 == 1 {
            // Pad with a dummy jump so the last real nibble lands on disk.
            self.push(0x8)?;
        }
        self.enc[0] = self.len as u8;
        Ok(self.enc)
    }
}

impl CompressedCube {
    /// Encodes a cube by walking its points.
    ///
    /// The walk starts at the first point of the sequence; decoding needs
    /// that same point back as its starting position.
    pub fn encode(cube: &Cube) -> Result<Self, CodecError> {
        let pts = cube.points();
        let mut writer = NibbleWriter::new();
        if pts.is_empty() {
            return Ok(Self {
                enc: writer.finish()?,
            });
        }

        let mut left: Vec<Point> = pts[1..].to_vec();
        let mut done: Vec<Point> = Vec::with_capacity(pts.len());
        done.push(pts[0]);
        let mut last = pts[0];

        while !left.is_empty() {
            // Prefer stepping straight to an unplaced neighbour.
            let step = (0..NUM_DIRECTIONS).find_map(|dir| {
                let next = last.step(dir);
                left.iter().position(|&p| p == next).map(|at| (dir, at))
            });
            if let Some((dir, at)) = step {
                let next = left.remove(at);
                done.push(next);
                last = next;
                writer.push(dir as u8)?;
                continue;
            }

            // Otherwise jump back to a placed point with an unplaced
            // neighbour and continue from there.
            match Self::find_jump(&left, &done) {
                Some((cand_at, dir, anchor_at)) => {
                    let cand = left.remove(cand_at);
                    let rev = done.len() - 1 - anchor_at;
                    done.push(cand);
                    last = cand;
                    Self::push_jump(&mut writer, rev)?;
                    writer.push((dir ^ 1) as u8)?;
                }
                None => return Err(CodecError::Unconnected),
            }
        }

        Ok(Self {
            enc: writer.finish()?,
        })
    }

    // Scans unplaced points for one face-adjacent to a placed point.
    // Returns (index into left, direction from candidate to anchor,
    // index of the anchor in the placed list).
    fn find_jump(left: &[Point], done: &[Point]) -> Option<(usize, usize, usize)> {
        for (cand_at, &cand) in left.iter().enumerate() {
            for dir in 0..NUM_DIRECTIONS {
                let anchor = cand.step(dir);
                if let Some(anchor_at) = done.iter().position(|&p| p == anchor) {
                    return Some((cand_at, dir, anchor_at));
                }
            }
        }
        None
    }

    // Emits a reverse index as 3-bit groups, most significant first.
    fn push_jump(writer: &mut NibbleWriter, rev: usize) -> Result<(), CodecError> {
        let mut groups = [0u8; 8];
        let mut count = 0;
        let mut rest = rev;
        loop {
            groups[count] = (rest & 0x7) as u8;
            count += 1;
            rest >>= 3;
            if rest == 0 {
                break;
            }
        }
        for i in (0..count).rev() {
            writer.push(0x8 | groups[i])?;
        }
        Ok(())
    }

    /// Decodes back into a sorted cube of `n` points.
    ///
    /// `start` must be the first point of the sequence the encoder was
    /// given; for canonical cubes that is the smallest point.
    pub fn decode(&self, n: usize, start: Point) -> Cube {
        let mut out = Vec::with_capacity(n);
        out.push(start);
        let mut last = start;
        let mut jump = NO_JUMP;

        'stream: for i in 0..self.len() * 2 {
            let byte = self.enc[1 + (i >> 1)];
            let inst = if i & 1 == 1 { byte & 0xf } else { byte >> 4 };
            if inst & 0x8 != 0 {
                // The sentinel bit shifts out on the first jump nibble.
                jump = (jump << 3) | (inst & 0x7) as u32;
            } else {
                if jump != NO_JUMP {
                    last = out[out.len() - 1 - jump as usize];
                    jump = NO_JUMP;
                }
                last = last.step(inst as usize);
                out.push(last);
                if out.len() == n {
                    break 'stream;
                }
            }
        }

        let mut cube = Cube::new(out);
        cube.sort();
        cube
    }

    /// Number of instruction bytes in the blob.
    pub fn len(&self) -> usize {
        self.enc[0] as usize
    }

    /// Whether the blob holds no instructions.
    pub fn is_empty(&self) -> bool {
        self.enc[0] == 0
    }

    /// The full fixed-width blob, length byte first.
    pub fn as_bytes(&self) -> &[u8; ENC_BYTES] {
        &self.enc
    }
}

impl std::fmt::Debug for CompressedCube {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CompressedCube(")?;
        for b in &self.enc[..1 + self.len()] {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// Sanity check: an encoded direction nibble must index the table.
const _: () = assert!(FACE_DIRECTIONS.len() == NUM_DIRECTIONS && NUM_DIRECTIONS <= 8);

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(pts: &[(i8, i8, i8)]) -> Cube {
        let mut c = Cube::from_points(pts.iter().map(|&(x, y, z)| Point::new(x, y, z)));
        c.sort();
        c
    }

    fn roundtrip(c: &Cube) -> Cube {
        let enc = CompressedCube::encode(c).expect("encodable");
        enc.decode(c.len(), c.points()[0])
    }

    #[test]
    fn test_straight_line_roundtrip() {
        let c = cube(&[(0, 0, 0), (0, 0, 1), (0, 0, 2), (0, 0, 3)]);
        assert_eq!(roundtrip(&c), c);
        // Three steps in +z pack into two bytes with padding.
        let enc = CompressedCube::encode(&c).unwrap();
        assert_eq!(enc.len(), 2);
    }

    #[test]
    fn test_bent_and_planar_roundtrips() {
        for pts in [
            vec![(0, 0, 0), (0, 0, 1), (0, 1, 1)],
            vec![(0, 0, 0), (0, 1, 0), (0, 1, 1), (0, 2, 1)],
            vec![(0, 0, 0), (0, 0, 1), (0, 0, 2), (0, 1, 1)],
            vec![(0, 0, 0), (0, 0, 1), (0, 1, 1), (1, 1, 1)],
        ] {
            let c = cube(&pts);
            assert_eq!(roundtrip(&c), c, "roundtrip failed for {c:?}");
        }
    }

    #[test]
    fn test_branching_walk_requires_jump() {
        // A plus-sign: the walk dead-ends and must jump back to the hub.
        let c = cube(&[(0, 1, 1), (0, 0, 1), (0, 2, 1), (0, 1, 0), (0, 1, 2)]);
        assert_eq!(roundtrip(&c), c);
    }

    #[test]
    fn test_unconnected_is_an_error() {
        let c = cube(&[(0, 0, 0), (0, 0, 2)]);
        assert_eq!(CompressedCube::encode(&c), Err(CodecError::Unconnected));
    }

    #[test]
    fn test_equal_cubes_encode_identically() {
        let a = cube(&[(0, 0, 0), (0, 0, 1), (0, 1, 1)]);
        let b = cube(&[(0, 1, 1), (0, 0, 0), (0, 0, 1)]);
        assert_eq!(
            CompressedCube::encode(&a).unwrap(),
            CompressedCube::encode(&b).unwrap()
        );
    }

    #[test]
    fn test_single_point() {
        let c = cube(&[(0, 0, 0)]);
        let enc = CompressedCube::encode(&c).unwrap();
        assert!(enc.is_empty());
        assert_eq!(enc.decode(1, Point::new(0, 0, 0)), c);
    }
}
