//! Fixed, versioned, little-endian wire types for join-mesh exchanges.

use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

use crate::join::vertex::JoinVertex;
use crate::mesh_error::MeshJoinError;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Message kinds carried in [`WireHdr::kind`].
pub const KIND_FACE_REQUEST: u16 = 1;
pub const KIND_FACES: u16 = 2;
pub const KIND_VERTICES: u16 = 3;

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), MeshJoinError> {
    if actual == expected {
        Ok(())
    } else {
        Err(MeshJoinError::WireError(format!(
            "expected {expected} bytes, got {actual}"
        )))
    }
}

/// Narrow a count to its 32-bit wire field.
pub fn wire_count(n: usize) -> Result<u32, MeshJoinError> {
    u32::try_from(n)
        .map_err(|_| MeshJoinError::WireError(format!("count {n} does not fit a 32-bit wire field")))
}

/// Append `items` to `out` as raw little-endian records.
pub fn write_records<T: Pod>(out: &mut Vec<u8>, items: &[T]) {
    out.extend_from_slice(bytemuck::cast_slice(items));
}

/// Read `n` records of `T` from the front of `bytes` and return the rest.
///
/// Received buffers carry no alignment guarantee, so records are copied out.
pub fn read_records<T: Pod>(bytes: &[u8], n: usize) -> Result<(Vec<T>, &[u8]), MeshJoinError> {
    let size = size_of::<T>();
    let need = n
        .checked_mul(size)
        .ok_or_else(|| MeshJoinError::WireError(format!("record count {n} overflows")))?;
    if bytes.len() < need {
        return Err(MeshJoinError::WireError(format!(
            "need {need} bytes for {n} records, only {} left",
            bytes.len()
        )));
    }
    let (head, tail) = bytes.split_at(need);
    let out = head
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned::<T>)
        .collect();
    Ok((out, tail))
}

/// Read a header and check version and kind.
pub fn read_header(bytes: &[u8], kind: u16) -> Result<&[u8], MeshJoinError> {
    let (hdr, rest) = read_records::<WireHdr>(bytes, 1)?;
    let hdr = hdr[0];
    if hdr.version() != WIRE_VERSION {
        return Err(MeshJoinError::WireError(format!(
            "wire version {} (expected {WIRE_VERSION})",
            hdr.version()
        )));
    }
    if hdr.kind() != kind {
        return Err(MeshJoinError::WireError(format!(
            "message kind {} (expected {kind})",
            hdr.kind()
        )));
    }
    Ok(rest)
}

// ===== Common records ======================================================

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub reserved_le: u32, // keep zero
}

impl WireHdr {
    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Result<Self, MeshJoinError> {
        Ok(Self {
            n_le: wire_count(n)?.to_le(),
        })
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// A global number carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireGnum {
    pub gnum_le: u64,
}

impl WireGnum {
    pub fn of(gnum: u64) -> Self {
        Self {
            gnum_le: gnum.to_le(),
        }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.gnum_le)
    }
}

// ===== Face exchange =======================================================

/// Face header: its global number and how many vertex records follow.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireFace {
    pub gnum_le: u64,
    pub n_vtx_le: u32,
    pub _pad: u32,
}

impl WireFace {
    pub fn new(gnum: u64, n_vtx: usize) -> Result<Self, MeshJoinError> {
        Ok(Self {
            gnum_le: gnum.to_le(),
            n_vtx_le: wire_count(n_vtx)?.to_le(),
            _pad: 0,
        })
    }
    pub fn gnum(&self) -> u64 {
        u64::from_le(self.gnum_le)
    }
    pub fn n_vtx(&self) -> usize {
        u32::from_le(self.n_vtx_le) as usize
    }
}

/// Full vertex record; floats travel as their IEEE bit patterns.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireVertex {
    pub gnum_le: u64,
    pub tolerance_le: u64,
    pub coord_le: [u64; 3],
}

impl WireVertex {
    pub fn of(v: &JoinVertex) -> Self {
        Self {
            gnum_le: v.gnum.to_le(),
            tolerance_le: v.tolerance.to_bits().to_le(),
            coord_le: v.coord.map(|c| c.to_bits().to_le()),
        }
    }
    pub fn get(&self) -> JoinVertex {
        JoinVertex {
            gnum: u64::from_le(self.gnum_le),
            tolerance: f64::from_bits(u64::from_le(self.tolerance_le)),
            coord: self.coord_le.map(|c| f64::from_bits(u64::from_le(c))),
        }
    }
}

/// Encode a counted list of vertex records.
pub fn encode_vertices(vertices: &[JoinVertex]) -> Result<Vec<u8>, MeshJoinError> {
    let mut out = Vec::with_capacity(
        size_of::<WireHdr>() + size_of::<WireCount>() + vertices.len() * size_of::<WireVertex>(),
    );
    write_records(&mut out, &[WireHdr::new(KIND_VERTICES)]);
    write_records(&mut out, &[WireCount::new(vertices.len())?]);
    let recs: Vec<WireVertex> = vertices.iter().map(WireVertex::of).collect();
    write_records(&mut out, &recs);
    Ok(out)
}

/// Decode a buffer produced by [`encode_vertices`].
pub fn decode_vertices(bytes: &[u8]) -> Result<Vec<JoinVertex>, MeshJoinError> {
    let rest = read_header(bytes, KIND_VERTICES)?;
    let (cnt, rest) = read_records::<WireCount>(rest, 1)?;
    let (recs, rest) = read_records::<WireVertex>(rest, cnt[0].get())?;
    expect_exact_len(rest.len(), 0)?;
    Ok(recs.iter().map(WireVertex::get).collect())
}

// ===== Compile-time sanity checks =========================================

const _: () = {
    assert!(size_of::<WireHdr>() == 8);
    assert!(size_of::<WireCount>() == 4);
    assert!(size_of::<WireGnum>() == 8);
    assert!(size_of::<WireFace>() == 16);
    assert!(size_of::<WireVertex>() == 40);
    assert!(align_of::<WireVertex>() == 8);
};


#[cfg(test)]
mod abi_tests {
    use super::*;
    use static_assertions::{assert_eq_align, assert_eq_size};

    #[test]
    fn gnum_record_matches_u64() {
        assert_eq_size!(WireGnum, u64);
        assert_eq_align!(WireGnum, u64);
    }

    #[test]
    fn vertex_record_is_five_words() {
        assert_eq_size!(WireVertex, [u64; 5]);
    }
}
