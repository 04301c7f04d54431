//! Cross-rank reconciliation of vertex records.
//!
//! Every copy of a global vertex is routed to a *block owner* picked from the
//! global number alone, folded there with a [`VertexReducer`], and the
//! result is sent back to every contributor. Since the owner and the
//! combinator ignore where a copy came from, the outcome does not depend on
//! the number of ranks or on message arrival order.

use std::collections::BTreeMap;

use crate::algs::collective::exchange_payloads;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{WireVertex, decode_vertices, encode_vertices, read_records, write_records};
use crate::join::edges::JoinEdges;
use crate::join::mesh::JoinMesh;
use crate::join::param::JoinParam;
use crate::join::vertex::{JoinVertex, MaxTolerance, MinTolerance, VertexReducer};
use crate::mesh_error::MeshJoinError;

const SYNC_TAG: CommTag = CommTag::new(0x5300);
const REPLY_TAG: CommTag = CommTag::new(0x5310);

/// Vertices holding the extreme tolerances of a distributed mesh.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ToleranceRange {
    pub min: JoinVertex,
    pub max: JoinVertex,
}

/// Block owner of a global number.
fn block_owner(gnum: u64, block_size: u64, n_ranks: usize) -> usize {
    (((gnum - 1) / block_size) as usize).min(n_ranks - 1)
}

fn global_max<C: Communicator>(comm: &C, local: u64) -> Result<u64, MeshJoinError> {
    let n_ranks = comm.size().max(1);
    let mut recv = vec![0u8; 8 * n_ranks];
    comm.allgather(&local.to_le_bytes(), &mut recv)?;
    Ok(recv
        .chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            u64::from_le_bytes(b)
        })
        .max()
        .unwrap_or(0))
}

/// Give every copy of a global vertex the minimum tolerance. Collective.
pub fn sync_vertices<C: Communicator>(mesh: &mut JoinMesh, comm: &C) -> Result<(), MeshJoinError> {
    sync_vertices_with(mesh, comm, &MinTolerance)
}

/// Replace every copy of a global vertex by the reduction of all copies,
/// local duplicates included. Collective.
pub fn sync_vertices_with<C, R>(
    mesh: &mut JoinMesh,
    comm: &C,
    reducer: &R,
) -> Result<(), MeshJoinError>
where
    C: Communicator,
    R: VertexReducer,
{
    let me = comm.rank();
    let n_ranks = comm.size().max(1);

    let mut pending = mesh
        .vertices
        .iter()
        .position(|v| v.gnum == 0)
        .map(|vertex| MeshJoinError::InvalidGnum { rank: me, vertex });
    let local_max = if pending.is_some() {
        0
    } else {
        mesh.vertices.iter().map(|v| v.gnum).max().unwrap_or(0)
    };
    let max_gnum = global_max(comm, local_max)?;
    let block_size = max_gnum.div_ceil(n_ranks as u64).max(1);

    // 1) route copies to their block owner
    let mut routed: Vec<Vec<usize>> = vec![Vec::new(); n_ranks];
    if pending.is_none() {
        for (id, v) in mesh.vertices.iter().enumerate() {
            routed[block_owner(v.gnum, block_size, n_ranks)].push(id);
        }
    }
    let send = routed
        .iter()
        .map(|ids| {
            let recs: Vec<JoinVertex> = ids.iter().map(|&id| mesh.vertices[id]).collect();
            encode_vertices(&recs).unwrap_or_else(|e| {
                pending.get_or_insert(e);
                Vec::new()
            })
        })
        .collect();
    let incoming = exchange_payloads(comm, send, SYNC_TAG)?;

    // 2) fold copies per global number on the owner
    let mut contributions: Vec<Vec<JoinVertex>> = Vec::with_capacity(n_ranks);
    for bytes in &incoming {
        match decode_vertices(bytes) {
            Ok(recs) => contributions.push(recs),
            Err(e) => {
                pending.get_or_insert(e);
                contributions.push(Vec::new());
            }
        }
    }
    let mut folded: BTreeMap<u64, JoinVertex> = BTreeMap::new();
    for v in contributions.iter().flatten() {
        folded
            .entry(v.gnum)
            .and_modify(|acc| *acc = reducer.combine(acc, v))
            .or_insert_with(|| reducer.combine(&reducer.identity(), v));
    }
    let replies = contributions
        .iter()
        .map(|recs| {
            let out: Vec<JoinVertex> = recs
                .iter()
                .map(|v| folded.get(&v.gnum).copied().unwrap_or(*v))
                .collect();
            encode_vertices(&out).unwrap_or_else(|e| {
                pending.get_or_insert(e);
                Vec::new()
            })
        })
        .collect();
    let answers = exchange_payloads(comm, replies, REPLY_TAG)?;

    if let Some(err) = pending {
        return Err(err);
    }

    // 3) overwrite local copies with the reduced records
    for (owner, bytes) in answers.iter().enumerate() {
        let recs = decode_vertices(bytes)?;
        if recs.len() != routed[owner].len() {
            return Err(MeshJoinError::WireError(format!(
                "rank {owner} answered {} records for {} sent",
                recs.len(),
                routed[owner].len()
            )));
        }
        for (&id, rec) in routed[owner].iter().zip(recs) {
            mesh.vertices[id] = rec;
        }
    }
    log::debug!(
        "[rank {me}] {}: {} vertices synchronized ({} global numbers reduced here)",
        mesh.name,
        mesh.n_vertices(),
        folded.len()
    );
    Ok(())
}

/// Element-wise reduction of `local` over all ranks. Collective.
///
/// Every rank must pass the same number of records; the result is the same
/// on every rank.
pub fn reduce_vertices<C, R>(
    comm: &C,
    local: &[JoinVertex],
    reducer: &R,
) -> Result<Vec<JoinVertex>, MeshJoinError>
where
    C: Communicator,
    R: VertexReducer,
{
    let n_ranks = comm.size().max(1);
    let n = local.len();

    let n_le = (n as u64).to_le_bytes();
    let mut counts = vec![0u8; 8 * n_ranks];
    comm.allgather(&n_le, &mut counts)?;
    if let Some(c) = counts.chunks_exact(8).find(|c| *c != &n_le[..]) {
        let mut b = [0u8; 8];
        b.copy_from_slice(c);
        return Err(MeshJoinError::WireError(format!(
            "reduce_vertices over {n} records met a rank with {}",
            u64::from_le_bytes(b)
        )));
    }

    let mut send = Vec::with_capacity(n * std::mem::size_of::<WireVertex>());
    let recs: Vec<WireVertex> = local.iter().map(WireVertex::of).collect();
    write_records(&mut send, &recs);
    let mut recv = vec![0u8; send.len() * n_ranks];
    comm.allgather(&send, &mut recv)?;

    let mut out = vec![reducer.identity(); n];
    for chunk in recv.chunks(send.len().max(1)).take(n_ranks) {
        let (recs, _) = read_records::<WireVertex>(chunk, n)?;
        for (acc, rec) in out.iter_mut().zip(&recs) {
            *acc = reducer.combine(acc, &rec.get());
        }
    }
    Ok(out)
}

/// Global minimum and maximum tolerance, or `None` when no rank holds a
/// vertex. Collective and read-only.
pub fn minmax_tol<C: Communicator>(
    param: &JoinParam,
    mesh: &JoinMesh,
    comm: &C,
) -> Result<Option<ToleranceRange>, MeshJoinError> {
    let mut n_vertices = [mesh.n_vertices() as u64];
    comm.allreduce_sum(&mut n_vertices)?;
    if n_vertices[0] == 0 {
        return Ok(None);
    }

    let local_min = MinTolerance.reduce(&mesh.vertices);
    let local_max = MaxTolerance.reduce(&mesh.vertices);
    let min = reduce_vertices(comm, &[local_min], &MinTolerance)?[0];
    let max = reduce_vertices(comm, &[local_max], &MaxTolerance)?[0];

    if param.verbosity > 0 {
        log::info!(
            "[join {}] {}: minimum tolerance on vertex {}\n  {min}",
            param.num,
            mesh.name,
            min.gnum
        );
        log::info!(
            "[join {}] {}: maximum tolerance on vertex {}\n  {max}",
            param.num,
            mesh.name,
            max.gnum
        );
    }
    Ok(Some(ToleranceRange { min, max }))
}

/// Set each vertex tolerance to `fraction` times its shortest incident edge.
///
/// Vertices without incident edges keep their tolerance. Local only; follow
/// with [`sync_vertices`] to reconcile partition boundaries.
pub fn define_tolerance(
    mesh: &mut JoinMesh,
    edges: &JoinEdges,
    fraction: f64,
) -> Result<(), MeshJoinError> {
    if edges.n_vertices() != mesh.n_vertices() {
        return Err(MeshJoinError::InvalidConnectivity(format!(
            "edges cover {} vertices, mesh has {}",
            edges.n_vertices(),
            mesh.n_vertices()
        )));
    }
    if !(fraction.is_finite() && fraction >= 0.0) {
        log::warn!("{}: tolerance fraction {fraction} is not a finite positive number", mesh.name);
    }
    let mut shortest = vec![f64::INFINITY; mesh.n_vertices()];
    for &[a, b] in &edges.def {
        let len = mesh.vertices[a].distance(&mesh.vertices[b]);
        shortest[a] = shortest[a].min(len);
        shortest[b] = shortest[b].min(len);
    }
    for (v, len) in mesh.vertices.iter_mut().zip(shortest) {
        if len.is_finite() {
            v.tolerance = fraction * len;
        }
    }
    Ok(())
}
