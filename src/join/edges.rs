//! Edges of a join mesh, derived on demand from face connectivity.
//!
//! Edge ids follow *discovery order*: faces are walked in order, and each
//! consecutive vertex pair (with wrap-around) that is not yet known becomes
//! a new edge whose definition keeps the orientation in which it was first
//! met. The vertex adjacency index is keyed by that first endpoint.
//!
//! Edge numbers handed out by [`get_edge`] are 1-based (`num = id + 1`) so
//! that the sign can carry the orientation.
//!
//! A [`JoinEdges`] is a snapshot: it is never updated when the mesh it came
//! from changes. Recompute it after every mutation.

use itertools::Itertools;

use crate::algs::communicator::Communicator;
use crate::debug_invariants::DebugInvariants;
use crate::join::mesh::JoinMesh;
use crate::mesh_error::MeshJoinError;

/// Edge set plus vertex→(vertex, edge) adjacency, CSR style.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JoinEdges {
    /// Global number of edges (sum over ranks once synchronized).
    pub n_g_edges: u64,
    /// `def[e] = [v1, v2]`, local vertex ids.
    pub def: Vec<[usize; 2]>,
    /// Index on first vertices, `n_vertices + 1` entries.
    pub vtx_idx: Vec<usize>,
    /// Second vertex of each couple.
    pub adj_vtx_lst: Vec<usize>,
    /// Edge id of each couple.
    pub edge_lst: Vec<usize>,
}

impl JoinEdges {
    #[inline]
    pub fn n_edges(&self) -> usize {
        self.def.len()
    }

    /// Number of vertices covered by the adjacency index.
    #[inline]
    pub fn n_vertices(&self) -> usize {
        self.vtx_idx.len().saturating_sub(1)
    }

    /// `(neighbor, edge id)` pairs stored under `v`, in discovery order.
    pub fn adjacent(&self, v: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let range = if v < self.n_vertices() {
            self.vtx_idx[v]..self.vtx_idx[v + 1]
        } else {
            0..0
        };
        self.adj_vtx_lst[range.clone()]
            .iter()
            .copied()
            .zip(self.edge_lst[range].iter().copied())
    }

    /// Endpoints of a signed edge number, in traversal order.
    pub fn oriented(&self, num: i64) -> Result<[usize; 2], MeshJoinError> {
        let [a, b] = match num {
            0 => None,
            _ => self.def.get(edge_index(num)),
        }
        .copied()
        .ok_or_else(|| {
            MeshJoinError::InvalidConnectivity(format!(
                "edge number {num} out of range ({} edges)",
                self.n_edges()
            ))
        })?;
        Ok(if num > 0 { [a, b] } else { [b, a] })
    }
}

/// 0-based edge id of a signed 1-based edge number.
///
/// `num` must be non-zero, as every number returned by [`get_edge`] is.
#[inline]
pub fn edge_index(num: i64) -> usize {
    debug_assert!(num != 0, "edge numbers are 1-based");
    (num.unsigned_abs() as usize).wrapping_sub(1)
}

/// Build the edge set of `mesh`. Purely local.
///
/// Repeated consecutive references (zero-length segments) do not define
/// edges; run [`crate::algs::clean::clean`] first if they must be removed.
pub fn define_edges(mesh: &JoinMesh) -> Result<JoinEdges, MeshJoinError> {
    mesh.validate_invariants()?;
    let n_vertices = mesh.n_vertices();
    let mut adjacency: Vec<Vec<(usize, usize)>> = vec![Vec::new(); n_vertices];
    let mut def: Vec<[usize; 2]> = Vec::new();

    for vertices in mesh.faces() {
        for (v1, v2) in vertices.iter().copied().circular_tuple_windows() {
            if v1 == v2 {
                continue;
            }
            let known = adjacency[v1].iter().any(|&(w, _)| w == v2)
                || adjacency[v2].iter().any(|&(w, _)| w == v1);
            if !known {
                adjacency[v1].push((v2, def.len()));
                def.push([v1, v2]);
            }
        }
    }

    let mut vtx_idx = Vec::with_capacity(n_vertices + 1);
    let mut adj_vtx_lst = Vec::with_capacity(def.len());
    let mut edge_lst = Vec::with_capacity(def.len());
    vtx_idx.push(0);
    for list in &adjacency {
        for &(w, e) in list {
            adj_vtx_lst.push(w);
            edge_lst.push(e);
        }
        vtx_idx.push(adj_vtx_lst.len());
    }

    log::debug!(
        "[{}] defined {} edges over {} vertices",
        mesh.name,
        def.len(),
        n_vertices
    );

    let edges = JoinEdges {
        n_g_edges: def.len() as u64,
        def,
        vtx_idx,
        adj_vtx_lst,
        edge_lst,
    };
    edges.debug_assert_invariants();
    Ok(edges)
}

/// Aggregate the global edge count (sum of local counts). Collective.
///
/// Edge ids stay process-local.
pub fn sync_edge_count<C: Communicator>(
    edges: &mut JoinEdges,
    comm: &C,
) -> Result<(), MeshJoinError> {
    let mut n = [edges.n_edges() as u64];
    comm.allreduce_sum(&mut n)?;
    edges.n_g_edges = n[0];
    Ok(())
}

/// Signed 1-based number of the edge joining `v1` and `v2`.
///
/// Positive when the edge is defined as `(v1, v2)`, negative when defined as
/// `(v2, v1)`. A missing edge means the edge set does not match the mesh and
/// is reported as [`MeshJoinError::MissingEdge`].
pub fn get_edge(v1: usize, v2: usize, edges: &JoinEdges) -> Result<i64, MeshJoinError> {
    if let Some((_, e)) = edges.adjacent(v1).find(|&(w, _)| w == v2) {
        return Ok(e as i64 + 1);
    }
    if let Some((_, e)) = edges.adjacent(v2).find(|&(w, _)| w == v1) {
        return Ok(-(e as i64 + 1));
    }
    Err(MeshJoinError::MissingEdge { v1, v2 })
}

/// Edge→face connectivity as `(index, list)`, CSR over edge ids.
///
/// Faces appear in increasing order; a face touching an edge twice is
/// listed once.
pub fn edge_face_adjacency(
    mesh: &JoinMesh,
    edges: &JoinEdges,
) -> Result<(Vec<usize>, Vec<usize>), MeshJoinError> {
    let mut per_edge: Vec<Vec<usize>> = vec![Vec::new(); edges.n_edges()];
    for (face, vertices) in mesh.faces().enumerate() {
        for (v1, v2) in vertices.iter().copied().circular_tuple_windows() {
            if v1 == v2 {
                continue;
            }
            let e = edge_index(get_edge(v1, v2, edges)?);
            if per_edge[e].last() != Some(&face) {
                per_edge[e].push(face);
            }
        }
    }
    let mut index = Vec::with_capacity(per_edge.len() + 1);
    index.push(0);
    let mut list = Vec::new();
    for faces in per_edge {
        list.extend(faces);
        index.push(list.len());
    }
    Ok((index, list))
}

impl DebugInvariants for JoinEdges {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "JoinEdges");
    }

    fn validate_invariants(&self) -> Result<(), MeshJoinError> {
        let n_vertices = self.n_vertices();
        if self.adj_vtx_lst.len() != self.n_edges() || self.edge_lst.len() != self.n_edges() {
            return Err(MeshJoinError::InvalidConnectivity(format!(
                "adjacency holds {} couples for {} edges",
                self.adj_vtx_lst.len(),
                self.n_edges()
            )));
        }
        if self.vtx_idx.last().copied().unwrap_or(0) != self.adj_vtx_lst.len() {
            return Err(MeshJoinError::InvalidConnectivity(
                "vertex index does not cover the adjacency list".into(),
            ));
        }
        for (e, &[a, b]) in self.def.iter().enumerate() {
            if a >= n_vertices || b >= n_vertices || a == b {
                return Err(MeshJoinError::InvalidConnectivity(format!(
                    "edge {e} is defined by ({a}, {b})"
                )));
            }
            if !self.adjacent(a).any(|(w, id)| w == b && id == e) {
                return Err(MeshJoinError::MissingEdge { v1: a, v2: b });
            }
        }
        Ok(())
    }
}
