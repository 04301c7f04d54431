//! Rewrite of a join mesh after a merge/split decision.
//!
//! The decision itself is made elsewhere; it arrives as an old→new vertex
//! map and, optionally, a list of new vertices to insert along each edge.

use itertools::{Either, Itertools};

use crate::debug_invariants::DebugInvariants;
use crate::join::edges::{JoinEdges, edge_index, get_edge};
use crate::join::mesh::JoinMesh;
use crate::join::vertex::JoinVertex;
use crate::mesh_error::MeshJoinError;

/// New vertices to insert along each edge, CSR over edge ids.
///
/// `vertices[index[e]..index[e + 1]]` are new vertex ids listed from the
/// first to the second endpoint of `edges.def[e]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EdgeInsertions {
    pub index: Vec<usize>,
    pub vertices: Vec<usize>,
}

impl EdgeInsertions {
    /// No insertion on any of `n_edges` edges.
    pub fn empty(n_edges: usize) -> Self {
        Self {
            index: vec![0; n_edges + 1],
            vertices: Vec::new(),
        }
    }

    /// Build from `(edge id, new vertex ids)` pairs; later pairs for the same
    /// edge append.
    pub fn from_lists<I>(n_edges: usize, lists: I) -> Result<Self, MeshJoinError>
    where
        I: IntoIterator<Item = (usize, Vec<usize>)>,
    {
        let mut per_edge: Vec<Vec<usize>> = vec![Vec::new(); n_edges];
        for (e, vs) in lists {
            let slot = per_edge.get_mut(e).ok_or_else(|| {
                MeshJoinError::InvalidInsertions(format!("edge {e} out of range ({n_edges} edges)"))
            })?;
            slot.extend(vs);
        }
        let mut index = Vec::with_capacity(n_edges + 1);
        let mut vertices = Vec::new();
        index.push(0);
        for vs in per_edge {
            vertices.extend(vs);
            index.push(vertices.len());
        }
        Ok(Self { index, vertices })
    }

    pub fn n_edges(&self) -> usize {
        self.index.len().saturating_sub(1)
    }

    /// Insertions on edge `e`, in definition order.
    pub fn on_edge(&self, e: usize) -> &[usize] {
        &self.vertices[self.index[e]..self.index[e + 1]]
    }

    fn validate(&self, n_edges: usize, n_new_vertices: usize) -> Result<(), MeshJoinError> {
        if self.index.len() != n_edges + 1 {
            return Err(MeshJoinError::InvalidInsertions(format!(
                "index has {} entries for {n_edges} edges",
                self.index.len()
            )));
        }
        if self.index[0] != 0
            || self.index.windows(2).any(|w| w[0] > w[1])
            || self.index[n_edges] != self.vertices.len()
        {
            return Err(MeshJoinError::InvalidInsertions(
                "index must be non-decreasing from 0 to the list length".into(),
            ));
        }
        if let Some(&v) = self.vertices.iter().find(|&&v| v >= n_new_vertices) {
            return Err(MeshJoinError::InvalidInsertions(format!(
                "new vertex {v} out of range ({n_new_vertices} new vertices)"
            )));
        }
        Ok(())
    }
}

/// Remap the connectivity of `mesh` through `old_to_new` and insert the new
/// vertices planned along each edge.
///
/// `edges` must have been built from `mesh` as it is now. An inserted vertex
/// is skipped when it repeats the previous vertex of the face or the next
/// edge endpoint, and a face never ends on its own first vertex. The vertex
/// table becomes `new_vertices` when given; otherwise each new id takes the
/// record of the first old vertex mapped to it, and an id nobody maps to is
/// an error. The global vertex count is left to the caller.
pub fn update(
    mesh: &mut JoinMesh,
    edges: &JoinEdges,
    insertions: Option<&EdgeInsertions>,
    n_new_vertices: usize,
    old_to_new: &[usize],
    new_vertices: Option<Vec<JoinVertex>>,
) -> Result<(), MeshJoinError> {
    mesh.validate_invariants()?;
    let n_old = mesh.n_vertices();
    if old_to_new.len() != n_old {
        return Err(MeshJoinError::InvalidVertexMap(format!(
            "{} entries for {n_old} vertices",
            old_to_new.len()
        )));
    }
    if let Some((old, &new)) = old_to_new.iter().find_position(|&&n| n >= n_new_vertices) {
        return Err(MeshJoinError::InvalidVertexMap(format!(
            "vertex {old} maps to {new}, beyond {n_new_vertices} new vertices"
        )));
    }
    if let Some(ins) = insertions {
        if edges.n_vertices() != n_old {
            return Err(MeshJoinError::InvalidConnectivity(format!(
                "edges cover {} vertices, mesh has {n_old}",
                edges.n_vertices()
            )));
        }
        ins.validate(edges.n_edges(), n_new_vertices)?;
    }

    let vertices = match new_vertices {
        Some(table) if table.len() == n_new_vertices => table,
        Some(table) => {
            return Err(MeshJoinError::InvalidVertexMap(format!(
                "vertex table holds {} records for {n_new_vertices} new vertices",
                table.len()
            )));
        }
        None => {
            let mut table: Vec<Option<JoinVertex>> = vec![None; n_new_vertices];
            for (old, &new) in old_to_new.iter().enumerate() {
                table[new].get_or_insert(mesh.vertices[old]);
            }
            table
                .into_iter()
                .enumerate()
                .map(|(new, v)| v.ok_or(MeshJoinError::UncoveredVertex(new)))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let mut idx = Vec::with_capacity(mesh.face_vtx_idx.len());
    let mut lst = Vec::with_capacity(mesh.face_vtx_lst.len());
    idx.push(0);
    for face_vertices in mesh.faces() {
        let start = lst.len();
        for (v1, v2) in face_vertices.iter().copied().circular_tuple_windows() {
            let (n1, n2) = (old_to_new[v1], old_to_new[v2]);
            if lst.len() == start || lst.last() != Some(&n1) {
                lst.push(n1);
            }
            let Some(ins) = insertions else { continue };
            if v1 == v2 {
                continue;
            }
            let num = get_edge(v1, v2, edges)?;
            let planned = ins.on_edge(edge_index(num));
            let ordered = if num > 0 {
                Either::Left(planned.iter())
            } else {
                Either::Right(planned.iter().rev())
            };
            for &nv in ordered {
                if lst.last() != Some(&nv) && nv != n2 {
                    lst.push(nv);
                }
            }
        }
        while lst.len() - start > 1 && lst.last() == Some(&lst[start]) {
            lst.pop();
        }
        idx.push(lst.len());
    }

    mesh.face_vtx_idx = idx;
    mesh.face_vtx_lst = lst;
    mesh.vertices = vertices;
    log::debug!(
        "{}: updated to {} vertices and {} face references",
        mesh.name,
        mesh.n_vertices(),
        mesh.face_vtx_lst.len()
    );
    mesh.debug_assert_invariants();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::edges::define_edges;

    fn vtx(g: u64, x: f64) -> JoinVertex {
        JoinVertex::new(g, [x, 0.0, 0.0], 0.1)
    }

    fn triangle() -> JoinMesh {
        let mut m = JoinMesh::new("tri");
        m.push_vertex(vtx(10, 0.0));
        m.push_vertex(vtx(20, 1.0));
        m.push_vertex(vtx(30, 2.0));
        m.push_face(1, &[0, 1, 2]).unwrap();
        m
    }

    #[test]
    fn insertion_follows_traversal_direction() {
        // the face runs 0 -> 2 -> 1, against the definition of edge (1, 2)
        let mut m = triangle();
        m.push_vertex(vtx(40, 3.0));
        m.push_face(2, &[0, 2, 1]).unwrap();
        let edges = define_edges(&m).unwrap();
        let e = edge_index(get_edge(1, 2, &edges).unwrap());
        let ins = EdgeInsertions::from_lists(edges.n_edges(), [(e, vec![4, 5])]).unwrap();
        let mut table = m.vertices.clone();
        table.push(vtx(50, 1.3));
        table.push(vtx(60, 1.6));
        update(&mut m, &edges, Some(&ins), 6, &[0, 1, 2, 3], Some(table)).unwrap();
        assert_eq!(m.face_vertex_gnums(0), vec![10, 20, 50, 60, 30]);
        assert_eq!(m.face_vertex_gnums(1), vec![10, 30, 60, 50, 20]);
    }

    #[test]
    fn merged_vertices_collapse_without_table() {
        // vertices 1 and 2 merge into new vertex 1
        let mut m = triangle();
        m.push_vertex(vtx(40, 3.0));
        m.face_vtx_lst = vec![0, 1, 2, 3];
        m.face_vtx_idx = vec![0, 4];
        let edges = define_edges(&m).unwrap();
        update(&mut m, &edges, None, 3, &[0, 1, 1, 2], None).unwrap();
        assert_eq!(m.face(0), &[0, 1, 2]);
        assert_eq!(m.vertices.len(), 3);
        assert_eq!(m.vertices[1].gnum, 20);
    }

    #[test]
    fn uncovered_new_vertex_is_an_error() {
        let mut m = triangle();
        let edges = define_edges(&m).unwrap();
        assert!(matches!(
            update(&mut m, &edges, None, 4, &[0, 1, 2], None),
            Err(MeshJoinError::UncoveredVertex(3))
        ));
    }

    #[test]
    fn bad_map_is_rejected() {
        let mut m = triangle();
        let edges = define_edges(&m).unwrap();
        assert!(matches!(
            update(&mut m, &edges, None, 3, &[0, 1], None),
            Err(MeshJoinError::InvalidVertexMap(_))
        ));
        assert!(matches!(
            update(&mut m, &edges, None, 2, &[0, 1, 2], None),
            Err(MeshJoinError::InvalidVertexMap(_))
        ));
        let ins = EdgeInsertions::empty(1);
        assert!(matches!(
            update(&mut m, &edges, Some(&ins), 3, &[0, 1, 2], None),
            Err(MeshJoinError::InvalidInsertions(_))
        ));
    }
}
