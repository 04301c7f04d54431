//! Structural cleanup of a join mesh: orphan and duplicate vertices,
//! zero-length segments.

use std::cmp::Ordering;

use crate::debug_invariants::DebugInvariants;
use crate::join::mesh::JoinMesh;
use crate::join::vertex::{JoinVertex, cmp_records};
use crate::mesh_error::MeshJoinError;

/// Drop unreferenced vertices and repeated global numbers.
///
/// Remaining vertices are ordered by global number. Among copies of one
/// global number the first in record order (smallest tolerance) is kept and
/// every reference is redirected to it. Returns the number of removed
/// vertices.
pub fn vertex_clean(mesh: &mut JoinMesh) -> Result<usize, MeshJoinError> {
    mesh.validate_invariants()?;
    let n_vertices = mesh.n_vertices();

    let mut used = vec![false; n_vertices];
    for &v in &mesh.face_vtx_lst {
        used[v] = true;
    }
    let mut old_to_new = vec![usize::MAX; n_vertices];
    let mut kept: Vec<JoinVertex> = Vec::with_capacity(n_vertices);
    for v in vertex_order(mesh).into_iter().filter(|&v| used[v]) {
        let rec = mesh.vertices[v];
        if kept.last().map(|last| last.gnum) != Some(rec.gnum) {
            kept.push(rec);
        }
        old_to_new[v] = kept.len() - 1;
    }

    let removed = n_vertices - kept.len();
    for v in mesh.face_vtx_lst.iter_mut() {
        *v = old_to_new[*v];
    }
    mesh.vertices = kept;
    if removed > 0 {
        log::debug!("{}: {removed} vertices removed by vertex_clean", mesh.name);
    }
    mesh.debug_assert_invariants();
    Ok(removed)
}

/// Collapse repeated consecutive references in every face, the last/first
/// pair included.
///
/// Fails with [`MeshJoinError::DegenerateFace`] if a face would keep fewer
/// than 3 vertices; the mesh is then left unchanged. Returns the number of
/// removed references.
pub fn clean(mesh: &mut JoinMesh, verbosity: i32) -> Result<usize, MeshJoinError> {
    mesh.validate_invariants()?;
    let mut idx = Vec::with_capacity(mesh.face_vtx_idx.len());
    let mut lst = Vec::with_capacity(mesh.face_vtx_lst.len());
    idx.push(0);
    let mut first_error = None;

    for (face, vertices) in mesh.faces().enumerate() {
        let start = lst.len();
        for &v in vertices {
            if lst.len() == start || lst.last() != Some(&v) {
                lst.push(v);
            }
        }
        while lst.len() - start > 1 && lst.last() == Some(&lst[start]) {
            lst.pop();
        }
        let n_kept = lst.len() - start;
        if verbosity > 2 && n_kept != vertices.len() {
            log::debug!(
                "{}: face {face} (global number {}) {} -> {} vertices",
                mesh.name,
                mesh.face_gnum[face],
                vertices.len(),
                n_kept
            );
        }
        if n_kept < 3 {
            log::warn!(
                "{}: face {face} (global number {}) left with {n_kept} vertices",
                mesh.name,
                mesh.face_gnum[face]
            );
            first_error.get_or_insert(MeshJoinError::DegenerateFace {
                face,
                gnum: mesh.face_gnum[face],
                n_vertices: n_kept,
            });
        }
        idx.push(lst.len());
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    let removed = mesh.face_vtx_lst.len() - lst.len();
    mesh.face_vtx_idx = idx;
    mesh.face_vtx_lst = lst;
    if verbosity > 0 {
        log::info!(
            "{}: {removed} degenerate edge references removed",
            mesh.name
        );
    }
    mesh.debug_assert_invariants();
    Ok(removed)
}

/// Vertex ids ordered by global number, ties broken on the record, then on
/// the id.
pub(crate) fn vertex_order(mesh: &JoinMesh) -> Vec<usize> {
    let mut order: Vec<usize> = (0..mesh.n_vertices()).collect();
    order.sort_by(|&a, &b| {
        let (va, vb) = (&mesh.vertices[a], &mesh.vertices[b]);
        match va.gnum.cmp(&vb.gnum) {
            Ordering::Equal => cmp_records(va, vb),
            o => o,
        }
    });
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn line_mesh(gnums: &[u64], faces: &[&[usize]]) -> JoinMesh {
        let mut m = JoinMesh::new("clean");
        for (i, &g) in gnums.iter().enumerate() {
            m.push_vertex(JoinVertex::new(g, [i as f64, 0.0, 0.0], 0.1 + i as f64));
        }
        for (f, face) in faces.iter().enumerate() {
            m.push_face(f as u64 + 1, face).unwrap();
        }
        m
    }

    #[test]
    fn repeated_reference_collapses() {
        let mut m = line_mesh(&[1, 2, 3], &[&[0, 1, 1, 2]]);
        assert_eq!(clean(&mut m, 0).unwrap(), 1);
        assert_eq!(m.face(0), &[0, 1, 2]);
    }

    #[test]
    fn wraparound_repeat_collapses() {
        let mut m = line_mesh(&[1, 2, 3, 4], &[&[0, 1, 2, 3, 0]]);
        assert_eq!(clean(&mut m, 0).unwrap(), 1);
        assert_eq!(m.face(0), &[0, 1, 2, 3]);
    }

    #[test]
    fn degenerate_face_is_reported_and_mesh_untouched() {
        let mut m = line_mesh(&[1, 2, 3], &[&[0, 1, 2], &[0, 0, 1, 1]]);
        let before = m.clone();
        assert!(matches!(
            clean(&mut m, 1),
            Err(MeshJoinError::DegenerateFace { face: 1, gnum: 2, n_vertices: 2 })
        ));
        assert_eq!(m, before);
    }

    #[test]
    fn vertex_clean_drops_orphans_and_duplicates() {
        // vertex 3 is an orphan; vertices 0 and 4 share gnum 7
        let mut m = line_mesh(&[7, 2, 5, 9, 7], &[&[0, 1, 2], &[4, 2, 1]]);
        assert_eq!(vertex_clean(&mut m).unwrap(), 2);
        let gnums: Vec<u64> = m.vertices.iter().map(|v| v.gnum).collect();
        assert_eq!(gnums, vec![2, 5, 7]);
        // the smaller tolerance (first record) wins
        assert_eq!(m.vertices[2].tolerance, 0.1);
        assert_eq!(m.face_vertex_gnums(0), vec![7, 2, 5]);
        assert_eq!(m.face_vertex_gnums(1), vec![7, 5, 2]);
        assert_eq!(m.face(0)[0], m.face(1)[0]);
    }

    #[test]
    fn out_of_range_reference_is_an_error() {
        let mut m = line_mesh(&[1, 2, 3], &[&[0, 1, 2]]);
        m.face_vtx_lst[2] = 7;
        assert!(matches!(
            vertex_clean(&mut m),
            Err(MeshJoinError::VertexOutOfRange { vertex: 7, .. })
        ));
    }

    #[test]
    fn broken_face_index_is_refused_before_any_change() {
        // one index entry too many: a face with no face number
        let mut m = line_mesh(&[1, 2, 3, 4], &[&[0, 1, 2, 3]]);
        m.face_vtx_idx.push(4);
        let before = m.clone();
        assert!(matches!(
            clean(&mut m, 0),
            Err(MeshJoinError::InvalidConnectivity(_))
        ));
        assert!(matches!(
            vertex_clean(&mut m),
            Err(MeshJoinError::InvalidConnectivity(_))
        ));
        assert_eq!(m, before);
    }

    proptest! {
        #[test]
        fn vertex_clean_is_idempotent(
            gnums in proptest::collection::vec(1u64..8, 4..12),
            faces in proptest::collection::vec(proptest::collection::vec(0usize..4, 3..6), 1..5),
        ) {
            let face_refs: Vec<&[usize]> = faces.iter().map(Vec::as_slice).collect();
            let mut m = line_mesh(&gnums, &face_refs);
            vertex_clean(&mut m).unwrap();
            let once = m.clone();
            prop_assert_eq!(vertex_clean(&mut m).unwrap(), 0);
            prop_assert_eq!(m, once);
        }
    }
}
