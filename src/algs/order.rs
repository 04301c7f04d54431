//! Canonical ordering of a join mesh by global numbers.

use crate::algs::clean::vertex_order;
use crate::debug_invariants::DebugInvariants;
use crate::join::mesh::JoinMesh;
use crate::mesh_error::MeshJoinError;

/// Order vertices and faces by global number and drop exact duplicate faces.
///
/// Vertices are sorted by global number (ties on the whole record), faces
/// by global number with a stable sort. Two faces sharing a global number
/// are duplicates when their vertex global numbers match in sequence; only
/// the first is kept. Any other repetition fails with
/// [`MeshJoinError::InconsistentFace`] and leaves the mesh unchanged.
///
/// Two ranks that assembled the same selection end up with identical
/// meshes. Returns the number of dropped faces.
pub fn face_order(mesh: &mut JoinMesh) -> Result<usize, MeshJoinError> {
    mesh.validate_invariants()?;
    let n_vertices = mesh.n_vertices();

    let order = vertex_order(mesh);
    let mut old_to_new = vec![0usize; n_vertices];
    for (new, &old) in order.iter().enumerate() {
        old_to_new[old] = new;
    }
    let vertices: Vec<_> = order.iter().map(|&v| mesh.vertices[v]).collect();

    let mut faces: Vec<usize> = (0..mesh.n_faces()).collect();
    faces.sort_by_key(|&f| mesh.face_gnum[f]);

    let mut face_gnum = Vec::with_capacity(faces.len());
    let mut face_vtx_idx = Vec::with_capacity(faces.len() + 1);
    let mut face_vtx_lst = Vec::with_capacity(mesh.face_vtx_lst.len());
    face_vtx_idx.push(0);
    let mut last: Option<usize> = None;
    let mut dropped = 0;

    for f in faces {
        if let Some(prev) = last.filter(|&p| mesh.face_gnum[p] == mesh.face_gnum[f]) {
            if mesh.face_vertex_gnums(prev) != mesh.face_vertex_gnums(f) {
                return Err(MeshJoinError::InconsistentFace {
                    gnum: mesh.face_gnum[f],
                });
            }
            dropped += 1;
            continue;
        }
        face_gnum.push(mesh.face_gnum[f]);
        face_vtx_lst.extend(mesh.face(f).iter().map(|&v| old_to_new[v]));
        face_vtx_idx.push(face_vtx_lst.len());
        last = Some(f);
    }

    mesh.vertices = vertices;
    mesh.face_gnum = face_gnum;
    mesh.face_vtx_idx = face_vtx_idx;
    mesh.face_vtx_lst = face_vtx_lst;
    if dropped > 0 {
        log::debug!("{}: {dropped} duplicate faces dropped", mesh.name);
    }
    mesh.debug_assert_invariants();
    Ok(dropped)
}
