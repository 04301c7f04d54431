//! Human-readable dumps of join structures, for diagnostics only.
//!
//! Nothing here is part of the computational contract; the layout may change.

use std::io::Write;

use crate::join::edges::JoinEdges;
use crate::join::mesh::JoinMesh;
use crate::join::vertex::JoinVertex;
use crate::mesh_error::MeshJoinError;

/// One vertex record per line.
pub fn dump_vertex<W: Write>(writer: &mut W, vertex: &JoinVertex) -> Result<(), MeshJoinError> {
    writeln!(writer, "{vertex}")?;
    Ok(())
}

/// Faces with their global vertex numbers, then the vertex table.
pub fn dump_mesh<W: Write>(writer: &mut W, mesh: &JoinMesh) -> Result<(), MeshJoinError> {
    writeln!(writer, "mesh {:?}", mesh.name)?;
    writeln!(
        writer,
        "  faces: {} local / {} global",
        mesh.n_faces(),
        mesh.n_g_faces
    )?;
    writeln!(
        writer,
        "  vertices: {} local / {} global",
        mesh.n_vertices(),
        mesh.n_g_vertices
    )?;
    for f in 0..mesh.n_faces() {
        write!(
            writer,
            "  face {f:6} (gnum {:10}) n_vtx {:3} |",
            mesh.face_gnum[f],
            mesh.face(f).len()
        )?;
        for &v in mesh.face(f) {
            match mesh.vertices.get(v) {
                Some(rec) => write!(writer, " {}", rec.gnum)?,
                None => write!(writer, " <{v}?>")?,
            }
        }
        writeln!(writer)?;
    }
    for (v, rec) in mesh.vertices.iter().enumerate() {
        write!(writer, "  vtx {v:6} ")?;
        dump_vertex(writer, rec)?;
    }
    Ok(())
}

/// Edge definitions (local ids and global vertex numbers) plus the
/// per-vertex adjacency.
pub fn dump_edges<W: Write>(
    writer: &mut W,
    edges: &JoinEdges,
    mesh: &JoinMesh,
) -> Result<(), MeshJoinError> {
    let gnum = |v: usize| mesh.vertices.get(v).map_or(0, |rec| rec.gnum);
    writeln!(
        writer,
        "edges: {} local / {} global",
        edges.n_edges(),
        edges.n_g_edges
    )?;
    for (e, &[a, b]) in edges.def.iter().enumerate() {
        let len = match (mesh.vertices.get(a), mesh.vertices.get(b)) {
            (Some(va), Some(vb)) => va.distance(vb),
            _ => f64::NAN,
        };
        writeln!(
            writer,
            "  edge {:6}: ({a:6}, {b:6}) gnum ({}, {}) length {len:.6e}",
            e + 1,
            gnum(a),
            gnum(b)
        )?;
    }
    for v in 0..edges.n_vertices() {
        let adjacent: Vec<String> = edges
            .adjacent(v)
            .map(|(w, e)| format!("{w}:{}", e + 1))
            .collect();
        if !adjacent.is_empty() {
            writeln!(writer, "  vtx {v:6} -> {}", adjacent.join(" "))?;
        }
    }
    Ok(())
}
