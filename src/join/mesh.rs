//! `JoinMesh`: the mesh built on the faces selected for a joining operation.
//!
//! Connectivity is stored CSR-style: `face_vtx_idx` has `n_faces + 1`
//! entries starting at 0 and `face_vtx_lst[face_vtx_idx[f]..face_vtx_idx[f + 1]]`
//! lists the 0-based local vertex ids of face `f`, in cyclic order.
//!
//! A mesh exclusively owns its arrays. Every constructor deep-copies its
//! inputs, `Clone` is a deep copy, and dropping the mesh releases everything.

use hashbrown::HashMap;

use crate::debug_invariants::DebugInvariants;
use crate::join::vertex::JoinVertex;
use crate::mesh_error::MeshJoinError;

/// Face→vertex connectivity plus vertex records for a selected mesh subset.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinMesh {
    /// For post-processing and dump purposes.
    pub name: String,
    pub n_g_faces: u64,
    pub face_gnum: Vec<u64>,
    pub face_vtx_idx: Vec<usize>,
    pub face_vtx_lst: Vec<usize>,
    pub n_g_vertices: u64,
    pub vertices: Vec<JoinVertex>,
}

impl Default for JoinMesh {
    fn default() -> Self {
        Self::new("")
    }
}

/// Raw arrays of a parent mesh from which a join mesh is extracted.
///
/// Parent face and vertex ids are 0-based. `face_gnum` and the connectivity
/// are indexed by parent face; `vtx_data[i]` is the record of
/// `selected_vertices[i]`.
#[derive(Clone, Copy, Debug)]
pub struct MeshExtract<'a> {
    pub n_g_faces: u64,
    pub selected_faces: &'a [usize],
    pub face_gnum: &'a [u64],
    pub face_vtx_idx: &'a [usize],
    pub face_vtx_lst: &'a [usize],
    pub n_g_vertices: u64,
    pub selected_vertices: &'a [usize],
    pub vtx_data: &'a [JoinVertex],
}

impl JoinMesh {
    /// Empty mesh.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            n_g_faces: 0,
            face_gnum: Vec::new(),
            face_vtx_idx: vec![0],
            face_vtx_lst: Vec::new(),
            n_g_vertices: 0,
            vertices: Vec::new(),
        }
    }

    #[inline]
    pub fn n_faces(&self) -> usize {
        self.face_gnum.len()
    }

    #[inline]
    pub fn n_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Local vertex ids of face `f`.
    #[inline]
    pub fn face(&self, f: usize) -> &[usize] {
        &self.face_vtx_lst[self.face_vtx_idx[f]..self.face_vtx_idx[f + 1]]
    }

    pub fn faces(&self) -> impl Iterator<Item = &[usize]> + '_ {
        (0..self.n_faces()).map(move |f| self.face(f))
    }

    /// Global vertex numbers of face `f`, in face order.
    pub fn face_vertex_gnums(&self, f: usize) -> Vec<u64> {
        self.face(f).iter().map(|&v| self.vertices[v].gnum).collect()
    }

    /// Append a vertex record and return its local id.
    pub fn push_vertex(&mut self, vertex: JoinVertex) -> usize {
        self.vertices.push(vertex);
        self.vertices.len() - 1
    }

    /// Append a face made of existing local vertices and return its id.
    pub fn push_face(&mut self, gnum: u64, vertices: &[usize]) -> Result<usize, MeshJoinError> {
        let face = self.n_faces();
        if let Some(&bad) = vertices.iter().find(|&&v| v >= self.n_vertices()) {
            return Err(MeshJoinError::VertexOutOfRange {
                face,
                vertex: bad,
                n_vertices: self.n_vertices(),
            });
        }
        self.face_gnum.push(gnum);
        self.face_vtx_lst.extend_from_slice(vertices);
        self.face_vtx_idx.push(self.face_vtx_lst.len());
        Ok(face)
    }

    /// Drop every face and vertex, keeping the name.
    pub fn reset(&mut self) {
        let name = std::mem::take(&mut self.name);
        *self = Self::new(name);
    }

    /// Overwrite `self` with a deep copy of `other`.
    pub fn copy_from(&mut self, other: &JoinMesh) {
        self.clone_from(other);
    }

    /// Global counts equal to the local ones (meshes built without communication).
    /// Check the shape of the face→vertex index: one entry per face plus
    /// one, starting at 0, non-decreasing, ending at the list length.
    pub fn check_index(&self) -> Result<(), MeshJoinError> {
        let n_faces = self.n_faces();
        if self.face_vtx_idx.len() != n_faces + 1 {
            return Err(MeshJoinError::InvalidConnectivity(format!(
                "index has {} entries for {n_faces} faces",
                self.face_vtx_idx.len()
            )));
        }
        if self.face_vtx_idx[0] != 0 {
            return Err(MeshJoinError::InvalidConnectivity(
                "index must start at 0".into(),
            ));
        }
        if let Some(f) = self.face_vtx_idx.windows(2).position(|w| w[0] > w[1]) {
            return Err(MeshJoinError::InvalidConnectivity(format!(
                "index decreases at face {f}"
            )));
        }
        if self.face_vtx_idx[n_faces] != self.face_vtx_lst.len() {
            return Err(MeshJoinError::InvalidConnectivity(format!(
                "index ends at {} but the list holds {} entries",
                self.face_vtx_idx[n_faces],
                self.face_vtx_lst.len()
            )));
        }
        Ok(())
    }

    pub(crate) fn set_local_counts(&mut self) {
        self.n_g_faces = self.n_faces() as u64;
        self.n_g_vertices = self.n_vertices() as u64;
    }

    /// Extract the faces listed in `selection` (sorted local face ids of
    /// `parent`). Vertices used by the selection are kept in parent order.
    /// No communication.
    pub fn from_subset(
        name: impl Into<String>,
        selection: &[usize],
        parent: &JoinMesh,
    ) -> Result<Self, MeshJoinError> {
        parent.validate_invariants()?;
        if let Some(w) = selection.windows(2).find(|w| w[0] >= w[1]) {
            return Err(MeshJoinError::InvalidSelection(format!(
                "subset must be strictly increasing, found {} before {}",
                w[0], w[1]
            )));
        }
        if let Some(&f) = selection.iter().find(|&&f| f >= parent.n_faces()) {
            return Err(MeshJoinError::InvalidSelection(format!(
                "face {f} out of range (parent has {} faces)",
                parent.n_faces()
            )));
        }

        let mut used = vec![false; parent.n_vertices()];
        for &f in selection {
            for &v in parent.face(f) {
                used[v] = true;
            }
        }
        let mut parent_to_sub = vec![usize::MAX; parent.n_vertices()];
        let mut mesh = JoinMesh::new(name);
        for (v, _) in used.iter().enumerate().filter(|(_, u)| **u) {
            parent_to_sub[v] = mesh.push_vertex(parent.vertices[v]);
        }
        for &f in selection {
            mesh.face_gnum.push(parent.face_gnum[f]);
            mesh.face_vtx_lst
                .extend(parent.face(f).iter().map(|&v| parent_to_sub[v]));
            mesh.face_vtx_idx.push(mesh.face_vtx_lst.len());
        }
        mesh.set_local_counts();
        mesh.debug_assert_invariants();
        Ok(mesh)
    }

    /// Build a join mesh from the raw arrays of a parent mesh.
    pub fn from_extract(
        name: impl Into<String>,
        extract: &MeshExtract<'_>,
    ) -> Result<Self, MeshJoinError> {
        if extract.selected_vertices.len() != extract.vtx_data.len() {
            return Err(MeshJoinError::InvalidSelection(format!(
                "{} selected vertices but {} vertex records",
                extract.selected_vertices.len(),
                extract.vtx_data.len()
            )));
        }
        let n_parent_faces = extract.face_vtx_idx.len().saturating_sub(1);
        let mut parent_to_local: HashMap<usize, usize> =
            HashMap::with_capacity(extract.selected_vertices.len());
        for (i, &pv) in extract.selected_vertices.iter().enumerate() {
            if parent_to_local.insert(pv, i).is_some() {
                return Err(MeshJoinError::InvalidSelection(format!(
                    "parent vertex {pv} selected twice"
                )));
            }
        }

        let mut mesh = JoinMesh::new(name);
        mesh.vertices = extract.vtx_data.to_vec();
        for (face, &pf) in extract.selected_faces.iter().enumerate() {
            if pf >= n_parent_faces || pf >= extract.face_gnum.len() {
                return Err(MeshJoinError::InvalidSelection(format!(
                    "parent face {pf} out of range ({n_parent_faces} faces)"
                )));
            }
            let (start, end) = (extract.face_vtx_idx[pf], extract.face_vtx_idx[pf + 1]);
            if start > end || end > extract.face_vtx_lst.len() {
                return Err(MeshJoinError::InvalidConnectivity(format!(
                    "parent face {pf} spans [{start}, {end}) in a list of {}",
                    extract.face_vtx_lst.len()
                )));
            }
            for &pv in &extract.face_vtx_lst[start..end] {
                let v = parent_to_local.get(&pv).copied().ok_or_else(|| {
                    MeshJoinError::InvalidSelection(format!(
                        "face {face} uses parent vertex {pv}, which is not selected"
                    ))
                })?;
                mesh.face_vtx_lst.push(v);
            }
            mesh.face_gnum.push(extract.face_gnum[pf]);
            mesh.face_vtx_idx.push(mesh.face_vtx_lst.len());
        }
        mesh.n_g_faces = extract.n_g_faces;
        mesh.n_g_vertices = extract.n_g_vertices;
        mesh.debug_assert_invariants();
        Ok(mesh)
    }
}

impl DebugInvariants for JoinMesh {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "JoinMesh");
    }

    fn validate_invariants(&self) -> Result<(), MeshJoinError> {
        self.check_index()?;
        for f in 0..self.n_faces() {
            if let Some(&v) = self.face(f).iter().find(|&&v| v >= self.n_vertices()) {
                return Err(MeshJoinError::VertexOutOfRange {
                    face: f,
                    vertex: v,
                    n_vertices: self.n_vertices(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vtx(gnum: u64, x: f64, y: f64) -> JoinVertex {
        JoinVertex::new(gnum, [x, y, 0.0], 0.1)
    }

    /// Two unit squares sharing the edge (1,0)-(1,1).
    fn two_quads() -> JoinMesh {
        let mut m = JoinMesh::new("two_quads");
        for (g, x, y) in [(1, 0., 0.), (2, 1., 0.), (3, 1., 1.), (4, 0., 1.), (5, 2., 0.), (6, 2., 1.)] {
            m.push_vertex(vtx(g, x, y));
        }
        m.push_face(10, &[0, 1, 2, 3]).unwrap();
        m.push_face(11, &[1, 4, 5, 2]).unwrap();
        m.set_local_counts();
        m
    }

    #[test]
    fn empty_mesh_is_valid() {
        let m = JoinMesh::new("empty");
        assert_eq!(m.n_faces(), 0);
        assert_eq!(m.face_vtx_idx, vec![0]);
        assert!(m.validate_invariants().is_ok());
    }

    #[test]
    fn push_face_rejects_unknown_vertex() {
        let mut m = two_quads();
        assert!(matches!(
            m.push_face(12, &[0, 9, 1]),
            Err(MeshJoinError::VertexOutOfRange { vertex: 9, .. })
        ));
        assert_eq!(m.n_faces(), 2);
    }

    #[test]
    fn subset_compacts_vertices_in_parent_order() {
        let parent = two_quads();
        let sub = JoinMesh::from_subset("sub", &[1], &parent).unwrap();
        assert_eq!(sub.face_gnum, vec![11]);
        assert_eq!(sub.n_vertices(), 4);
        let gnums: Vec<u64> = sub.vertices.iter().map(|v| v.gnum).collect();
        assert_eq!(gnums, vec![2, 3, 5, 6]);
        assert_eq!(sub.face_vertex_gnums(0), vec![2, 5, 6, 3]);
        assert!(sub.validate_invariants().is_ok());
    }

    #[test]
    fn subset_requires_sorted_selection() {
        let parent = two_quads();
        assert!(JoinMesh::from_subset("bad", &[1, 0], &parent).is_err());
        assert!(JoinMesh::from_subset("bad", &[2], &parent).is_err());
    }

    #[test]
    fn reset_and_copy() {
        let src = two_quads();
        let mut dst = JoinMesh::new("dst");
        dst.copy_from(&src);
        assert_eq!(dst, src);
        dst.vertices[0].tolerance = 9.0;
        assert_eq!(src.vertices[0].tolerance, 0.1);
        dst.reset();
        assert_eq!(dst.name, "two_quads");
        assert_eq!(dst.n_faces(), 0);
        assert_eq!(dst.n_vertices(), 0);
    }

    #[test]
    fn extract_from_parent_arrays() {
        // parent: 3 triangles over 5 vertices; keep faces 0 and 2
        let face_vtx_idx = [0, 3, 6, 9];
        let face_vtx_lst = [0, 1, 2, 1, 3, 2, 2, 3, 4];
        let face_gnum = [100, 101, 102];
        let selected_vertices = [0, 1, 2, 3, 4];
        let data: Vec<_> = (0..5).map(|i| vtx(i + 1, i as f64, 0.0)).collect();
        let ext = MeshExtract {
            n_g_faces: 3,
            selected_faces: &[0, 2],
            face_gnum: &face_gnum,
            face_vtx_idx: &face_vtx_idx,
            face_vtx_lst: &face_vtx_lst,
            n_g_vertices: 5,
            selected_vertices: &selected_vertices,
            vtx_data: &data,
        };
        let m = JoinMesh::from_extract("ext", &ext).unwrap();
        assert_eq!(m.face_gnum, vec![100, 102]);
        assert_eq!(m.face(1), &[2, 3, 4]);
        assert_eq!(m.n_g_faces, 3);
        assert!(m.validate_invariants().is_ok());
    }

    #[test]
    fn extract_rejects_unselected_vertex() {
        let data = [vtx(1, 0.0, 0.0), vtx(2, 1.0, 0.0)];
        let ext = MeshExtract {
            n_g_faces: 1,
            selected_faces: &[0],
            face_gnum: &[1],
            face_vtx_idx: &[0, 3],
            face_vtx_lst: &[0, 1, 2],
            n_g_vertices: 3,
            selected_vertices: &[0, 1],
            vtx_data: &data,
        };
        assert!(matches!(
            JoinMesh::from_extract("bad", &ext),
            Err(MeshJoinError::InvalidSelection(_))
        ));
    }

    #[test]
    fn invariants_catch_broken_index() {
        let mut m = two_quads();
        m.face_vtx_idx[1] = 9;
        assert!(m.validate_invariants().is_err());
    }
}
