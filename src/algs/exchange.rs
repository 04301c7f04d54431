//! Face exchange between ranks and assembly of a join mesh from a global
//! face selection.
//!
//! Faces travel with their full vertex records inline, so a receiver never
//! needs a second round trip to resolve vertices. On arrival, copies of the
//! same global vertex are merged into one record holding the minimum
//! tolerance.

use hashbrown::HashMap;

use crate::algs::collective::exchange_payloads;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{
    KIND_FACE_REQUEST, KIND_FACES, WireCount, WireFace, WireGnum, WireHdr, WireVertex,
    expect_exact_len, read_header, read_records, write_records,
};
use crate::debug_invariants::DebugInvariants;
use crate::join::mesh::JoinMesh;
use crate::join::vertex::{JoinVertex, MinTolerance, VertexReducer};
use crate::mesh_error::MeshJoinError;

const REQUEST_TAG: CommTag = CommTag::new(0x4A00);
const FACES_TAG: CommTag = CommTag::new(0x4A10);

/// Rank owning global element `gnum`, where rank `r` owns
/// `(index[r], index[r + 1]]`.
pub fn resolve_owner(gnum: u64, gnum_rank_index: &[u64]) -> Option<usize> {
    let (&first, &last) = (gnum_rank_index.first()?, gnum_rank_index.last()?);
    if gnum <= first || gnum > last {
        return None;
    }
    Some(gnum_rank_index.partition_point(|&x| x < gnum) - 1)
}

/// Accumulates faces and merges vertex copies by global number.
struct MeshAssembler {
    mesh: JoinMesh,
    by_gnum: HashMap<u64, usize>,
}

impl MeshAssembler {
    fn new(name: &str) -> Self {
        Self {
            mesh: JoinMesh::new(name),
            by_gnum: HashMap::new(),
        }
    }

    fn vertex(&mut self, v: JoinVertex) -> usize {
        match self.by_gnum.get(&v.gnum) {
            Some(&id) => {
                let merged = MinTolerance.combine(&self.mesh.vertices[id], &v);
                self.mesh.vertices[id] = merged;
                id
            }
            None => {
                let id = self.mesh.push_vertex(v);
                self.by_gnum.insert(v.gnum, id);
                id
            }
        }
    }

    fn face<I>(&mut self, gnum: u64, vertices: I)
    where
        I: IntoIterator<Item = JoinVertex>,
    {
        for v in vertices {
            let id = self.vertex(v);
            self.mesh.face_vtx_lst.push(id);
        }
        self.mesh.face_gnum.push(gnum);
        self.mesh.face_vtx_idx.push(self.mesh.face_vtx_lst.len());
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), MeshJoinError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let rest = read_header(bytes, KIND_FACES)?;
        let (cnt, mut rest) = read_records::<WireCount>(rest, 1)?;
        for _ in 0..cnt[0].get() {
            let (face, tail) = read_records::<WireFace>(rest, 1)?;
            let (vertices, tail) = read_records::<WireVertex>(tail, face[0].n_vtx())?;
            self.face(face[0].gnum(), vertices.iter().map(WireVertex::get));
            rest = tail;
        }
        expect_exact_len(rest.len(), 0)
    }

    fn finish(mut self) -> JoinMesh {
        self.mesh.set_local_counts();
        self.mesh.debug_assert_invariants();
        self.mesh
    }
}

/// `mesh` must have passed `validate_invariants`.
fn encode_faces(mesh: &JoinMesh, faces: &[usize]) -> Result<Vec<u8>, MeshJoinError> {
    let mut out = Vec::new();
    write_records(&mut out, &[WireHdr::new(KIND_FACES)]);
    write_records(&mut out, &[WireCount::new(faces.len())?]);
    for &f in faces {
        let vertices = mesh.face(f);
        write_records(&mut out, &[WireFace::new(mesh.face_gnum[f], vertices.len())?]);
        let recs: Vec<WireVertex> = vertices
            .iter()
            .map(|&v| WireVertex::of(&mesh.vertices[v]))
            .collect();
        write_records(&mut out, &recs);
    }
    Ok(out)
}

fn encode_requests(gnums: &[u64]) -> Result<Vec<u8>, MeshJoinError> {
    let mut out = Vec::new();
    write_records(&mut out, &[WireHdr::new(KIND_FACE_REQUEST)]);
    write_records(&mut out, &[WireCount::new(gnums.len())?]);
    let recs: Vec<WireGnum> = gnums.iter().copied().map(WireGnum::of).collect();
    write_records(&mut out, &recs);
    Ok(out)
}

fn decode_requests(bytes: &[u8]) -> Result<Vec<u64>, MeshJoinError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let rest = read_header(bytes, KIND_FACE_REQUEST)?;
    let (cnt, rest) = read_records::<WireCount>(rest, 1)?;
    let (recs, rest) = read_records::<WireGnum>(rest, cnt[0].get())?;
    expect_exact_len(rest.len(), 0)?;
    Ok(recs.iter().map(WireGnum::get).collect())
}

fn check_send_lists(
    n_ranks: usize,
    send_rank_index: &[usize],
    send_faces: &[usize],
    send_mesh: &JoinMesh,
) -> Result<(), MeshJoinError> {
    if send_rank_index.len() != n_ranks + 1 {
        return Err(MeshJoinError::InvalidRankIndex(format!(
            "send index has {} entries for {n_ranks} ranks",
            send_rank_index.len()
        )));
    }
    if send_rank_index[0] != 0
        || send_rank_index.windows(2).any(|w| w[0] > w[1])
        || send_rank_index[n_ranks] != send_faces.len()
    {
        return Err(MeshJoinError::InvalidRankIndex(
            "send index must be non-decreasing from 0 to the number of sent faces".into(),
        ));
    }
    if let Some(&f) = send_faces.iter().find(|&&f| f >= send_mesh.n_faces()) {
        return Err(MeshJoinError::InvalidSelection(format!(
            "face {f} out of range ({} faces)",
            send_mesh.n_faces()
        )));
    }
    send_mesh.validate_invariants()
}

/// Send faces of `send_mesh` to other ranks and rebuild `recv_mesh` from
/// everything received. Collective.
///
/// `send_faces[send_rank_index[r]..send_rank_index[r + 1]]` are the local
/// face ids sent to rank `r` (the slice for this rank is kept locally).
/// Received faces are laid out by source rank, then in send order; vertices
/// are deduplicated by global number with the minimum tolerance kept.
/// `recv_mesh` keeps its name.
pub fn exchange<C: Communicator>(
    comm: &C,
    send_rank_index: &[usize],
    send_faces: &[usize],
    send_mesh: &JoinMesh,
    recv_mesh: &mut JoinMesh,
) -> Result<(), MeshJoinError> {
    let n_ranks = comm.size().max(1);
    // invalid input still takes part in the collective, with empty buffers
    let encoded = check_send_lists(n_ranks, send_rank_index, send_faces, send_mesh).and_then(|()| {
        (0..n_ranks)
            .map(|r| {
                encode_faces(
                    send_mesh,
                    &send_faces[send_rank_index[r]..send_rank_index[r + 1]],
                )
            })
            .collect::<Result<Vec<_>, _>>()
    });
    let (send, checked) = match encoded {
        Ok(send) => (send, Ok(())),
        Err(e) => (vec![Vec::new(); n_ranks], Err(e)),
    };
    let received = exchange_payloads(comm, send, FACES_TAG)?;
    checked?;

    let mut asm = MeshAssembler::new(&recv_mesh.name);
    for bytes in &received {
        asm.decode(bytes)?;
    }
    let mut mesh = asm.finish();
    mesh.n_g_faces = send_mesh.n_g_faces;
    mesh.n_g_vertices = send_mesh.n_g_vertices;
    log::debug!(
        "[rank {}] exchange: {} faces sent, {} faces and {} vertices received",
        comm.rank(),
        send_faces.len(),
        mesh.n_faces(),
        mesh.n_vertices()
    );
    *recv_mesh = mesh;
    Ok(())
}

fn check_selection(
    glob_sel: &[u64],
    gnum_rank_index: &[u64],
    n_ranks: usize,
) -> Result<(), MeshJoinError> {
    if gnum_rank_index.len() != n_ranks + 1 {
        return Err(MeshJoinError::InvalidRankIndex(format!(
            "{} entries for {n_ranks} ranks",
            gnum_rank_index.len()
        )));
    }
    if let Some(w) = gnum_rank_index.windows(2).find(|w| w[0] > w[1]) {
        return Err(MeshJoinError::InvalidRankIndex(format!(
            "index decreases from {} to {}",
            w[0], w[1]
        )));
    }
    if let Some(w) = glob_sel.windows(2).find(|w| w[0] >= w[1]) {
        return Err(MeshJoinError::InvalidSelection(format!(
            "global selection must be strictly increasing, found {} before {}",
            w[0], w[1]
        )));
    }
    Ok(())
}

/// Local faces for the requests of one rank, or the first request this rank
/// cannot serve.
fn serve_requests(
    me: usize,
    requester: usize,
    requests: &[u64],
    gnum_rank_index: &[u64],
    local_mesh: &JoinMesh,
) -> Result<Vec<usize>, MeshJoinError> {
    let base = gnum_rank_index[me];
    requests
        .iter()
        .map(|&gnum| {
            let owned = gnum > base && gnum <= gnum_rank_index[me + 1];
            let local = gnum.wrapping_sub(base + 1) as usize;
            if owned && local < local_mesh.n_faces() {
                Ok(local)
            } else {
                Err(MeshJoinError::FaceNotOwned {
                    rank: me,
                    requester,
                    gnum,
                })
            }
        })
        .collect()
}

/// Build a join mesh holding the faces of the global selection `glob_sel`.
/// Collective.
///
/// `gnum_rank_index` has one entry per rank plus one; rank `r` holds the
/// global elements `(index[r], index[r + 1]]`, element `g` being local face
/// `g - index[r] - 1` of its `local_mesh`. Fetched faces keep their own
/// `face_gnum`. The result is not ordered: run
/// [`crate::algs::order::face_order`] for a canonical layout.
pub fn create_from_selection<C: Communicator>(
    name: &str,
    glob_sel: &[u64],
    gnum_rank_index: &[u64],
    local_mesh: &JoinMesh,
    comm: &C,
) -> Result<JoinMesh, MeshJoinError> {
    let me = comm.rank();
    let n_ranks = comm.size().max(1);
    let checked = check_selection(glob_sel, gnum_rank_index, n_ranks);

    if n_ranks == 1 || comm.is_no_comm() {
        checked?;
        local_mesh.validate_invariants()?;
        let faces = serve_requests(0, 0, glob_sel, gnum_rank_index, local_mesh)?;
        let mut asm = MeshAssembler::new(name);
        for f in faces {
            let records = local_mesh.face(f).iter().map(|&v| local_mesh.vertices[v]);
            asm.face(local_mesh.face_gnum[f], records);
        }
        return Ok(asm.finish());
    }

    // errors are held back until both exchanges completed on every rank
    let index_ok = checked.is_ok();
    let mut pending = checked.err();

    // 1) route requests to owners
    let mut requests: Vec<Vec<u64>> = vec![Vec::new(); n_ranks];
    if index_ok {
        for &gnum in glob_sel {
            match resolve_owner(gnum, gnum_rank_index) {
                Some(owner) => requests[owner].push(gnum),
                None => {
                    pending = Some(MeshJoinError::UnresolvedOwner { rank: me, gnum });
                    requests.iter_mut().for_each(Vec::clear);
                    break;
                }
            }
        }
    }
    let send = requests
        .iter()
        .map(|r| {
            encode_requests(r).unwrap_or_else(|e| {
                pending.get_or_insert(e);
                Vec::new()
            })
        })
        .collect();
    let incoming = exchange_payloads(comm, send, REQUEST_TAG)?;

    // 2) owners answer with the faces they hold
    let mut send_rank_index = Vec::with_capacity(n_ranks + 1);
    let mut send_faces = Vec::new();
    send_rank_index.push(0);
    for (requester, bytes) in incoming.iter().enumerate() {
        if index_ok {
            let served = decode_requests(bytes).and_then(|gnums| {
                serve_requests(me, requester, &gnums, gnum_rank_index, local_mesh)
            });
            match served {
                Ok(faces) => send_faces.extend(faces),
                Err(e) => {
                    pending.get_or_insert(e);
                }
            }
        }
        send_rank_index.push(send_faces.len());
    }

    let mut mesh = JoinMesh::new(name);
    exchange(comm, &send_rank_index, &send_faces, local_mesh, &mut mesh)?;
    if let Some(err) = pending {
        return Err(err);
    }
    if mesh.n_faces() != glob_sel.len() {
        return Err(MeshJoinError::InvalidSelection(format!(
            "[rank {me}] received {} of {} selected faces",
            mesh.n_faces(),
            glob_sel.len()
        )));
    }
    mesh.set_local_counts();
    log::debug!(
        "[rank {me}] {name}: {} selected faces assembled over {} vertices",
        mesh.n_faces(),
        mesh.n_vertices()
    );
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    fn strip() -> JoinMesh {
        // three triangles in a strip, face numbers 7, 8, 9
        let mut m = JoinMesh::new("strip");
        for g in 1..=5u64 {
            m.push_vertex(JoinVertex::new(g, [g as f64, (g % 2) as f64, 0.0], 0.2));
        }
        m.push_face(7, &[0, 1, 2]).unwrap();
        m.push_face(8, &[1, 3, 2]).unwrap();
        m.push_face(9, &[2, 3, 4]).unwrap();
        m
    }

    #[test]
    fn owner_lookup_follows_half_open_ranges() {
        let index = [0, 3, 3, 5];
        assert_eq!(resolve_owner(1, &index), Some(0));
        assert_eq!(resolve_owner(3, &index), Some(0));
        assert_eq!(resolve_owner(4, &index), Some(2));
        assert_eq!(resolve_owner(5, &index), Some(2));
        assert_eq!(resolve_owner(0, &index), None);
        assert_eq!(resolve_owner(6, &index), None);
        assert_eq!(resolve_owner(1, &[]), None);
    }

    #[test]
    fn single_rank_copies_selected_faces() {
        let local = strip();
        let m = create_from_selection("sel", &[1, 3], &[0, 3], &local, &NoComm).unwrap();
        assert_eq!(m.face_gnum, vec![7, 9]);
        // vertex 3 (gnum 3) is shared by both faces and kept once
        assert_eq!(m.n_vertices(), 5);
        assert_eq!(m.face_vertex_gnums(1), vec![3, 4, 5]);
        assert_eq!(m.n_g_faces, 2);
    }

    #[test]
    fn single_rank_rejects_foreign_element() {
        let local = strip();
        let err = create_from_selection("sel", &[4], &[0, 4], &local, &NoComm).unwrap_err();
        assert!(matches!(err, MeshJoinError::FaceNotOwned { gnum: 4, .. }));
    }

    #[test]
    fn unsorted_selection_is_rejected() {
        let local = strip();
        assert!(matches!(
            create_from_selection("sel", &[2, 1], &[0, 3], &local, &NoComm),
            Err(MeshJoinError::InvalidSelection(_))
        ));
        assert!(matches!(
            create_from_selection("sel", &[1], &[0, 3, 4], &local, &NoComm),
            Err(MeshJoinError::InvalidRankIndex(_))
        ));
    }

    #[test]
    fn serial_exchange_merges_vertex_copies() {
        let mut local = strip();
        local.vertices[2].tolerance = 0.05;
        let mut recv = JoinMesh::new("recv");
        exchange(&NoComm, &[0, 3], &[0, 1, 2], &local, &mut recv).unwrap();
        assert_eq!(recv.name, "recv");
        assert_eq!(recv.face_gnum, vec![7, 8, 9]);
        assert_eq!(recv.n_vertices(), 5);
        let v3 = recv.vertices.iter().find(|v| v.gnum == 3).unwrap();
        assert_eq!(v3.tolerance, 0.05);
    }

    #[test]
    fn duplicate_vertex_copies_keep_min_tolerance() {
        let mut asm = MeshAssembler::new("dup");
        let a = JoinVertex::new(4, [0.0; 3], 0.3);
        let b = JoinVertex::new(4, [0.0; 3], 0.1);
        let c = JoinVertex::new(5, [1.0, 0.0, 0.0], 0.2);
        asm.face(1, [a, c]);
        asm.face(2, [c, b]);
        let m = asm.finish();
        assert_eq!(m.n_vertices(), 2);
        assert_eq!(m.vertices[0].tolerance, 0.1);
        assert_eq!(m.face(1), &[1, 0]);
    }

    #[test]
    fn face_wire_roundtrip_through_assembler() {
        let local = strip();
        let bytes = encode_faces(&local, &[2, 0]).unwrap();
        let mut asm = MeshAssembler::new("wire");
        asm.decode(&bytes).unwrap();
        let m = asm.finish();
        assert_eq!(m.face_gnum, vec![9, 7]);
        assert_eq!(m.face_vertex_gnums(1), vec![1, 2, 3]);
        assert!(MeshAssembler::new("x").decode(&bytes[..bytes.len() - 3]).is_err());
    }
}
