#![allow(dead_code)]
use std::sync::Arc;

use mesh_join::prelude::*;

/// Run `f` once per simulated rank, each on its own thread, and return the
/// results in rank order.
pub fn on_ranks<T, F>(n_ranks: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(RayonComm) -> T + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = (0..n_ranks)
        .map(|r| {
            let f = Arc::clone(&f);
            std::thread::spawn(move || f(RayonComm::new(r, n_ranks)))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank thread panicked"))
        .collect()
}

/// Strip of `n` unit quads along x. Face `k` has global number `k + 1`;
/// bottom vertex `i` has global number `i + 1`, top vertex `i` has
/// `n + 2 + i`.
pub fn quad_strip(n: usize) -> JoinMesh {
    let mut m = JoinMesh::new("strip");
    for i in 0..=n {
        m.push_vertex(JoinVertex::new(i as u64 + 1, [i as f64, 0.0, 0.0], 0.25));
    }
    for i in 0..=n {
        m.push_vertex(JoinVertex::new(
            (n + 2 + i) as u64,
            [i as f64, 1.0, 0.0],
            0.25,
        ));
    }
    let top = n + 1;
    for k in 0..n {
        m.push_face(k as u64 + 1, &[k, k + 1, top + k + 1, top + k])
            .unwrap();
    }
    m.n_g_faces = n as u64;
    m.n_g_vertices = 2 * (n as u64 + 1);
    m
}

/// Split `global` between ranks: `owned[r]` lists the (sorted) faces held
/// by rank `r`. Returns the local meshes and the element rank index.
pub fn distribute(global: &JoinMesh, owned: &[Vec<usize>]) -> (Vec<JoinMesh>, Vec<u64>) {
    let mut index = vec![0u64];
    let mut locals = Vec::with_capacity(owned.len());
    for faces in owned {
        locals.push(JoinMesh::from_subset("local", faces, global).unwrap());
        index.push(index.last().unwrap() + faces.len() as u64);
    }
    (locals, index)
}

/// Round-robin split of the faces of `global` over `n_ranks`.
pub fn round_robin(global: &JoinMesh, n_ranks: usize) -> Vec<Vec<usize>> {
    (0..n_ranks)
        .map(|r| (0..global.n_faces()).filter(|f| f % n_ranks == r).collect())
        .collect()
}
