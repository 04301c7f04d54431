//! Face normals of a join mesh.
//!
//! A polygon is split into a fan of triangles around its barycenter; the
//! normal is the normalized sum of the triangle area vectors. This stays
//! well defined for warped and non-convex faces, where the cross product of
//! two edges does not.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::join::mesh::JoinMesh;

const EPS: f64 = 1e-300;

/// Unit normal of every face, in face order.
///
/// Faces with a vanishing area vector get `[0.0; 3]`.
pub fn face_normals(mesh: &JoinMesh) -> Vec<[f64; 3]> {
    #[cfg(feature = "rayon")]
    {
        (0..mesh.n_faces())
            .into_par_iter()
            .map(|f| face_normal(mesh, f))
            .collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        (0..mesh.n_faces()).map(|f| face_normal(mesh, f)).collect()
    }
}

/// Unit normal of face `f`.
pub fn face_normal(mesh: &JoinMesh, f: usize) -> [f64; 3] {
    let coords: Vec<[f64; 3]> = mesh
        .face(f)
        .iter()
        .map(|&v| mesh.vertices[v].coord)
        .collect();
    if coords.len() < 3 {
        return [0.0; 3];
    }

    let inv_n = 1.0 / coords.len() as f64;
    let mut center = [0.0; 3];
    for c in &coords {
        for k in 0..3 {
            center[k] += c[k] * inv_n;
        }
    }

    let mut area = [0.0; 3];
    for (i, &a) in coords.iter().enumerate() {
        let b = coords[(i + 1) % coords.len()];
        let t = cross(sub(a, center), sub(b, center));
        for k in 0..3 {
            area[k] += 0.5 * t[k];
        }
    }

    let len = norm(area);
    if len <= EPS {
        return [0.0; 3];
    }
    area.map(|x| x / len)
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(a: [f64; 3]) -> f64 {
    (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::vertex::JoinVertex;

    fn mesh_with(points: &[[f64; 3]], faces: &[&[usize]]) -> JoinMesh {
        let mut m = JoinMesh::new("normals");
        for (i, &p) in points.iter().enumerate() {
            m.push_vertex(JoinVertex::new(i as u64 + 1, p, 0.1));
        }
        for (f, face) in faces.iter().enumerate() {
            m.push_face(f as u64 + 1, face).unwrap();
        }
        m
    }

    #[test]
    fn counter_clockwise_square_points_up() {
        let m = mesh_with(
            &[[0., 0., 0.], [1., 0., 0.], [1., 1., 0.], [0., 1., 0.]],
            &[&[0, 1, 2, 3], &[3, 2, 1, 0]],
        );
        let n = face_normals(&m);
        assert!((n[0][2] - 1.0).abs() < 1e-12);
        assert!((n[1][2] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn non_convex_face_keeps_orientation() {
        // L-shaped hexagon in the xz-plane
        let m = mesh_with(
            &[
                [0., 0., 0.],
                [2., 0., 0.],
                [2., 0., 1.],
                [1., 0., 1.],
                [1., 0., 2.],
                [0., 0., 2.],
            ],
            &[&[0, 1, 2, 3, 4, 5]],
        );
        let n = face_normal(&m, 0);
        assert!((n[1] + 1.0).abs() < 1e-12, "{n:?}");
    }

    #[test]
    fn collapsed_face_has_zero_normal() {
        let m = mesh_with(&[[0., 0., 0.], [1., 1., 1.], [2., 2., 2.]], &[&[0, 1, 2]]);
        assert_eq!(face_normal(&m, 0), [0.0; 3]);
    }
}
