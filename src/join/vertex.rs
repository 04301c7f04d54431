//! Vertex records of a join mesh and the reduction policies over them.
//!
//! A [`JoinVertex`] is the unit replicated across ranks: the same global
//! number can live on several partitions with slightly different
//! tolerances. [`VertexReducer`] is the pluggable combinator used to
//! reconcile those copies. Implementations must be associative and
//! commutative over whole records so that the outcome never depends on how
//! many ranks contribute or in which order their copies arrive.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// One vertex of a join mesh.
#[derive(Copy, Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct JoinVertex {
    /// Global vertex number (1-based, unique within a finalized mesh).
    pub gnum: u64,
    /// Radius of the sphere in which intersection and merge are possible.
    pub tolerance: f64,
    pub coord: [f64; 3],
}

impl JoinVertex {
    pub fn new(gnum: u64, coord: [f64; 3], tolerance: f64) -> Self {
        Self {
            gnum,
            tolerance,
            coord,
        }
    }

    /// Euclidean distance between two vertices.
    pub fn distance(&self, other: &JoinVertex) -> f64 {
        let d: f64 = (0..3)
            .map(|k| (self.coord[k] - other.coord[k]).powi(2))
            .sum();
        d.sqrt()
    }
}

impl fmt::Display for JoinVertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:10} | [{:+.6e}, {:+.6e}, {:+.6e}] | tol {:.6e}",
            self.gnum, self.coord[0], self.coord[1], self.coord[2], self.tolerance
        )
    }
}

/// Total order on whole records: tolerance first, then global number, then
/// coordinates. Used to break ties deterministically.
pub fn cmp_records(a: &JoinVertex, b: &JoinVertex) -> Ordering {
    a.tolerance
        .total_cmp(&b.tolerance)
        .then(a.gnum.cmp(&b.gnum))
        .then_with(|| {
            a.coord
                .iter()
                .zip(&b.coord)
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        })
}

/// Associative, commutative combinator over vertex records.
pub trait VertexReducer: Send + Sync {
    /// Neutral element: `combine(identity, v) == v` for every record.
    fn identity(&self) -> JoinVertex;
    fn combine(&self, a: &JoinVertex, b: &JoinVertex) -> JoinVertex;

    /// Fold a sequence of records, starting from the identity.
    fn reduce<'a, I>(&self, items: I) -> JoinVertex
    where
        I: IntoIterator<Item = &'a JoinVertex>,
        Self: Sized,
    {
        items
            .into_iter()
            .fold(self.identity(), |acc, v| self.combine(&acc, v))
    }
}

/// Keeps the record with the smallest tolerance.
#[derive(Copy, Clone, Debug, Default)]
pub struct MinTolerance;

/// Keeps the record with the largest tolerance.
#[derive(Copy, Clone, Debug, Default)]
pub struct MaxTolerance;

impl VertexReducer for MinTolerance {
    fn identity(&self) -> JoinVertex {
        JoinVertex {
            gnum: u64::MAX,
            tolerance: f64::INFINITY,
            coord: [f64::INFINITY; 3],
        }
    }

    fn combine(&self, a: &JoinVertex, b: &JoinVertex) -> JoinVertex {
        if cmp_records(a, b) == Ordering::Greater {
            *b
        } else {
            *a
        }
    }
}

impl VertexReducer for MaxTolerance {
    fn identity(&self) -> JoinVertex {
        JoinVertex {
            gnum: 0,
            tolerance: f64::NEG_INFINITY,
            coord: [f64::NEG_INFINITY; 3],
        }
    }

    fn combine(&self, a: &JoinVertex, b: &JoinVertex) -> JoinVertex {
        if cmp_records(a, b) == Ordering::Less {
            *b
        } else {
            *a
        }
    }
}
