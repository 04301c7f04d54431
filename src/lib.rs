#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-join
//!
//! mesh-join reconciles independently partitioned, non-conforming face
//! selections of a distributed mesh into a single conforming join mesh. It
//! provides the join-mesh container, on-demand edge extraction,
//! order-independent vertex tolerance synchronization, structural cleaning
//! and canonical ordering, selection exchange between ranks, and the
//! structural update that applies an externally computed merge plan.
//!
//! ## Features
//! - CSR face→vertex connectivity with value semantics (`JoinMesh`)
//! - Edge view with signed, orientation-aware lookup (`JoinEdges`)
//! - Pluggable vertex reducers (`MinTolerance`, `MaxTolerance`)
//! - Pluggable communication backends (serial, in-process threads, MPI)
//! - Serial, simulated multi-rank and property-based tests
//!
//! ## Determinism
//!
//! Every cross-rank reduction folds records with a total order, and every
//! mesh assembled from a global selection is brought to a canonical layout
//! by [`algs::order::face_order`], so results do not depend on the number of
//! ranks or on message arrival order.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-join = "0.1"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! A typical pipeline on each rank:
//!
//! ```no_run
//! use mesh_join::prelude::*;
//!
//! # fn run(local: &JoinMesh, sel: &[u64], index: &[u64]) -> Result<(), MeshJoinError> {
//! let comm = NoComm;
//! let mut mesh = create_from_selection("join", sel, index, local, &comm)?;
//! face_order(&mut mesh)?;
//! vertex_clean(&mut mesh)?;
//! clean(&mut mesh, 0)?;
//! sync_vertices(&mut mesh, &comm)?;
//! let edges = define_edges(&mesh)?;
//! # let _ = edges;
//! # Ok(())
//! # }
//! ```

pub mod algs;
pub mod debug_invariants;
pub mod io;
pub mod join;
pub mod mesh_error;

pub use debug_invariants::DebugInvariants;
pub use mesh_error::MeshJoinError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::clean::{clean, vertex_clean};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{CommTag, Communicator, NoComm, RayonComm, Wait};
    pub use crate::algs::exchange::{create_from_selection, exchange};
    pub use crate::algs::order::face_order;
    pub use crate::algs::sync::{
        ToleranceRange, define_tolerance, minmax_tol, reduce_vertices, sync_vertices,
        sync_vertices_with,
    };
    pub use crate::algs::update::{EdgeInsertions, update};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::join::edges::{
        JoinEdges, define_edges, edge_face_adjacency, edge_index, get_edge, sync_edge_count,
    };
    pub use crate::join::geometry::face_normals;
    pub use crate::join::mesh::{JoinMesh, MeshExtract};
    pub use crate::join::param::JoinParam;
    pub use crate::join::vertex::{JoinVertex, MaxTolerance, MinTolerance, VertexReducer};
    pub use crate::mesh_error::MeshJoinError;
}
