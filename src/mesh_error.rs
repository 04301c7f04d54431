//! MeshJoinError: Unified error type for mesh-join public APIs
//!
//! Every inconsistency detected by the join engine surfaces here, carrying
//! enough context (rank, face, vertex or edge) for a postmortem. None of the
//! variants is meant to be recovered from: callers propagate them and stop.

use thiserror::Error;

/// Unified error type for mesh-join operations.
#[derive(Debug, Error)]
pub enum MeshJoinError {
    /// `get_edge` found no edge between two vertices of a face.
    #[error("Topology error: no edge between local vertices {v1} and {v2}")]
    MissingEdge { v1: usize, v2: usize },

    /// A requested global face number lies outside every rank's range.
    #[error("[rank {rank}] global face {gnum} has no owner in the rank index")]
    UnresolvedOwner { rank: usize, gnum: u64 },

    /// The owner resolved by the rank index does not hold the face.
    #[error("[rank {rank}] global face {gnum} requested by rank {requester} is not held locally")]
    FaceNotOwned {
        rank: usize,
        requester: usize,
        gnum: u64,
    },

    /// A selection list is not sorted, has duplicates or is out of range.
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// The rank index is malformed (wrong length or not monotonic).
    #[error("Invalid rank index: {0}")]
    InvalidRankIndex(String),

    /// Global numbers are 1-based; 0 is reserved.
    #[error("[rank {rank}] vertex {vertex} carries the invalid global number 0")]
    InvalidGnum { rank: usize, vertex: usize },

    /// A face is left with fewer than 3 vertices after cleaning.
    #[error(
        "face {face} (global number {gnum}) is defined by {n_vertices} vertices after cleaning (excessive merging)"
    )]
    DegenerateFace {
        face: usize,
        gnum: u64,
        n_vertices: usize,
    },

    /// Two copies of a global face disagree on their connectivity.
    #[error("global face {gnum} appears twice with different connectivity")]
    InconsistentFace { gnum: u64 },

    /// A face references a vertex that does not exist.
    #[error("face {face} references vertex {vertex}, but the mesh has {n_vertices} vertices")]
    VertexOutOfRange {
        face: usize,
        vertex: usize,
        n_vertices: usize,
    },

    /// Malformed face→vertex index or face numbering.
    #[error("Invalid connectivity: {0}")]
    InvalidConnectivity(String),

    /// The old→new vertex map does not fit the mesh.
    #[error("Invalid vertex map: {0}")]
    InvalidVertexMap(String),

    /// The per-edge insertion lists do not fit the edge set.
    #[error("Invalid edge insertions: {0}")]
    InvalidInsertions(String),

    /// A new vertex id received no record during an update.
    #[error("new vertex {0} is not the image of any old vertex and no vertex table was supplied")]
    UncoveredVertex(usize),

    /// Communication failure with a neighbor rank.
    #[error("Communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A received message does not decode into the expected records.
    #[error("Wire format error: {0}")]
    WireError(String),

    /// MPI could not be initialized.
    #[error("MPI initialization failed")]
    MpiInit,

    /// I/O failure while dumping.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Simple error type wrapping a message for communication failures.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CommError(pub String);
