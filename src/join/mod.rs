//! Join-mesh data structures: vertex records, the mesh container, its
//! derived edge view and face geometry.

pub mod edges;
pub mod geometry;
pub mod mesh;
pub mod param;
pub mod vertex;

pub use edges::{JoinEdges, define_edges, edge_face_adjacency, get_edge, sync_edge_count};
pub use mesh::{JoinMesh, MeshExtract};
pub use param::JoinParam;
pub use vertex::{JoinVertex, MaxTolerance, MinTolerance, VertexReducer};
