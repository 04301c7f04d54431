//! Join algorithms: communication plumbing, selection exchange, vertex
//! synchronization, cleaning, ordering and update.

pub mod clean;
pub mod collective;
pub mod communicator;
pub mod exchange;
pub mod order;
pub mod sync;
pub mod update;
pub mod wire;

pub use clean::{clean, vertex_clean};
pub use exchange::{create_from_selection, exchange};
pub use order::face_order;
pub use sync::{
    ToleranceRange, define_tolerance, minmax_tol, reduce_vertices, sync_vertices,
    sync_vertices_with,
};
pub use update::{EdgeInsertions, update};
