//! Diagnostic text output for join structures.

pub mod dump;

pub use dump::{dump_edges, dump_mesh, dump_vertex};
