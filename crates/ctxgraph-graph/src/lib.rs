pub mod graph;
pub mod traversal;

pub use graph::*;
pub use traversal::*;
