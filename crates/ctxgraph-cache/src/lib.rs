pub mod cache;
pub mod coordinator;
pub mod invalidation;
pub mod store;

pub use cache::*;
pub use coordinator::*;
pub use invalidation::*;
pub use store::*;

// Re-export common types for convenience
pub use ctxgraph_core::{CtxGraphError, InvalidationOutcome, InvalidationSink, Result};
