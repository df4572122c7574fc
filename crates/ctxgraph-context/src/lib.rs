//! Context assembly for CtxGraph: enumerate a root, reuse cached artifacts,
//! enrich them with dependency and git signals, then rank and bound the
//! result for a task.

pub mod builder;
pub mod bundle;
pub mod incremental;
pub mod relevance;

pub use builder::{ContextBuilder, ContextBuilderDeps};
pub use bundle::*;
pub use incremental::*;
pub use relevance::*;
