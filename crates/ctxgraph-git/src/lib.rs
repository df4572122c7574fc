//! CtxGraph Git integration: branch, commit and change-set queries over
//! libgit2, exposed as a `GitProvider`, plus a repository watcher that feeds
//! change events into the invalidation pipeline.
//!
//! libgit2 handles are not `Sync`; the provider serializes access and runs
//! every call on the blocking pool.

pub mod errors;
pub mod provider;
pub mod repo;
pub mod types;
pub mod watcher;

pub use errors::{GitIntegrationError, Result};
pub use provider::Git2Provider;
pub use repo::GitRepository;
pub use types::WatchOptions;
pub use watcher::RepoWatcher;
