use crate::{CacheKey, CacheStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctxgraph_core::{
    ChangeType, CtxGraphError, FailedTarget, InvalidationConfig, InvalidationOutcome,
    InvalidationRequest, InvalidationSink, Result,
};
use ctxgraph_graph::DependencyGraph;
use dashmap::DashMap;
use futures::future::join_all;
use globset::Glob;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

/// Invalidation event types
#[derive(Debug, Clone)]
pub enum InvalidationEvent {
    FilesInvalidated {
        paths: Vec<String>,
        reason: ChangeType,
        at: DateTime<Utc>,
    },
    DirectoryInvalidated {
        directory: String,
        recursive: bool,
        paths: Vec<String>,
    },
    PatternInvalidated {
        directory: String,
        pattern: String,
        paths: Vec<String>,
    },
    DependencyChainInvalidated {
        root: String,
        paths: Vec<String>,
        circular: bool,
    },
}

/// Trait for handling invalidation events
#[async_trait]
pub trait InvalidationListener: Send + Sync {
    async fn on_invalidation(&self, event: InvalidationEvent) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryOptions {
    pub recursive: bool,
}

impl Default for DirectoryOptions {
    fn default() -> Self {
        Self { recursive: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyInvalidationReport {
    /// Every file visited by the walk, in breadth-first order.
    pub invalidated_files: Vec<String>,
    pub circular_dependency_detected: bool,
    /// Number of breadth-first layers, the start file being the first.
    pub levels: usize,
    pub failed: Vec<FailedTarget>,
    pub entries_removed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeSummary {
    pub total_invalidated: usize,
    pub dependency_levels: usize,
    pub circular_dependency_detected: bool,
}

struct TargetResult {
    path: String,
    removed: usize,
    failure: Option<FailedTarget>,
}

/// Applies invalidations to the cache store and dependency graph.
///
/// Each target path is processed under its own async mutex, so two
/// invalidations of the same path complete in the order they started.
/// Targets within one call are attempted independently; a failing target is
/// recorded and never blocks the rest.
pub struct Invalidator {
    store: Arc<dyn CacheStore>,
    graph: Arc<DependencyGraph>,
    config: InvalidationConfig,
    listeners: RwLock<Vec<Arc<dyn InvalidationListener>>>,
    epoch: AtomicU64,
    invalidated_at: DashMap<String, u64>,
    path_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl Invalidator {
    pub fn new(
        store: Arc<dyn CacheStore>,
        graph: Arc<DependencyGraph>,
        config: InvalidationConfig,
    ) -> Self {
        Self {
            store,
            graph,
            config,
            listeners: RwLock::new(Vec::new()),
            epoch: AtomicU64::new(0),
            invalidated_at: DashMap::new(),
            path_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn add_listener(&self, listener: Arc<dyn InvalidationListener>) {
        self.listeners.write().push(listener);
    }

    /// Latest completed invalidation epoch; 0 before any invalidation.
    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn last_invalidated_epoch(&self, path: &str) -> Option<u64> {
        self.invalidated_at.get(path).map(|e| *e)
    }

    /// Paths whose most recent invalidation completed after `epoch`.
    pub fn invalidated_since(&self, epoch: u64) -> BTreeSet<String> {
        self.invalidated_at
            .iter()
            .filter(|e| *e.value() > epoch)
            .map(|e| e.key().clone())
            .collect()
    }

    pub async fn invalidate_file(&self, path: &str) -> Result<InvalidationOutcome> {
        self.invalidate_files([path], ChangeType::Modify).await
    }

    pub async fn invalidate_files<I, S>(&self, paths: I, reason: ChangeType) -> Result<InvalidationOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = InvalidationRequest::new(paths, reason);
        let outcome = self.invalidate_targets(&request.targets).await;

        self.notify_listeners(InvalidationEvent::FilesInvalidated {
            paths: outcome.successful.clone(),
            reason,
            at: request.received_at,
        })
        .await;
        Ok(outcome)
    }

    /// Invalidate every cached file under `dir`. Without `recursive`, only
    /// direct children are affected.
    pub async fn invalidate_directory(
        &self,
        dir: &str,
        options: DirectoryOptions,
    ) -> Result<InvalidationOutcome> {
        let root = Path::new(dir).to_path_buf();
        let recursive = options.recursive;
        let matcher = move |key: &CacheKey| match Path::new(&key.file_path).strip_prefix(&root) {
            Ok(rest) => {
                let depth = rest.components().count();
                depth == 1 || (recursive && depth > 1)
            }
            Err(_) => false,
        };

        let paths = self.cached_paths(&matcher).await?;
        let outcome = self.invalidate_targets(&paths).await;
        info!(
            "Invalidated directory {} (recursive: {}): {} files",
            dir,
            recursive,
            outcome.successful.len()
        );

        self.notify_listeners(InvalidationEvent::DirectoryInvalidated {
            directory: dir.to_string(),
            recursive,
            paths: outcome.successful.clone(),
        })
        .await;
        Ok(outcome)
    }

    /// Invalidate cached files under `dir` whose path relative to `dir`
    /// matches `pattern`.
    pub async fn invalidate_pattern(&self, dir: &str, pattern: &str) -> Result<InvalidationOutcome> {
        let glob = Glob::new(pattern)
            .map_err(|e| CtxGraphError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?
            .compile_matcher();
        let root = Path::new(dir).to_path_buf();
        let matcher = move |key: &CacheKey| match Path::new(&key.file_path).strip_prefix(&root) {
            Ok(rest) => rest.components().count() > 0 && glob.is_match(rest),
            Err(_) => false,
        };

        let paths = self.cached_paths(&matcher).await?;
        let outcome = self.invalidate_targets(&paths).await;
        debug!(
            "Pattern {} under {} matched {} files",
            pattern,
            dir,
            paths.len()
        );

        self.notify_listeners(InvalidationEvent::PatternInvalidated {
            directory: dir.to_string(),
            pattern: pattern.to_string(),
            paths: outcome.successful.clone(),
        })
        .await;
        Ok(outcome)
    }

    /// Breadth-first walk over dependents starting at `path`, invalidating
    /// every visited file exactly once.
    pub async fn invalidate_dependency_chain(&self, path: &str) -> DependencyInvalidationReport {
        let layers = self.graph.dependent_levels(path);
        let visited: Vec<String> = layers.iter().flatten().cloned().collect();
        let visited_set: BTreeSet<String> = visited.iter().cloned().collect();
        let circular = self.graph.has_cycle_among(&visited_set);
        if circular {
            warn!("Circular dependency detected while invalidating from {}", path);
        }

        let outcome = self.invalidate_targets(&visited).await;
        info!(
            "Dependency chain from {}: {} files over {} levels",
            path,
            visited.len(),
            layers.len()
        );

        self.notify_listeners(InvalidationEvent::DependencyChainInvalidated {
            root: path.to_string(),
            paths: visited.clone(),
            circular,
        })
        .await;

        DependencyInvalidationReport {
            invalidated_files: visited,
            circular_dependency_detected: circular,
            levels: layers.len(),
            failed: outcome.failed,
            entries_removed: outcome.entries_removed,
        }
    }

    pub async fn invalidate_with_dependency_graph(&self, path: &str) -> Result<CascadeSummary> {
        let report = self.invalidate_dependency_chain(path).await;
        Ok(CascadeSummary {
            total_invalidated: report.invalidated_files.len(),
            dependency_levels: report.levels,
            circular_dependency_detected: report.circular_dependency_detected,
        })
    }

    /// Entry point for batched requests. Only paths that were themselves
    /// deleted leave the graph.
    pub async fn apply(&self, request: InvalidationRequest) -> Result<InvalidationOutcome> {
        for path in &request.deleted {
            self.graph.remove_file(path);
        }
        self.invalidate_files(request.targets, request.reason).await
    }

    async fn cached_paths(
        &self,
        matcher: &(dyn for<'k> Fn(&'k CacheKey) -> bool + Send + Sync),
    ) -> Result<Vec<String>> {
        let keys = self.store.keys_matching(matcher).await?;
        let paths: BTreeSet<String> = keys.into_iter().map(|k| k.file_path).collect();
        Ok(paths.into_iter().collect())
    }

    async fn invalidate_targets(&self, paths: &[String]) -> InvalidationOutcome {
        let results = join_all(paths.iter().map(|p| self.invalidate_target(p))).await;

        let mut outcome = InvalidationOutcome::default();
        for result in results {
            outcome.entries_removed += result.removed;
            match result.failure {
                Some(failed) => outcome.failed.push(failed),
                None => outcome.successful.push(result.path),
            }
        }
        outcome
    }

    fn path_lock(&self, path: &str) -> Arc<AsyncMutex<()>> {
        self.path_locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn invalidate_target(&self, path: &str) -> TargetResult {
        let lock = self.path_lock(path);
        let _guard = lock.lock().await;

        let owned = path.to_string();
        let keys = match self
            .store
            .keys_matching(&move |k: &CacheKey| k.file_path == owned)
            .await
        {
            Ok(keys) => keys,
            Err(e) => {
                return TargetResult {
                    path: path.to_string(),
                    removed: 0,
                    failure: Some(FailedTarget {
                        path: path.to_string(),
                        error: e.to_string(),
                        recovered: false,
                    }),
                };
            }
        };

        let mut removed = 0;
        let mut failure = None;
        for key in keys {
            match self.delete_with_retry(&key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    let recovered = self.store.mark_stale(&key);
                    error!(
                        "Failed to delete {} after retries, marked stale: {}",
                        key, recovered
                    );
                    failure = Some(FailedTarget {
                        path: path.to_string(),
                        error: e.to_string(),
                        recovered,
                    });
                }
            }
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.invalidated_at.insert(path.to_string(), epoch);

        TargetResult {
            path: path.to_string(),
            removed,
            failure,
        }
    }

    async fn delete_with_retry(&self, key: &CacheKey) -> Result<bool> {
        let attempts = self.config.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.store.delete(key).await {
                Ok(deleted) => return Ok(deleted),
                Err(e) if e.is_transient() && attempt < attempts => {
                    debug!(
                        "Delete of {} failed (attempt {}/{}): {}",
                        key, attempt, attempts, e
                    );
                    tokio::time::sleep(self.config.retry_delay() * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn notify_listeners(&self, event: InvalidationEvent) {
        let listeners: Vec<Arc<dyn InvalidationListener>> = self.listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener.on_invalidation(event.clone()).await {
                warn!("Invalidation listener failed: {:?}", e);
            }
        }
    }
}

#[async_trait]
impl InvalidationSink for Invalidator {
    async fn invalidate(&self, request: InvalidationRequest) -> Result<InvalidationOutcome> {
        self.apply(request).await
    }
}

/// Simple logging invalidation listener
pub struct LoggingInvalidationListener;

#[async_trait]
impl InvalidationListener for LoggingInvalidationListener {
    async fn on_invalidation(&self, event: InvalidationEvent) -> Result<()> {
        match event {
            InvalidationEvent::FilesInvalidated { paths, reason, at } => {
                info!(
                    "Cache invalidation: {} files ({}) at {}",
                    paths.len(),
                    reason,
                    at
                );
            }
            InvalidationEvent::DirectoryInvalidated {
                directory,
                recursive,
                paths,
            } => {
                info!(
                    "Cache invalidation: directory '{}' (recursive: {}), {} files",
                    directory,
                    recursive,
                    paths.len()
                );
            }
            InvalidationEvent::PatternInvalidated {
                directory,
                pattern,
                paths,
            } => {
                info!(
                    "Cache invalidation: pattern '{}' under '{}', {} files",
                    pattern,
                    directory,
                    paths.len()
                );
            }
            InvalidationEvent::DependencyChainInvalidated {
                root,
                paths,
                circular,
            } => {
                info!(
                    "Cache invalidation: dependency chain from '{}', {} files, circular: {}",
                    root,
                    paths.len(),
                    circular
                );
            }
        }
        Ok(())
    }
}
