use async_trait::async_trait;
use ctxgraph_cache::{
    Artifact, BatchCoordinator, CacheEntry, CacheKey, CacheStats, CacheStore, Invalidator,
    MemoryCacheStore,
};
use ctxgraph_core::{
    BatchConfig, ChangeType, CtxGraphError, InvalidationConfig, Language, Result,
};
use ctxgraph_graph::DependencyGraph;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// How deletes of one path misbehave.
#[derive(Clone, Copy)]
struct FailMode {
    /// Failures left before deletes succeed; `None` fails forever
    remaining: Option<u32>,
    transient: bool,
}

/// Memory store whose deletes can be made to fail per path.
struct FlakyStore {
    inner: MemoryCacheStore,
    failures: Mutex<HashMap<String, FailMode>>,
    delete_attempts: AtomicUsize,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryCacheStore::new(1 << 20),
            failures: Mutex::new(HashMap::new()),
            delete_attempts: AtomicUsize::new(0),
        }
    }

    fn fail(&self, path: &str, mode: FailMode) {
        self.failures.lock().insert(path.to_string(), mode);
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: CacheKey, artifact: Artifact) -> Result<()> {
        self.inner.put(key, artifact).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.delete_attempts.fetch_add(1, Ordering::SeqCst);
        let failure = {
            let mut failures = self.failures.lock();
            match failures.get_mut(&key.file_path) {
                Some(mode) => match mode.remaining {
                    Some(0) => None,
                    Some(n) => {
                        mode.remaining = Some(n - 1);
                        Some(mode.transient)
                    }
                    None => Some(mode.transient),
                },
                None => None,
            }
        };
        match failure {
            Some(transient) => Err(CtxGraphError::store_io("disk unavailable", transient)),
            None => self.inner.delete(key).await,
        }
    }

    async fn keys_matching(
        &self,
        predicate: &(dyn for<'k> Fn(&'k CacheKey) -> bool + Send + Sync),
    ) -> Result<Vec<CacheKey>> {
        self.inner.keys_matching(predicate).await
    }

    async fn update_score(&self, key: &CacheKey, score: f64) -> Result<bool> {
        self.inner.update_score(key, score).await
    }

    fn mark_stale(&self, key: &CacheKey) -> bool {
        self.inner.mark_stale(key)
    }

    async fn stats(&self) -> CacheStats {
        self.inner.stats().await
    }
}

fn key(path: &str) -> CacheKey {
    CacheKey::new(path, Language::TypeScript, "deadbeef", "")
}

async fn seeded(paths: &[&str]) -> (Arc<FlakyStore>, Invalidator) {
    let store = Arc::new(FlakyStore::new());
    for path in paths {
        store
            .put(key(path), Artifact::new(b"ast".to_vec(), Vec::new(), 0))
            .await
            .unwrap();
    }
    let invalidator = Invalidator::new(
        store.clone(),
        Arc::new(DependencyGraph::new()),
        InvalidationConfig::default(),
    );
    (store, invalidator)
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let (store, invalidator) = seeded(&["a.ts"]).await;
    store.fail(
        "a.ts",
        FailMode {
            remaining: Some(2),
            transient: true,
        },
    );

    let outcome = invalidator.invalidate_file("a.ts").await.unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.entries_removed, 1);
    assert_eq!(store.delete_attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_mark_entry_stale() {
    let (store, invalidator) = seeded(&["a.ts"]).await;
    store.fail(
        "a.ts",
        FailMode {
            remaining: None,
            transient: true,
        },
    );

    let outcome = invalidator.invalidate_file("a.ts").await.unwrap();
    assert_eq!(outcome.failed.len(), 1);
    assert!(outcome.failed[0].recovered);
    assert_eq!(store.delete_attempts.load(Ordering::SeqCst), 3);
    assert!(store.get(&key("a.ts")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_permanent_failures_are_not_retried() {
    let (store, invalidator) = seeded(&["a.ts"]).await;
    store.fail(
        "a.ts",
        FailMode {
            remaining: None,
            transient: false,
        },
    );

    let outcome = invalidator.invalidate_file("a.ts").await.unwrap();
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(store.delete_attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_one_failing_target_does_not_block_others() {
    let paths = ["t0.ts", "t1.ts", "t2.ts", "t3.ts", "t4.ts"];
    let (store, invalidator) = seeded(&paths).await;
    store.fail(
        "t2.ts",
        FailMode {
            remaining: None,
            transient: false,
        },
    );

    let outcome = invalidator
        .invalidate_files(paths, ChangeType::Modify)
        .await
        .unwrap();
    assert_eq!(outcome.successful.len(), 4);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].path, "t2.ts");
    assert!(!outcome.successful.contains(&"t2.ts".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_coordinator_drives_invalidator() {
    let (store, invalidator) = seeded(&["f1", "f2", "f3", "f4", "f5", "keep"]).await;
    let invalidator = Arc::new(invalidator);
    let coordinator = BatchCoordinator::new(invalidator.clone(), BatchConfig::default());

    let pending: Vec<_> = ["f1", "f2", "f3", "f4", "f5"]
        .iter()
        .map(|p| coordinator.submit(*p, ChangeType::Modify))
        .collect();
    for result in futures::future::join_all(pending).await {
        result.unwrap();
    }

    for path in ["f1", "f2", "f3", "f4", "f5"] {
        assert!(store.get(&key(path)).await.unwrap().is_none());
    }
    assert!(store.get(&key("keep")).await.unwrap().is_some());
    assert_eq!(invalidator.invalidated_since(0).len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_deleted_file_in_window_keeps_modified_siblings_in_graph() {
    let (_store, invalidator) = seeded(&["/p/a.js", "/p/gone.js"]).await;
    let graph = invalidator.graph().clone();
    graph.add_edge("/p/app.js", "/p/a.js").unwrap();
    graph.add_edge("/p/app.js", "/p/gone.js").unwrap();
    let invalidator = Arc::new(invalidator);
    let coordinator = BatchCoordinator::new(invalidator.clone(), BatchConfig::default());

    let modified = coordinator.submit("/p/a.js", ChangeType::Modify);
    let deleted = coordinator.submit("/p/gone.js", ChangeType::Delete);
    modified.await.unwrap();
    deleted.await.unwrap();

    assert!(graph.contains("/p/a.js"));
    assert!(graph.dependents("/p/a.js", false).contains("/p/app.js"));
    assert!(!graph.contains("/p/gone.js"));
    assert_eq!(invalidator.invalidated_since(0).len(), 2);
}
