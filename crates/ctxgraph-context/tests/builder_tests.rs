use approx::assert_relative_eq;
use async_trait::async_trait;
use ctxgraph_cache::{Artifact, CacheKey, CacheStore, Invalidator, MemoryCacheStore};
use ctxgraph_context::{
    BuildKind, BuildState, ContextBuilder, ContextBuilderDeps, FailureStage, FullBuildReason,
};
use ctxgraph_core::{
    CommitInfo, ContextConfig, CtxGraphError, GitProvider, InvalidationConfig,
    InvalidationOutcome, InvalidationRequest, InvalidationSink, Language, ParseMetadata,
    ParseResult, Parser, RelevanceConfig, Result, TaskContext,
};
use ctxgraph_graph::DependencyGraph;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

/// Parser treating `import <file>` lines as dependencies on siblings.
#[derive(Default)]
struct ImportParser {
    calls: Mutex<HashMap<String, usize>>,
    fail_suffix: Option<String>,
    /// Invalidates the parsed file this many times, simulating an edit
    /// landing mid-build.
    self_invalidate: Mutex<Option<(Arc<Invalidator>, usize)>>,
}

impl ImportParser {
    fn failing_on(suffix: &str) -> Self {
        Self {
            fail_suffix: Some(suffix.to_string()),
            ..Self::default()
        }
    }

    fn calls_for(&self, path: &Path) -> usize {
        let key = path.to_string_lossy().into_owned();
        self.calls.lock().get(&key).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

#[async_trait]
impl Parser for ImportParser {
    async fn parse(&self, path: &str, content: &str) -> Result<ParseResult> {
        *self.calls.lock().entry(path.to_string()).or_insert(0) += 1;

        let invalidator = {
            let mut slot = self.self_invalidate.lock();
            match slot.as_mut() {
                Some((invalidator, remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(invalidator.clone())
                }
                _ => None,
            }
        };
        if let Some(invalidator) = invalidator {
            invalidator.invalidate_file(path).await?;
        }

        if let Some(suffix) = &self.fail_suffix {
            if path.ends_with(suffix.as_str()) {
                return Err(CtxGraphError::parse(path, "unexpected token"));
            }
        }

        let dir = Path::new(path).parent().unwrap_or(Path::new("/"));
        let dependencies = content
            .lines()
            .filter_map(|l| l.strip_prefix("import "))
            .map(|name| dir.join(name.trim()).to_string_lossy().into_owned())
            .collect();

        Ok(ParseResult {
            artifact: format!("parsed:{}", content).into_bytes(),
            metadata: ParseMetadata {
                size: content.len(),
                language: Language::from_path(Path::new(path)),
                hash: String::new(),
                dependencies,
            },
        })
    }
}

struct MockGit {
    branch: Mutex<Option<String>>,
    commits: Mutex<Vec<CommitInfo>>,
    changed: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl MockGit {
    fn new() -> Self {
        Self {
            branch: Mutex::new(Some("main".to_string())),
            commits: Mutex::new(vec![commit("c1")]),
            changed: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CtxGraphError::GitUnavailable("not a repository".to_string()));
        }
        Ok(())
    }
}

fn commit(id: &str) -> CommitInfo {
    CommitInfo {
        id: id.to_string(),
        summary: format!("commit {}", id),
        author: "dev".to_string(),
        timestamp: 1_700_000_000,
    }
}

#[async_trait]
impl GitProvider for MockGit {
    async fn current_branch(&self) -> Result<Option<String>> {
        self.check()?;
        Ok(self.branch.lock().clone())
    }

    async fn recent_commits(&self, limit: usize) -> Result<Vec<CommitInfo>> {
        self.check()?;
        Ok(self.commits.lock().iter().take(limit).cloned().collect())
    }

    async fn changed_files(&self, _since: Option<&str>) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.changed.lock().clone())
    }

    async fn file_history(&self, _path: &str, limit: usize) -> Result<Vec<CommitInfo>> {
        self.check()?;
        Ok(self.commits.lock().iter().take(limit).cloned().collect())
    }
}

struct Harness {
    builder: ContextBuilder,
    store: Arc<MemoryCacheStore>,
    invalidator: Arc<Invalidator>,
}

fn harness(
    parser: Arc<ImportParser>,
    git: Option<Arc<MockGit>>,
    config: ContextConfig,
) -> Harness {
    let store = Arc::new(MemoryCacheStore::new(16 * 1024 * 1024));
    let graph = Arc::new(DependencyGraph::new());
    let invalidator = Arc::new(Invalidator::new(
        store.clone(),
        graph.clone(),
        InvalidationConfig::default(),
    ));
    let builder = ContextBuilder::new(
        ContextBuilderDeps {
            parser,
            git: git.map(|g| g as Arc<dyn GitProvider>),
            store: store.clone(),
            graph,
            invalidator: invalidator.clone(),
        },
        config,
        RelevanceConfig::default(),
    );
    Harness {
        builder,
        store,
        invalidator,
    }
}

fn project(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    for (name, content) in files {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    (dir, root)
}

fn abs(root: &Path, name: &str) -> String {
    root.join(name).to_string_lossy().into_owned()
}

#[tokio::test]
async fn bundle_is_bounded_and_ranked() {
    let (_dir, root) = project(&[
        ("alpha.js", "export default 1"),
        ("beta.js", "export default 2"),
        ("gamma.js", "export default 3"),
        ("delta.js", "export default 4"),
        ("auth.js", "export default 5"),
    ]);
    let config = ContextConfig {
        max_context_size: 3,
        ..ContextConfig::default()
    };
    let h = harness(Arc::new(ImportParser::default()), None, config);

    let task = TaskContext::new(["auth"], "");
    let bundle = h.builder.build_context(&root, &task).await.unwrap();

    assert_eq!(bundle.len(), 3);
    assert_eq!(
        bundle.paths(),
        vec![
            abs(&root, "auth.js").as_str(),
            abs(&root, "alpha.js").as_str(),
            abs(&root, "beta.js").as_str(),
        ]
    );
    assert_eq!(bundle.metadata.total_files_considered, 5);
    assert!(bundle.metadata.optimization.truncated);
    assert_eq!(bundle.metadata.optimization.original_count, 5);
    assert_eq!(bundle.metadata.optimization.retained_count, 3);
    assert_eq!(bundle.metadata.build_kind, BuildKind::Full);
    assert_eq!(
        bundle.metadata.full_build_reason,
        Some(FullBuildReason::NoCache)
    );
    assert!(bundle.files[0].relevance_score > bundle.files[1].relevance_score);
    assert_eq!(h.builder.build_state(&root), BuildState::Cached);
    assert_eq!(h.builder.cached_bundle(&root), Some(bundle));
}

#[tokio::test]
async fn keywords_in_the_root_directory_do_not_boost_every_file() {
    let dir = tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap().join("auth-service");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("auth.js"), "export default 1").unwrap();
    fs::write(root.join("colors.js"), "export default 2").unwrap();
    let h = harness(Arc::new(ImportParser::default()), None, ContextConfig::default());

    let bundle = h
        .builder
        .build_context(&root, &TaskContext::new(["auth"], ""))
        .await
        .unwrap();

    let auth = bundle.file(&abs(&root, "auth.js")).unwrap();
    let colors = bundle.file(&abs(&root, "colors.js")).unwrap();
    assert_relative_eq!(auth.relevance_score, 0.6);
    assert_relative_eq!(colors.relevance_score, 0.3);
    assert_eq!(bundle.paths()[0], abs(&root, "auth.js").as_str());
}

#[tokio::test]
async fn concurrent_builds_share_one_pass() {
    let (_dir, root) = project(&[
        ("a.js", "import b.js\nrun()"),
        ("b.js", "export const b = 1"),
        ("c.js", "export const c = 1"),
    ]);
    let parser = Arc::new(ImportParser::default());
    let h = harness(parser.clone(), None, ContextConfig::default());
    let task = TaskContext::new(["run"], "");

    let (first, second) = tokio::join!(
        h.builder.build_context(&root, &task),
        h.builder.build_context(&root, &task)
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(parser.total_calls(), 3);
    assert_eq!(first.metadata.built_at, second.metadata.built_at);
    assert_eq!(first.len(), 3);
}

#[tokio::test]
async fn builds_of_other_roots_are_never_reused() {
    let (_a_dir, a_root) = project(&[("a.js", "run()"), ("b.js", "run()")]);
    let (_o_dir, o_root) = project(&[("other.js", "run()")]);
    let parser = Arc::new(ImportParser::default());
    let h = harness(parser.clone(), None, ContextConfig::default());
    let task = TaskContext::new(["run"], "");

    let (first, other, second) = tokio::join!(
        h.builder.build_context(&a_root, &task),
        h.builder.build_context(&o_root, &task),
        h.builder.build_context(&a_root, &task)
    );
    let (first, other, second) = (first.unwrap(), other.unwrap(), second.unwrap());

    assert_eq!(parser.total_calls(), 3);
    assert_eq!(other.paths(), vec![abs(&o_root, "other.js").as_str()]);
    assert_eq!(first, second);

    // A later request for the same root runs a fresh build.
    let rebuilt = h.builder.build_context(&a_root, &task).await.unwrap();
    assert_eq!(
        first.metadata.full_build_reason,
        Some(FullBuildReason::NoCache)
    );
    assert_eq!(
        rebuilt.metadata.full_build_reason,
        Some(FullBuildReason::GitUnavailable)
    );
    assert_eq!(parser.calls_for(&a_root.join("a.js")), 1);
}

#[tokio::test]
async fn dependencies_are_reported_per_file() {
    let (_dir, root) = project(&[
        ("a.js", "import b.js"),
        ("b.js", "export const b = 1"),
    ]);
    let h = harness(Arc::new(ImportParser::default()), None, ContextConfig::default());

    let bundle = h
        .builder
        .build_context(&root, &TaskContext::default())
        .await
        .unwrap();

    let a = bundle.file(&abs(&root, "a.js")).unwrap();
    let b = bundle.file(&abs(&root, "b.js")).unwrap();
    assert_eq!(a.dependency_info.dependencies, vec![abs(&root, "b.js")]);
    assert_eq!(b.dependency_info.dependents, vec![abs(&root, "a.js")]);
    assert_eq!(bundle.metadata.dependency_graph.edge_count(), 1);
    assert_eq!(&a.artifact[..], b"parsed:import b.js");
}

#[tokio::test]
async fn git_failure_degrades_to_partial_bundle() {
    let (_dir, root) = project(&[("a.rs", "fn a() {}"), ("b.rs", "fn b() {}")]);
    let git = Arc::new(MockGit::new());
    git.fail.store(true, Ordering::SeqCst);
    let h = harness(
        Arc::new(ImportParser::default()),
        Some(git),
        ContextConfig::default(),
    );

    let bundle = h
        .builder
        .build_context(&root, &TaskContext::default())
        .await
        .unwrap();

    assert_eq!(bundle.len(), 2);
    assert!(bundle.metadata.git.is_none());
    assert!(bundle.is_degraded());
    assert_eq!(bundle.metadata.partial_failures.len(), 1);
    assert_eq!(bundle.metadata.partial_failures[0].stage, FailureStage::Git);
    assert!(bundle.files.iter().all(|f| f.history.is_empty()));
}

#[tokio::test]
async fn parse_failure_is_isolated_to_its_file() {
    let (_dir, root) = project(&[
        ("good.py", "print('ok')"),
        ("bad.py", "def ("),
        ("also_good.py", "x = 1"),
    ]);
    let h = harness(
        Arc::new(ImportParser::failing_on("bad.py")),
        None,
        ContextConfig::default(),
    );

    let bundle = h
        .builder
        .build_context(&root, &TaskContext::default())
        .await
        .unwrap();

    assert_eq!(bundle.len(), 2);
    assert!(bundle.file(&abs(&root, "bad.py")).is_none());
    let failure = &bundle.metadata.partial_failures[0];
    assert_eq!(failure.stage, FailureStage::Parse);
    assert_eq!(failure.path.as_deref(), Some(abs(&root, "bad.py").as_str()));
}

#[tokio::test]
async fn incremental_build_reprocesses_change_and_dependents() {
    let (_dir, root) = project(&[
        ("a.js", "import b.js\nconsole.log(a)"),
        ("b.js", "export const b = 1"),
        ("c.js", "export const c = 1"),
    ]);
    let parser = Arc::new(ImportParser::default());
    let git = Arc::new(MockGit::new());
    let h = harness(parser.clone(), Some(git.clone()), ContextConfig::default());
    let task = TaskContext::default();

    let first = h.builder.build_context(&root, &task).await.unwrap();
    assert_eq!(first.metadata.build_kind, BuildKind::Full);
    assert!(first.files.iter().all(|f| !f.updated));
    assert_eq!(first.files[0].history.len(), 1);

    fs::write(root.join("b.js"), "export const b = 2").unwrap();
    *git.changed.lock() = vec![abs(&root, "b.js")];

    let second = h.builder.build_context(&root, &task).await.unwrap();
    assert_eq!(second.metadata.build_kind, BuildKind::Incremental);
    assert_eq!(second.len(), 3);

    let updated: Vec<&str> = second
        .files
        .iter()
        .filter(|f| f.updated)
        .map(|f| f.path.as_str())
        .collect();
    let mut updated = updated;
    updated.sort();
    assert_eq!(
        updated,
        vec![abs(&root, "a.js").as_str(), abs(&root, "b.js").as_str()]
    );

    // a.js kept its content hash, only b.js is parsed again
    assert_eq!(parser.calls_for(&root.join("a.js")), 1);
    assert_eq!(parser.calls_for(&root.join("b.js")), 2);
    assert_eq!(parser.calls_for(&root.join("c.js")), 1);

    let b = second.file(&abs(&root, "b.js")).unwrap();
    assert!(b.recently_changed);
    assert_eq!(&b.artifact[..], b"parsed:export const b = 2");
    assert_eq!(h.builder.build_state(&root), BuildState::Cached);
}

#[tokio::test]
async fn branch_switch_forces_full_build() {
    let (_dir, root) = project(&[("a.go", "package a")]);
    let git = Arc::new(MockGit::new());
    let h = harness(
        Arc::new(ImportParser::default()),
        Some(git.clone()),
        ContextConfig::default(),
    );
    let task = TaskContext::default();
    h.builder.build_context(&root, &task).await.unwrap();

    *git.branch.lock() = Some("feature".to_string());
    *git.changed.lock() = vec![abs(&root, "a.go")];
    let bundle = h.builder.build_context(&root, &task).await.unwrap();

    assert_eq!(bundle.metadata.build_kind, BuildKind::Full);
    assert_eq!(
        bundle.metadata.full_build_reason,
        Some(FullBuildReason::BranchChanged)
    );
}

#[tokio::test]
async fn missing_root_is_fatal() {
    let dir = tempdir().unwrap();
    let h = harness(Arc::new(ImportParser::default()), None, ContextConfig::default());

    let err = h
        .builder
        .build_context(dir.path().join("missing"), &TaskContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CtxGraphError::BuildFatal { .. }));
}

#[tokio::test]
async fn build_invalidated_mid_flight_is_retried() {
    let (_dir, root) = project(&[("a.ts", "export {}"), ("b.ts", "export {}")]);
    let parser = Arc::new(ImportParser::default());
    let h = harness(parser.clone(), None, ContextConfig::default());
    *parser.self_invalidate.lock() = Some((h.invalidator.clone(), 1));

    let bundle = h
        .builder
        .build_context(&root, &TaskContext::default())
        .await
        .unwrap();

    assert_eq!(bundle.len(), 2);
    assert_eq!(bundle.metadata.epoch, 1);
    assert_eq!(parser.total_calls(), 3);
}

#[tokio::test]
async fn build_gives_up_when_always_superseded() {
    let (_dir, root) = project(&[("a.ts", "export {}")]);
    let parser = Arc::new(ImportParser::default());
    let config = ContextConfig {
        max_build_attempts: 2,
        ..ContextConfig::default()
    };
    let h = harness(parser.clone(), None, config);
    *parser.self_invalidate.lock() = Some((h.invalidator.clone(), usize::MAX));

    let err = h
        .builder
        .build_context(&root, &TaskContext::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CtxGraphError::Superseded { .. }));
    assert_eq!(parser.total_calls(), 2);
    assert_eq!(h.builder.build_state(&root), BuildState::NoCache);
    assert!(h.builder.cached_bundle(&root).is_none());
}

/// Sink recording requests before handing them to the invalidator.
struct RecordingSink {
    inner: Arc<Invalidator>,
    requests: Mutex<Vec<InvalidationRequest>>,
}

#[async_trait]
impl InvalidationSink for RecordingSink {
    async fn invalidate(&self, request: InvalidationRequest) -> Result<InvalidationOutcome> {
        self.requests.lock().push(request.clone());
        self.inner.invalidate(request).await
    }
}

struct DownSink;

#[async_trait]
impl InvalidationSink for DownSink {
    async fn invalidate(&self, _request: InvalidationRequest) -> Result<InvalidationOutcome> {
        Err(CtxGraphError::Invalidation("sink unavailable".to_string()))
    }
}

async fn seeded_key(store: &MemoryCacheStore) -> CacheKey {
    let key: CacheKey = "ast:/p/a.js:javascript:abc123".parse().unwrap();
    store
        .put(key.clone(), Artifact::new(b"ast".to_vec(), Vec::new(), 0))
        .await
        .unwrap();
    assert!(store.contains(&key));
    key
}

#[tokio::test]
async fn invalidate_file_goes_through_sink_once() {
    let h = harness(Arc::new(ImportParser::default()), None, ContextConfig::default());
    let key = seeded_key(&h.store).await;
    let sink = Arc::new(RecordingSink {
        inner: h.invalidator.clone(),
        requests: Mutex::new(Vec::new()),
    });
    let builder = h.builder.with_invalidation_sink(sink.clone());

    let outcome = builder.invalidate_file("/p/a.js").await.unwrap();

    assert!(!h.store.contains(&key));
    assert_eq!(outcome.entries_removed, 1);
    let requests = sink.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].targets, vec!["/p/a.js".to_string()]);
}

#[tokio::test]
async fn invalidate_file_falls_back_to_direct_deletion() {
    let h = harness(Arc::new(ImportParser::default()), None, ContextConfig::default());
    let key = seeded_key(&h.store).await;
    let builder = h.builder.with_invalidation_sink(Arc::new(DownSink));

    let outcome = builder.invalidate_file("/p/a.js").await.unwrap();

    assert!(!h.store.contains(&key));
    assert_eq!(outcome.entries_removed, 1);
    assert_eq!(outcome.successful, vec!["/p/a.js".to_string()]);
}

#[tokio::test]
async fn invalidating_a_bundled_file_drops_the_cached_context() {
    let (_dir, root) = project(&[("a.rs", "fn a() {}"), ("b.rs", "fn b() {}")]);
    let parser = Arc::new(ImportParser::default());
    let h = harness(parser.clone(), None, ContextConfig::default());
    let task = TaskContext::default();

    h.builder.build_context(&root, &task).await.unwrap();
    assert!(h.builder.cached_bundle(&root).is_some());

    h.builder
        .invalidate_file(&abs(&root, "a.rs"))
        .await
        .unwrap();
    assert!(h.builder.cached_bundle(&root).is_none());
    assert_eq!(h.builder.build_state(&root), BuildState::NoCache);

    h.builder.build_context(&root, &task).await.unwrap();
    assert_eq!(parser.calls_for(&root.join("a.rs")), 2);
    assert_eq!(parser.calls_for(&root.join("b.rs")), 1);
}
