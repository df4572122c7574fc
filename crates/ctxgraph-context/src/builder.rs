use crate::bundle::{
    BuildKind, BundleFile, BundleMetadata, CachedContext, Candidate, ContextBundle,
    DependencyInfo, FailureStage, FullBuildReason, OptimizationInfo, PartialFailure,
};
use crate::incremental::{BuildPlan, BuildState, IncrementalUpdater};
use crate::relevance::{FileSignals, RelevanceScorer, ScoringInput};
use chrono::Utc;
use ctxgraph_cache::{Artifact, BuildOptions, CacheKey, CacheStore, Invalidator};
use ctxgraph_core::{
    ChangeType, CommitInfo, ContextConfig, CtxGraphError, GitProvider, GitSnapshot,
    InvalidationOutcome, InvalidationRequest, InvalidationSink, Language, Parser,
    RelevanceConfig, Result, TaskContext,
};
use ctxgraph_graph::DependencyGraph;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use ignore::{overrides::OverrideBuilder, WalkBuilder};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Files read and parsed concurrently during base assembly.
const FILE_CONCURRENCY: usize = 16;

const DEFAULT_EXCLUDES: &[&str] = &[
    "!.git/",
    "!node_modules/",
    "!target/",
    "!dist/",
    "!build/",
    "!__pycache__/",
    "!.ctxgraph/",
];

/// Collaborators a builder works against.
pub struct ContextBuilderDeps {
    pub parser: Arc<dyn Parser>,
    /// `None` builds without git context.
    pub git: Option<Arc<dyn GitProvider>>,
    pub store: Arc<dyn CacheStore>,
    pub graph: Arc<DependencyGraph>,
    pub invalidator: Arc<Invalidator>,
}

#[derive(Default)]
struct RootSlot {
    lock: Mutex<()>,
    /// Builder-wide sequence number of the last build completed here.
    completed: AtomicU64,
}

struct Assembled {
    bundle: ContextBundle,
    cached: CachedContext,
}

struct FileOutcome {
    candidate: Option<Candidate>,
    failures: Vec<PartialFailure>,
}

/// Builds relevance-ranked context bundles for root directories.
///
/// At most one build per root runs at a time. Callers arriving while a
/// build is in flight wait for it and reuse its result when they asked for
/// the same task. A build that overlaps an invalidation of one of its files
/// is discarded and retried from the new epoch.
pub struct ContextBuilder {
    parser: Arc<dyn Parser>,
    git: Option<Arc<dyn GitProvider>>,
    store: Arc<dyn CacheStore>,
    graph: Arc<DependencyGraph>,
    invalidator: Arc<Invalidator>,
    sink: Arc<dyn InvalidationSink>,
    config: ContextConfig,
    relevance: RelevanceConfig,
    options: BuildOptions,
    extensions: HashSet<String>,
    updater: IncrementalUpdater,
    roots: DashMap<String, Arc<RootSlot>>,
    build_seq: AtomicU64,
    cache: RwLock<HashMap<String, Arc<CachedContext>>>,
}

impl ContextBuilder {
    pub fn new(deps: ContextBuilderDeps, config: ContextConfig, relevance: RelevanceConfig) -> Self {
        let extensions = config
            .include_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        let sink: Arc<dyn InvalidationSink> = deps.invalidator.clone();

        Self {
            parser: deps.parser,
            git: deps.git,
            store: deps.store,
            graph: deps.graph,
            invalidator: deps.invalidator,
            sink,
            config,
            relevance,
            options: BuildOptions::default(),
            extensions,
            updater: IncrementalUpdater::new(),
            roots: DashMap::new(),
            build_seq: AtomicU64::new(0),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Route `invalidate_file` through another sink, such as a batch
    /// coordinator, instead of the invalidator directly.
    pub fn with_invalidation_sink(mut self, sink: Arc<dyn InvalidationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Options folded into every cache key this builder produces.
    pub fn with_build_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn invalidator(&self) -> &Arc<Invalidator> {
        &self.invalidator
    }

    pub async fn build_context(
        &self,
        root: impl AsRef<Path>,
        task: &TaskContext,
    ) -> Result<ContextBundle> {
        let requested = root.as_ref();
        // Any build completing after this point finished after we arrived.
        let arrived = self.build_seq.load(Ordering::Acquire);
        let root = tokio::fs::canonicalize(requested).await.map_err(|e| {
            CtxGraphError::build_fatal("resolve root", format!("{}: {}", requested.display(), e))
        })?;
        let key = root.to_string_lossy().into_owned();

        let slot = self.roots.entry(key.clone()).or_default().clone();
        let _guard = slot.lock.lock().await;

        if slot.completed.load(Ordering::Acquire) > arrived {
            if let Some(cached) = self.cached(&key) {
                if cached.task == *task {
                    debug!("Reusing context for {} built by a concurrent request", key);
                    return Ok(cached.bundle.clone());
                }
            }
        }

        let attempts = self.config.max_build_attempts.max(1);
        for attempt in 1..=attempts {
            let epoch = self.invalidator.current_epoch();
            let assembled = match self.build_once(&root, &key, task, epoch).await {
                Ok(assembled) => assembled,
                Err(e) => {
                    self.updater.abort(&key, self.cached(&key).is_some());
                    return Err(e);
                }
            };

            let superseded = assembled
                .cached
                .candidates
                .iter()
                .filter(|c| self.invalidated_after(&c.path, epoch))
                .count();
            if superseded == 0 {
                let bundle = assembled.bundle.clone();
                self.cache.write().insert(key.clone(), Arc::new(assembled.cached));
                self.updater.complete(&key);
                let seq = self.build_seq.fetch_add(1, Ordering::AcqRel) + 1;
                slot.completed.store(seq, Ordering::Release);
                info!(
                    "Built context for {}: {} of {} files in {}ms ({:?})",
                    key,
                    bundle.files.len(),
                    bundle.metadata.total_files_considered,
                    bundle.metadata.duration_ms,
                    bundle.metadata.build_kind
                );
                return Ok(bundle);
            }

            warn!(
                "Build attempt {}/{} for {} superseded: {} file(s) invalidated mid-build",
                attempt, attempts, key, superseded
            );
        }

        self.updater.abort(&key, self.cached(&key).is_some());
        Err(CtxGraphError::Superseded { root: key })
    }

    /// Invalidate one file through the configured sink. If the sink fails,
    /// the file's cache entries are deleted directly.
    pub async fn invalidate_file(&self, path: &str) -> Result<InvalidationOutcome> {
        self.drop_contexts_containing(path);

        let request = InvalidationRequest::new([path], ChangeType::Modify);
        match self.sink.invalidate(request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(
                    "Invalidation of {} failed, deleting cache entries directly: {}",
                    path, e
                );
                self.delete_entries(path).await
            }
        }
    }

    pub fn cached_bundle(&self, root: impl AsRef<Path>) -> Option<ContextBundle> {
        self.cached(&root_key(root.as_ref()))
            .map(|c| c.bundle.clone())
    }

    pub fn build_state(&self, root: impl AsRef<Path>) -> BuildState {
        self.updater.state(&root_key(root.as_ref()))
    }

    /// Forget the cached context of `root`; the next build is a full one.
    pub fn clear_cache(&self, root: impl AsRef<Path>) {
        let key = root_key(root.as_ref());
        self.cache.write().remove(&key);
        self.updater.reset(&key);
    }

    fn cached(&self, key: &str) -> Option<Arc<CachedContext>> {
        self.cache.read().get(key).cloned()
    }

    fn invalidated_after(&self, path: &str, epoch: u64) -> bool {
        self.invalidator
            .last_invalidated_epoch(path)
            .is_some_and(|e| e > epoch)
    }

    fn drop_contexts_containing(&self, path: &str) {
        let mut cache = self.cache.write();
        let roots: Vec<String> = cache
            .iter()
            .filter(|(_, c)| c.contains(path))
            .map(|(root, _)| root.clone())
            .collect();
        for root in roots {
            debug!("Dropping cached context for {} ({} changed)", root, path);
            cache.remove(&root);
            self.updater.reset(&root);
        }
    }

    async fn delete_entries(&self, path: &str) -> Result<InvalidationOutcome> {
        let owned = path.to_string();
        let keys = self
            .store
            .keys_matching(&move |k: &CacheKey| k.file_path == owned)
            .await?;

        let mut removed = 0;
        for key in keys {
            if self.store.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(InvalidationOutcome {
            successful: vec![path.to_string()],
            failed: Vec::new(),
            entries_removed: removed,
        })
    }

    async fn build_once(
        &self,
        root: &Path,
        key: &str,
        task: &TaskContext,
        epoch: u64,
    ) -> Result<Assembled> {
        let started = Instant::now();
        let mut failures = Vec::new();
        let previous = self.cached(key);

        let snapshot = self.capture_git(previous.as_deref(), &mut failures).await;
        let plan = self
            .updater
            .plan(key, previous.as_deref(), snapshot.as_ref());

        let incremental = match (&plan, previous.as_deref()) {
            (BuildPlan::Incremental { changed }, Some(prev)) => Some((changed, prev)),
            _ => None,
        };
        let (candidates, build_kind, full_build_reason) = match incremental {
            Some((changed, prev)) => {
                self.updater.begin_incremental(key);
                let candidates = self
                    .assemble_incremental(root, prev, changed, epoch, &mut failures)
                    .await;
                (candidates, BuildKind::Incremental, None)
            }
            None => {
                let reason = match &plan {
                    BuildPlan::Full { reason } => *reason,
                    BuildPlan::Incremental { .. } => FullBuildReason::NoCache,
                };
                let candidates = self.assemble_full(root, epoch, &mut failures).await?;
                (candidates, BuildKind::Full, Some(reason))
            }
        };

        for candidate in &candidates {
            if let Err(e) = self
                .graph
                .set_dependencies(&candidate.path, candidate.artifact.dependencies.iter().cloned())
            {
                failures.push(PartialFailure::new(
                    FailureStage::DependencyGraph,
                    Some(&candidate.path),
                    e,
                ));
            }
        }

        let mut scorer = RelevanceScorer::new(self.relevance.clone());
        scorer.set_task(task);
        scorer.set_root(root);
        if let Some(snapshot) = &snapshot {
            scorer.set_change_set(snapshot.changed_files.iter().cloned());
        }
        let inputs: Vec<ScoringInput<'_>> = candidates
            .iter()
            .map(|c| ScoringInput {
                path: &c.path,
                content: c.content.as_ref(),
                signals: FileSignals {
                    size_bytes: c.size_bytes(),
                    fan_in: self.graph.dependents(&c.path, false).len(),
                },
            })
            .collect();
        let scored = scorer.score_files(&inputs);
        let relevant = RelevanceScorer::filter_by_relevance(&scored, self.config.relevance_threshold);
        let mut ranked = RelevanceScorer::rank_files(relevant);
        let original_count = ranked.len();
        ranked.truncate(self.config.max_context_size);

        let by_path: HashMap<&str, &Candidate> =
            candidates.iter().map(|c| (c.path.as_str(), c)).collect();
        let mut files = Vec::with_capacity(ranked.len());
        for entry in &ranked {
            let Some(candidate) = by_path.get(entry.path.as_str()) else {
                continue;
            };
            if let Err(e) = self.store.update_score(&candidate.key, entry.score).await {
                failures.push(PartialFailure::new(
                    FailureStage::Store,
                    Some(&candidate.path),
                    e,
                ));
            }
            let history = self
                .history_for(&candidate.path, snapshot.is_some(), &mut failures)
                .await;

            files.push(BundleFile {
                path: candidate.path.clone(),
                language: candidate.language.clone(),
                artifact: candidate.artifact.data.clone(),
                relevance_score: entry.score,
                dependency_info: DependencyInfo {
                    dependencies: self
                        .graph
                        .dependencies(&candidate.path, false)
                        .into_iter()
                        .collect(),
                    dependents: self
                        .graph
                        .dependents(&candidate.path, false)
                        .into_iter()
                        .collect(),
                },
                recently_changed: snapshot
                    .as_ref()
                    .is_some_and(|s| s.changed_files.contains(&candidate.path)),
                updated: candidate.updated,
                history,
            });
        }

        let dependency_graph = self.graph.snapshot(files.iter().map(|f| f.path.as_str()));
        let bundle = ContextBundle {
            root: key.to_string(),
            metadata: BundleMetadata {
                total_files_considered: candidates.len(),
                threshold: self.config.relevance_threshold,
                optimization: OptimizationInfo {
                    original_count,
                    retained_count: files.len(),
                    max_context_size: self.config.max_context_size,
                    truncated: original_count > self.config.max_context_size,
                },
                build_kind,
                full_build_reason,
                git: snapshot.clone(),
                dependency_graph,
                partial_failures: failures,
                epoch,
                built_at: Utc::now(),
                duration_ms: started.elapsed().as_millis() as u64,
            },
            files,
        };

        let cached = CachedContext {
            bundle: bundle.clone(),
            candidates,
            snapshot,
            epoch,
            task: task.clone(),
        };
        Ok(Assembled { bundle, cached })
    }

    async fn capture_git(
        &self,
        previous: Option<&CachedContext>,
        failures: &mut Vec<PartialFailure>,
    ) -> Option<GitSnapshot> {
        let git = self.git.as_ref()?;
        let since = previous
            .and_then(|p| p.snapshot.as_ref())
            .and_then(|s| s.head_commit())
            .map(str::to_string);

        match self.read_git(git.as_ref(), since.as_deref()).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Git context unavailable, building without it: {}", e);
                failures.push(PartialFailure::new(FailureStage::Git, None, e));
                None
            }
        }
    }

    /// Working-tree changes, plus files committed since `since` when HEAD
    /// has moved.
    async fn read_git(&self, git: &dyn GitProvider, since: Option<&str>) -> Result<GitSnapshot> {
        let branch = git.current_branch().await?;
        let recent_commits = git.recent_commits(self.config.recent_commit_limit).await?;
        let mut changed_files: BTreeSet<String> =
            git.changed_files(None).await?.into_iter().collect();

        if let Some(since) = since {
            if recent_commits.first().map(|c| c.id.as_str()) != Some(since) {
                changed_files.extend(git.changed_files(Some(since)).await?);
            }
        }

        Ok(GitSnapshot {
            branch,
            recent_commits,
            changed_files,
            captured_at: Utc::now(),
        })
    }

    async fn history_for(
        &self,
        path: &str,
        git_available: bool,
        failures: &mut Vec<PartialFailure>,
    ) -> Vec<CommitInfo> {
        let limit = self.config.file_history_limit;
        let Some(git) = self.git.as_ref().filter(|_| git_available && limit > 0) else {
            return Vec::new();
        };
        match git.file_history(path, limit).await {
            Ok(history) => history,
            Err(e) => {
                debug!("No history for {}: {}", path, e);
                failures.push(PartialFailure::new(FailureStage::Git, Some(path), e));
                Vec::new()
            }
        }
    }

    async fn assemble_full(
        &self,
        root: &Path,
        epoch: u64,
        failures: &mut Vec<PartialFailure>,
    ) -> Result<Vec<Candidate>> {
        let paths = self.enumerate(root).await?;
        debug!("Enumerated {} files under {}", paths.len(), root.display());
        Ok(self.process_paths(paths, epoch, failures).await)
    }

    /// Keep every cached candidate outside the affected set and reprocess
    /// the rest. Files that disappeared leave the graph.
    async fn assemble_incremental(
        &self,
        root: &Path,
        previous: &CachedContext,
        changed: &BTreeSet<String>,
        epoch: u64,
        failures: &mut Vec<PartialFailure>,
    ) -> Vec<Candidate> {
        let mut seeds = changed.clone();
        seeds.extend(self.invalidator.invalidated_since(previous.epoch));
        let affected: BTreeSet<String> = IncrementalUpdater::affected_files(&seeds, &self.graph)
            .into_iter()
            .filter(|p| Path::new(p).starts_with(root))
            .collect();

        let known: HashSet<&str> = previous
            .candidates
            .iter()
            .map(|c| c.path.as_str())
            .collect();
        let mut candidates: Vec<Candidate> = previous
            .candidates
            .iter()
            .filter(|c| !affected.contains(&c.path))
            .map(|c| Candidate {
                updated: false,
                ..c.clone()
            })
            .collect();

        let mut to_process = Vec::new();
        for path in affected {
            if self.eligible(&path).await {
                to_process.push(path);
            } else if known.contains(path.as_str()) {
                debug!("{} is gone, dropping it from the context", path);
                self.graph.remove_file(&path);
            }
        }
        debug!(
            "Incremental build reprocesses {} of {} files",
            to_process.len(),
            previous.candidates.len()
        );

        let mut updated = self.process_paths(to_process, epoch, failures).await;
        for candidate in &mut updated {
            candidate.updated = true;
        }
        candidates.extend(updated);
        candidates.sort_by(|a, b| a.path.cmp(&b.path));
        candidates
    }

    async fn process_paths(
        &self,
        paths: Vec<String>,
        epoch: u64,
        failures: &mut Vec<PartialFailure>,
    ) -> Vec<Candidate> {
        let outcomes: Vec<FileOutcome> = stream::iter(paths)
            .map(|path| self.process_file(path, epoch))
            .buffered(FILE_CONCURRENCY)
            .collect()
            .await;

        let mut candidates = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            failures.extend(outcome.failures);
            candidates.extend(outcome.candidate);
        }
        candidates
    }

    /// Read a file and resolve its artifact, from the store when the content
    /// is unchanged and from the parser otherwise.
    async fn process_file(&self, path: String, epoch: u64) -> FileOutcome {
        let mut failures = Vec::new();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                failures.push(PartialFailure::new(FailureStage::Read, Some(&path), e));
                return FileOutcome {
                    candidate: None,
                    failures,
                };
            }
        };

        let language = Language::from_path(Path::new(&path));
        let key = CacheKey::for_content(
            path.as_str(),
            language.clone(),
            content.as_bytes(),
            &self.options,
        );

        let hit = match self.store.get(&key).await {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Cache lookup for {} failed, reparsing: {}", key, e);
                None
            }
        };

        let artifact = match hit {
            Some(entry) => entry.artifact,
            None => match self.parser.parse(&path, &content).await {
                Ok(parsed) => {
                    let artifact =
                        Artifact::new(parsed.artifact, parsed.metadata.dependencies, epoch);
                    if self.invalidated_after(&path, epoch) {
                        debug!("{} was invalidated while parsing, not caching", path);
                    } else if let Err(e) = self.store.put(key.clone(), artifact.clone()).await {
                        failures.push(PartialFailure::new(FailureStage::Store, Some(&path), e));
                    }
                    artifact
                }
                Err(e) => {
                    warn!("Failed to parse {}: {}", path, e);
                    failures.push(PartialFailure::new(FailureStage::Parse, Some(&path), e));
                    return FileOutcome {
                        candidate: None,
                        failures,
                    };
                }
            },
        };

        FileOutcome {
            candidate: Some(Candidate {
                path,
                language,
                key,
                artifact,
                content: Arc::from(content),
                updated: false,
            }),
            failures,
        }
    }

    async fn eligible(&self, path: &str) -> bool {
        if !has_included_extension(Path::new(path), &self.extensions) {
            return false;
        }
        match tokio::fs::metadata(path).await {
            Ok(meta) => meta.is_file() && meta.len() <= self.config.max_file_bytes,
            Err(_) => false,
        }
    }

    async fn enumerate(&self, root: &Path) -> Result<Vec<String>> {
        let root = root.to_path_buf();
        let extensions = self.extensions.clone();
        let max_file_bytes = self.config.max_file_bytes;
        let respect_gitignore = self.config.respect_gitignore;

        tokio::task::spawn_blocking(move || {
            collect_files(&root, &extensions, max_file_bytes, respect_gitignore)
        })
        .await
        .map_err(|e| CtxGraphError::Threading(e.to_string()))?
    }
}

fn root_key(root: &Path) -> String {
    std::fs::canonicalize(root)
        .unwrap_or_else(|_| root.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

fn has_included_extension(path: &Path, extensions: &HashSet<String>) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e.to_ascii_lowercase()))
}

/// Files under `root` with an included extension, sorted.
fn collect_files(
    root: &Path,
    extensions: &HashSet<String>,
    max_file_bytes: u64,
    respect_gitignore: bool,
) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(CtxGraphError::build_fatal(
            "enumerate",
            format!("{} is not a directory", root.display()),
        ));
    }

    let mut overrides = OverrideBuilder::new(root);
    for pattern in DEFAULT_EXCLUDES {
        overrides
            .add(pattern)
            .map_err(|e| CtxGraphError::build_fatal("enumerate", e.to_string()))?;
    }
    let overrides = overrides
        .build()
        .map_err(|e| CtxGraphError::build_fatal("enumerate", e.to_string()))?;

    let mut walker = WalkBuilder::new(root);
    walker
        .hidden(false)
        .git_ignore(respect_gitignore)
        .git_exclude(respect_gitignore)
        .git_global(respect_gitignore)
        .ignore(respect_gitignore)
        .require_git(false)
        .overrides(overrides);

    let mut paths = Vec::new();
    for entry in walker.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Walker error: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if !has_included_extension(path, extensions) {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > max_file_bytes {
            debug!("Skipping {} ({} bytes)", path.display(), size);
            continue;
        }
        paths.push(path.to_string_lossy().into_owned());
    }

    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn extensions(list: &[&str]) -> HashSet<String> {
        list.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        let exts = extensions(&["rs", "js"]);
        assert!(has_included_extension(Path::new("/a/lib.RS"), &exts));
        assert!(has_included_extension(Path::new("b.js"), &exts));
        assert!(!has_included_extension(Path::new("c.py"), &exts));
        assert!(!has_included_extension(Path::new("Makefile"), &exts));
    }

    #[test]
    fn collect_skips_excluded_dirs_ignored_and_large_files() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join("gen")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/notes.txt"), "skip").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(root.join("gen/out.rs"), "generated").unwrap();
        fs::write(root.join("big.rs"), "x".repeat(64)).unwrap();
        fs::write(root.join(".gitignore"), "gen/\n").unwrap();

        let files = collect_files(&root, &extensions(&["rs", "js"]), 32, true).unwrap();
        let expected = vec![root.join("src/main.rs").to_string_lossy().into_owned()];
        assert_eq!(files, expected);

        let files = collect_files(&root, &extensions(&["rs"]), 1024, false).unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn collect_rejects_missing_root() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = collect_files(&missing, &extensions(&["rs"]), 1024, true).unwrap_err();
        assert!(matches!(err, CtxGraphError::BuildFatal { .. }));
    }
}
