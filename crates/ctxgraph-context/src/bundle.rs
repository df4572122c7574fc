use bytes::Bytes;
use chrono::{DateTime, Utc};
use ctxgraph_cache::{Artifact, CacheKey};
use ctxgraph_core::{CommitInfo, GitSnapshot, Language, Result, TaskContext};
use ctxgraph_graph::GraphSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildKind {
    Full,
    Incremental,
}

/// Why a build could not reuse the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullBuildReason {
    NoCache,
    GitUnavailable,
    BranchChanged,
    /// Git shows no commits or changed files beyond the cached snapshot.
    NotAhead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Git,
    Parse,
    Read,
    DependencyGraph,
    Store,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureStage::Git => "git",
            FailureStage::Parse => "parse",
            FailureStage::Read => "read",
            FailureStage::DependencyGraph => "dependency_graph",
            FailureStage::Store => "store",
        };
        write!(f, "{}", s)
    }
}

/// A non-fatal problem recorded while building. The bundle is still
/// complete for every file not named here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFailure {
    pub stage: FailureStage,
    pub path: Option<String>,
    pub message: String,
}

impl PartialFailure {
    pub fn new(stage: FailureStage, path: Option<&str>, message: impl fmt::Display) -> Self {
        Self {
            stage,
            path: path.map(str::to_string),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleFile {
    pub path: String,
    pub language: Language,
    pub artifact: Bytes,
    pub relevance_score: f64,
    pub dependency_info: DependencyInfo,
    /// Part of the git change set at build time.
    pub recently_changed: bool,
    /// Re-processed by an incremental build.
    pub updated: bool,
    pub history: Vec<CommitInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationInfo {
    pub original_count: usize,
    pub retained_count: usize,
    pub max_context_size: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub total_files_considered: usize,
    pub threshold: f64,
    pub optimization: OptimizationInfo,
    pub build_kind: BuildKind,
    pub full_build_reason: Option<FullBuildReason>,
    pub git: Option<GitSnapshot>,
    pub dependency_graph: GraphSnapshot,
    pub partial_failures: Vec<PartialFailure>,
    /// Invalidation epoch the build started from.
    pub epoch: u64,
    pub built_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Ranked, size-bounded context for one root path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub root: String,
    pub files: Vec<BundleFile>,
    pub metadata: BundleMetadata,
}

impl ContextBundle {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }

    pub fn file(&self, path: &str) -> Option<&BundleFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn is_degraded(&self) -> bool {
        !self.metadata.partial_failures.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A processed file kept between builds so incremental builds can re-score
/// without re-reading it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: String,
    pub language: Language,
    pub key: CacheKey,
    pub artifact: Artifact,
    pub content: Arc<str>,
    pub updated: bool,
}

impl Candidate {
    pub fn size_bytes(&self) -> usize {
        self.content.len()
    }
}

/// Last completed build of a root: the bundle plus everything needed to
/// decide and run the next incremental build.
#[derive(Debug, Clone)]
pub struct CachedContext {
    pub bundle: ContextBundle,
    pub candidates: Vec<Candidate>,
    pub snapshot: Option<GitSnapshot>,
    pub epoch: u64,
    pub task: TaskContext,
}

impl CachedContext {
    pub fn contains(&self, path: &str) -> bool {
        self.candidates.iter().any(|c| c.path == path)
    }
}
