use crate::bundle::{CachedContext, FullBuildReason};
use ctxgraph_core::GitSnapshot;
use ctxgraph_graph::DependencyGraph;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Lifecycle of a root's cached context.
///
/// ```text
/// NoCache -> FullBuild -> Cached -> IncrementalEligible -> IncrementalBuild -> Cached
///                           |
///                           +-> FullBuild (no git, branch switch, nothing new)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    NoCache,
    FullBuild,
    Cached,
    IncrementalEligible,
    IncrementalBuild,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildPlan {
    Full { reason: FullBuildReason },
    /// Reprocess `changed` plus everything that transitively depends on it.
    Incremental { changed: BTreeSet<String> },
}

impl BuildPlan {
    pub fn is_incremental(&self) -> bool {
        matches!(self, BuildPlan::Incremental { .. })
    }
}

/// True when `current` is a strict continuation of `cached` on the same
/// branch: HEAD moved forward from the cached head, or more files show up
/// as changed.
pub fn is_ahead(cached: &GitSnapshot, current: &GitSnapshot) -> bool {
    if cached.branch != current.branch {
        return false;
    }

    let new_commits = match (cached.head_commit(), current.head_commit()) {
        (Some(old), Some(new)) if old != new => {
            current.recent_commits.iter().any(|c| c.id == old)
        }
        (None, Some(_)) => true,
        _ => false,
    };

    new_commits
        || current.recent_commits.len() > cached.recent_commits.len()
        || current.changed_files.len() > cached.changed_files.len()
}

/// Per-root build state machine deciding between full and incremental
/// builds.
#[derive(Debug, Default)]
pub struct IncrementalUpdater {
    states: DashMap<String, BuildState>,
}

impl IncrementalUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, root: &str) -> BuildState {
        self.states
            .get(root)
            .map(|s| *s)
            .unwrap_or(BuildState::NoCache)
    }

    /// Decide how to build `root` and move it to `FullBuild` or
    /// `IncrementalEligible`.
    pub fn plan(
        &self,
        root: &str,
        cached: Option<&CachedContext>,
        snapshot: Option<&GitSnapshot>,
    ) -> BuildPlan {
        let plan = match (cached, snapshot) {
            (None, _) => BuildPlan::Full {
                reason: FullBuildReason::NoCache,
            },
            (Some(_), None) => BuildPlan::Full {
                reason: FullBuildReason::GitUnavailable,
            },
            (Some(cached), Some(current)) => match cached.snapshot.as_ref() {
                None => BuildPlan::Full {
                    reason: FullBuildReason::GitUnavailable,
                },
                Some(previous) if previous.branch != current.branch => BuildPlan::Full {
                    reason: FullBuildReason::BranchChanged,
                },
                Some(previous) if is_ahead(previous, current) => BuildPlan::Incremental {
                    changed: current.changed_files.clone(),
                },
                Some(_) => BuildPlan::Full {
                    reason: FullBuildReason::NotAhead,
                },
            },
        };

        let state = match &plan {
            BuildPlan::Full { .. } => BuildState::FullBuild,
            BuildPlan::Incremental { .. } => BuildState::IncrementalEligible,
        };
        debug!("Build plan for {}: {:?}", root, plan);
        self.states.insert(root.to_string(), state);
        plan
    }

    pub fn begin_incremental(&self, root: &str) {
        self.states
            .insert(root.to_string(), BuildState::IncrementalBuild);
    }

    pub fn complete(&self, root: &str) {
        self.states.insert(root.to_string(), BuildState::Cached);
    }

    /// A failed build falls back to whatever survives of the previous one.
    pub fn abort(&self, root: &str, has_cache: bool) {
        let state = if has_cache {
            BuildState::Cached
        } else {
            BuildState::NoCache
        };
        self.states.insert(root.to_string(), state);
    }

    pub fn reset(&self, root: &str) {
        self.states.remove(root);
    }

    /// `changed` plus all transitive dependents of each changed file.
    pub fn affected_files(changed: &BTreeSet<String>, graph: &DependencyGraph) -> BTreeSet<String> {
        let mut affected = changed.clone();
        for path in changed {
            affected.extend(graph.dependents(path, true));
        }
        affected
    }
}
