use crate::{CommitInfo, InvalidationOutcome, InvalidationRequest, ParseResult, Result};
use async_trait::async_trait;

/// Per-language parsing capability. Implementations return
/// [`CtxGraphError::Parse`](crate::CtxGraphError::Parse) on malformed input.
#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, path: &str, content: &str) -> Result<ParseResult>;
}

/// Narrow view of a git repository. Any call may fail; callers treat a
/// failure as "no git context".
#[async_trait]
pub trait GitProvider: Send + Sync {
    async fn current_branch(&self) -> Result<Option<String>>;

    /// Most recent commits on the current branch, newest first.
    async fn recent_commits(&self, limit: usize) -> Result<Vec<CommitInfo>>;

    /// Files changed in the working tree, plus files touched by commits made
    /// after `since` when given.
    async fn changed_files(&self, since: Option<&str>) -> Result<Vec<String>>;

    async fn file_history(&self, path: &str, limit: usize) -> Result<Vec<CommitInfo>>;
}

/// Downstream receiver of consolidated invalidation requests.
#[async_trait]
pub trait InvalidationSink: Send + Sync {
    async fn invalidate(&self, request: InvalidationRequest) -> Result<InvalidationOutcome>;
}
