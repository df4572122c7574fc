use crate::errors::{GitIntegrationError, Result as GitResult};
use crate::repo::GitRepository;
use async_trait::async_trait;
use ctxgraph_core::{CommitInfo, CtxGraphError, GitProvider, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// `GitProvider` backed by libgit2. Paths returned by `changed_files` are
/// absolute (joined to the canonical workdir), matching the paths the
/// context builder enumerates.
pub struct Git2Provider {
    repo: Arc<Mutex<GitRepository>>,
    workdir: PathBuf,
}

impl Git2Provider {
    pub fn open<P: AsRef<Path>>(path: P) -> GitResult<Self> {
        let repo = GitRepository::open(path)?;
        let workdir = repo
            .workdir()
            .ok_or(GitIntegrationError::BareRepository)?
            .to_path_buf();
        let workdir = std::fs::canonicalize(&workdir).unwrap_or(workdir);
        Ok(Self {
            repo: Arc::new(Mutex::new(repo)),
            workdir,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&GitRepository) -> GitResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        let result = tokio::task::spawn_blocking(move || {
            let guard = repo.lock();
            op(&*guard)
        })
        .await
        .map_err(|e| CtxGraphError::Threading(e.to_string()))?;
        result.map_err(CtxGraphError::from)
    }

    fn relative(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        path.strip_prefix(&self.workdir)
            .unwrap_or(path)
            .to_path_buf()
    }
}

#[async_trait]
impl GitProvider for Git2Provider {
    async fn current_branch(&self) -> Result<Option<String>> {
        self.run(|repo| repo.current_branch()).await
    }

    async fn recent_commits(&self, limit: usize) -> Result<Vec<CommitInfo>> {
        self.run(move |repo| repo.recent_commits(limit)).await
    }

    async fn changed_files(&self, since: Option<&str>) -> Result<Vec<String>> {
        let since = since.map(str::to_string);
        let relative = self
            .run(move |repo| repo.changed_files(since.as_deref()))
            .await?;
        Ok(relative
            .into_iter()
            .map(|p| self.workdir.join(p).to_string_lossy().into_owned())
            .collect())
    }

    async fn file_history(&self, path: &str, limit: usize) -> Result<Vec<CommitInfo>> {
        let relative = self.relative(path);
        self.run(move |repo| repo.file_history(&relative, limit))
            .await
    }
}
