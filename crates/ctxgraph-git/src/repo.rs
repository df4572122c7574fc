use crate::errors::*;
use ctxgraph_core::CommitInfo;
use git2::{Commit, Oid, Repository, RepositoryOpenFlags, Sort, Status, StatusOptions};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct GitRepository {
    path: PathBuf,
    repo: Repository,
}

fn commit_info(commit: &Commit<'_>) -> CommitInfo {
    CommitInfo {
        id: commit.id().to_string(),
        summary: commit.summary().unwrap_or("").to_string(),
        author: commit.author().name().unwrap_or("unknown").to_string(),
        timestamp: commit.time().seconds(),
    }
}

fn is_unborn(err: &git2::Error) -> bool {
    err.code() == git2::ErrorCode::UnbornBranch || err.code() == git2::ErrorCode::NotFound
}

impl GitRepository {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let repo = Repository::open_ext(
            path_ref,
            RepositoryOpenFlags::empty(),
            &[] as &[&std::ffi::OsStr],
        )
        .map_err(|_| GitIntegrationError::RepoNotFound(path_ref.display().to_string()))?;
        Ok(Self {
            path: path_ref.to_path_buf(),
            repo,
        })
    }

    pub fn init<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::init(path.as_ref())?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            repo,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.repo.workdir()
    }

    pub fn is_bare(&self) -> bool {
        self.repo.is_bare()
    }

    pub fn current_branch(&self) -> Result<Option<String>> {
        let head = match self.repo.head() {
            Ok(h) => h,
            Err(e) if is_unborn(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(head.shorthand().map(|s| s.to_string()))
    }

    /// Commit HEAD points at, `None` while the branch is unborn.
    fn head_oid(&self) -> Result<Option<Oid>> {
        match self.repo.head() {
            Ok(head) => Ok(head.target()),
            Err(e) if is_unborn(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn head_walk(&self) -> Result<Option<git2::Revwalk<'_>>> {
        let Some(head) = self.head_oid()? else {
            return Ok(None);
        };
        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TIME)?;
        revwalk.push(head)?;
        Ok(Some(revwalk))
    }

    /// Up to `limit` commits reachable from HEAD, newest first.
    pub fn recent_commits(&self, limit: usize) -> Result<Vec<CommitInfo>> {
        let Some(revwalk) = self.head_walk()? else {
            return Ok(Vec::new());
        };

        let mut commits = Vec::new();
        for oid in revwalk.take(limit) {
            let commit = self.repo.find_commit(oid?)?;
            commits.push(commit_info(&commit));
        }
        Ok(commits)
    }

    /// Workdir-relative paths with uncommitted changes (index or working
    /// tree, untracked included). With `since`, files changed between that
    /// revision and HEAD are added.
    pub fn changed_files(&self, since: Option<&str>) -> Result<Vec<String>> {
        if self.is_bare() {
            return Err(GitIntegrationError::BareRepository);
        }

        let mut changed = BTreeSet::new();
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        for entry in self.repo.statuses(Some(&mut opts))?.iter() {
            if entry.status() == Status::CURRENT || entry.status().is_ignored() {
                continue;
            }
            let path = entry.path().ok_or(GitIntegrationError::InvalidUtf8)?;
            changed.insert(path.to_string());
        }

        if let Some(rev) = since {
            let base_tree = self.repo.revparse_single(rev)?.peel_to_commit()?.tree()?;
            let head_tree = match self.repo.head() {
                Ok(head) => Some(head.peel_to_commit()?.tree()?),
                Err(e) if is_unborn(&e) => None,
                Err(e) => return Err(e.into()),
            };
            let diff = self
                .repo
                .diff_tree_to_tree(Some(&base_tree), head_tree.as_ref(), None)?;
            for delta in diff.deltas() {
                let path = delta.new_file().path().or_else(|| delta.old_file().path());
                if let Some(path) = path {
                    changed.insert(path.to_str().ok_or(GitIntegrationError::InvalidUtf8)?.to_string());
                }
            }
        }

        debug!("{} changed files in {}", changed.len(), self.path.display());
        Ok(changed.into_iter().collect())
    }

    fn blob_at(commit: &Commit<'_>, path: &Path) -> Option<Oid> {
        commit
            .tree()
            .ok()
            .and_then(|tree| tree.get_path(path).ok())
            .map(|entry| entry.id())
    }

    /// Up to `limit` commits that touched the workdir-relative `path`,
    /// newest first.
    pub fn file_history(&self, path: &Path, limit: usize) -> Result<Vec<CommitInfo>> {
        let Some(revwalk) = self.head_walk()? else {
            return Ok(Vec::new());
        };

        let mut history = Vec::new();
        for oid in revwalk {
            if history.len() >= limit {
                break;
            }
            let commit = self.repo.find_commit(oid?)?;
            let current = Self::blob_at(&commit, path);
            if current.is_none() && commit.parent_count() == 0 {
                continue;
            }
            let touched = if commit.parent_count() == 0 {
                true
            } else {
                commit
                    .parents()
                    .all(|parent| Self::blob_at(&parent, path) != current)
            };
            if touched {
                history.push(commit_info(&commit));
            }
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unborn_repository_is_empty_not_an_error() {
        let dir = tempdir().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        assert_eq!(repo.current_branch().unwrap(), None);
        assert!(repo.recent_commits(10).unwrap().is_empty());
        assert!(repo
            .file_history(Path::new("a.txt"), 5)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn unborn_repository_still_reports_untracked_files() {
        let dir = tempdir().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("new.rs"), "fn main() {}").unwrap();
        assert_eq!(repo.changed_files(None).unwrap(), vec!["new.rs".to_string()]);
    }

    #[test]
    fn open_missing_repository() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            GitRepository::open(dir.path().join("nope")),
            Err(GitIntegrationError::RepoNotFound(_))
        ));
    }
}
