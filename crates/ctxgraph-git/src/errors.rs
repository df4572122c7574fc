use ctxgraph_core::CtxGraphError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GitIntegrationError>;

#[derive(Debug, Error)]
pub enum GitIntegrationError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Repository not found at path: {0}")]
    RepoNotFound(String),

    #[error("Invalid UTF-8 in path")]
    InvalidUtf8,

    #[error("Operation not supported in bare repository")]
    BareRepository,
}

/// Any git failure means the build proceeds without git context.
impl From<GitIntegrationError> for CtxGraphError {
    fn from(err: GitIntegrationError) -> Self {
        CtxGraphError::GitUnavailable(err.to_string())
    }
}
