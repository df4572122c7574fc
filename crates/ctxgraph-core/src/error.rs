use crate::config_manager::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CtxGraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A single file could not be parsed. Never fatal for a build.
    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    /// Backing store failure. `transient` failures are eligible for retry.
    #[error("Cache store I/O error: {message}")]
    StoreIo { message: String, transient: bool },

    #[error("Git context unavailable: {0}")]
    GitUnavailable(String),

    #[error("Dependency graph error: {0}")]
    DependencyGraph(String),

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Invalidation failed: {0}")]
    Invalidation(String),

    /// The mandatory base assembly of a build failed.
    #[error("Build failed during {stage}: {message}")]
    BuildFatal { stage: String, message: String },

    #[error("Build for {root} was superseded by a newer invalidation")]
    Superseded { root: String },

    #[error("Threading error: {0}")]
    Threading(String),
}

impl CtxGraphError {
    pub fn store_io(message: impl Into<String>, transient: bool) -> Self {
        Self::StoreIo {
            message: message.into(),
            transient,
        }
    }

    pub fn parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn build_fatal(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BuildFatal {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StoreIo { transient, .. } => *transient,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CtxGraphError>;
