use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    Rust,
    TypeScript,
    JavaScript,
    Python,
    Go,
    Java,
    Cpp,
    C,
    CSharp,
    Ruby,
    Php,
    Swift,
    Kotlin,
    Json,
    Toml,
    Yaml,
    Markdown,
    Text,
    Other(String),
}

impl Language {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "rs" => Language::Rust,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "py" | "pyi" => Language::Python,
            "go" => Language::Go,
            "java" => Language::Java,
            "cc" | "cpp" | "cxx" | "hpp" | "hh" => Language::Cpp,
            "c" | "h" => Language::C,
            "cs" => Language::CSharp,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "swift" => Language::Swift,
            "kt" | "kts" => Language::Kotlin,
            "json" => Language::Json,
            "toml" => Language::Toml,
            "yml" | "yaml" => Language::Yaml,
            "md" | "markdown" | "rst" => Language::Markdown,
            "txt" => Language::Text,
            "" => Language::Other("unknown".to_string()),
            other => Language::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Go => "go",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::CSharp => "csharp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Swift => "swift",
            Language::Kotlin => "kotlin",
            Language::Json => "json",
            Language::Toml => "toml",
            Language::Yaml => "yaml",
            Language::Markdown => "markdown",
            Language::Text => "text",
            Language::Other(s) => s.as_str(),
        }
    }

    pub fn is_source_code(&self) -> bool {
        !matches!(
            self,
            Language::Json
                | Language::Toml
                | Language::Yaml
                | Language::Markdown
                | Language::Text
                | Language::Other(_)
        )
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lang = match s.to_lowercase().as_str() {
            "rust" => Language::Rust,
            "typescript" => Language::TypeScript,
            "javascript" => Language::JavaScript,
            "python" => Language::Python,
            "go" => Language::Go,
            "java" => Language::Java,
            "cpp" => Language::Cpp,
            "c" => Language::C,
            "csharp" => Language::CSharp,
            "ruby" => Language::Ruby,
            "php" => Language::Php,
            "swift" => Language::Swift,
            "kotlin" => Language::Kotlin,
            "json" => Language::Json,
            "toml" => Language::Toml,
            "yaml" => Language::Yaml,
            "markdown" => Language::Markdown,
            "text" => Language::Text,
            "" => return Err("empty language name".to_string()),
            other => Language::Other(other.to_string()),
        };
        Ok(lang)
    }
}

/// Kind of file-system change, ordered by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChangeType {
    Modify,
    Create,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Modify => "modify",
            ChangeType::Create => "create",
            ChangeType::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// A single change notification as emitted by a file-system watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub path: String,
    pub change: ChangeType,
}

impl FileChangeEvent {
    pub fn new(path: impl Into<String>, change: ChangeType) -> Self {
        Self {
            path: path.into(),
            change,
        }
    }
}

/// Targets are deduplicated and kept in first-seen order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationRequest {
    pub targets: Vec<String>,
    pub reason: ChangeType,
    /// Targets whose own most recent change was a deletion.
    #[serde(default)]
    pub deleted: BTreeSet<String>,
    pub received_at: DateTime<Utc>,
}

impl InvalidationRequest {
    pub fn new<I, S>(targets: I, reason: ChangeType) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_changes(targets.into_iter().map(|t| (t, reason)))
    }

    /// Build a request from individual change events. Each path keeps the
    /// last change seen for it; `reason` is the strongest of those.
    pub fn from_changes<I, S>(changes: I) -> Self
    where
        I: IntoIterator<Item = (S, ChangeType)>,
        S: Into<String>,
    {
        let mut targets: Vec<String> = Vec::new();
        let mut latest: HashMap<String, ChangeType> = HashMap::new();
        for (path, change) in changes {
            let path = path.into();
            if latest.insert(path.clone(), change).is_none() {
                targets.push(path);
            }
        }

        let reason = latest.values().copied().max().unwrap_or(ChangeType::Modify);
        let deleted = latest
            .into_iter()
            .filter(|(_, change)| *change == ChangeType::Delete)
            .map(|(path, _)| path)
            .collect();
        Self {
            targets,
            reason,
            deleted,
            received_at: Utc::now(),
        }
    }

    pub fn is_deleted(&self, path: &str) -> bool {
        self.deleted.contains(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTarget {
    pub path: String,
    pub error: String,
    /// The physical delete failed but the entry was marked stale in memory,
    /// so it will not be served as fresh.
    pub recovered: bool,
}

/// Per-target result of an invalidation over a set of paths. Each target is
/// attempted independently of the others.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationOutcome {
    pub successful: Vec<String>,
    pub failed: Vec<FailedTarget>,
    pub entries_removed: usize,
}

impl InvalidationOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn merge(&mut self, other: InvalidationOutcome) {
        self.successful.extend(other.successful);
        self.failed.extend(other.failed);
        self.entries_removed += other.entries_removed;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    pub summary: String,
    pub author: String,
    pub timestamp: i64,
}

/// Git state captured at build time. `recent_commits` is newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSnapshot {
    pub branch: Option<String>,
    pub recent_commits: Vec<CommitInfo>,
    pub changed_files: BTreeSet<String>,
    pub captured_at: DateTime<Utc>,
}

impl GitSnapshot {
    pub fn head_commit(&self) -> Option<&str> {
        self.recent_commits.first().map(|c| c.id.as_str())
    }
}

/// What the task at hand is about; drives relevance scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    pub keywords: Vec<String>,
    pub description: String,
}

impl TaskContext {
    pub fn new<I, S>(keywords: I, description: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseMetadata {
    pub size: usize,
    pub language: Language,
    pub hash: String,
    /// Paths of the files this file depends on, as resolved by the parser.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResult {
    pub artifact: Vec<u8>,
    pub metadata: ParseMetadata,
}
